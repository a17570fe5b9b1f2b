//! Local JSONL span file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{self, ProbeError};
use crate::span::SpanData;
use crate::storage::{append_line, ensure_parent_dir};
use crate::tracer::SpanExporter;

/// Appends one JSON object per finished span to a file, for local
/// development without external services.
#[derive(Debug, Clone)]
pub struct JsonlExporter {
    path: PathBuf,
}

impl JsonlExporter {
    /// Create the exporter, making sure the parent directory exists.
    pub fn create(path: impl Into<PathBuf>) -> error::Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SpanExporter for JsonlExporter {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn export(&self, span: &SpanData) -> error::Result<()> {
        let line = serde_json::to_string(span)?;
        append_line(&self.path, &line, false)
            .map_err(|e| ProbeError::export("jsonl", format!("{}: {e}", self.path.display())))
    }
}
