//! In-process span collector.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error;
use crate::span::SpanData;
use crate::tracer::SpanExporter;

/// Collects finished spans in memory, for tests and embedding hosts that
/// want to inspect spans without a backend.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    spans: Mutex<Vec<SpanData>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every span exported so far.
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    fn name(&self) -> &str {
        "memory"
    }

    fn export(&self, span: &SpanData) -> error::Result<()> {
        let mut spans = self.spans.lock().unwrap_or_else(|e| e.into_inner());
        spans.push(span.clone());
        Ok(())
    }
}
