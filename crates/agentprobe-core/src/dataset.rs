//! Dataset loading.
//!
//! Two formats: JSONL (one object per line) and a JSON array. Each item
//! needs a `goal` (alias `input`); `id`, `expected` (alias
//! `expected_output`) and `metadata` are optional. Items without an id are
//! numbered by their 0-based position.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{self, ProbeError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub id: String,
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Defaults to the file stem.
    pub id: String,
    pub items: Vec<DatasetItem>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(default)]
    id: Option<Value>,
    #[serde(alias = "input")]
    goal: String,
    #[serde(default, alias = "expected_output")]
    expected: Option<Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl RawItem {
    fn into_item(self, index: usize) -> DatasetItem {
        let id = match self.id {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => index.to_string(),
            Some(other) => other.to_string(),
        };
        DatasetItem {
            id,
            goal: self.goal,
            expected: self.expected.filter(|v| !v.is_null()),
            metadata: self.metadata,
        }
    }
}

/// Load items from a JSONL string. Blank lines are skipped but still count
/// toward the position used for default ids.
pub fn load_dataset_jsonl(jsonl: &str) -> error::Result<Vec<DatasetItem>> {
    jsonl
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<RawItem>(line)
                .map(|raw| raw.into_item(i))
                .map_err(|e| ProbeError::config(format!("Failed to parse line {}: {e}", i + 1)))
        })
        .collect()
}

/// Load items from a JSON array string.
pub fn load_dataset_json(json: &str) -> error::Result<Vec<DatasetItem>> {
    let raw: Vec<RawItem> = serde_json::from_str(json)
        .map_err(|e| ProbeError::config(format!("Failed to parse dataset: {e}")))?;
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.into_item(i))
        .collect())
}

/// Load a dataset file, picking the format from the extension.
pub fn load_dataset(path: impl AsRef<Path>) -> error::Result<Dataset> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let content = std::fs::read_to_string(path).map_err(|e| {
        ProbeError::config(format!("Failed to read dataset '{}': {e}", path.display()))
    })?;

    let items = match ext.as_deref() {
        Some("jsonl") | Some("ndjson") => load_dataset_jsonl(&content)?,
        Some("json") => load_dataset_json(&content)?,
        other => {
            return Err(ProbeError::config(format!(
                "Unsupported dataset format: {}",
                other.unwrap_or("<none>")
            )));
        }
    };

    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string();
    Ok(Dataset { id, items })
}
