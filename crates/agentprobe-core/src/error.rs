use std::path::PathBuf;

use thiserror::Error;

/// Root error type for all agentprobe operations.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Validation error in field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Agent execution failed: {message}")]
    AgentExecution {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Export error in '{exporter}': {message}")]
    Export { exporter: String, message: String },

    #[error("Storage I/O error on '{}': {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("LLM error: {message}")]
    Llm { message: String, status: Option<u16> },
}

impl ProbeError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn agent(message: impl Into<String>) -> Self {
        Self::AgentExecution {
            message: message.into(),
            source: None,
        }
    }

    pub fn export(exporter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Export {
            exporter: exporter.into(),
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
            status: None,
        }
    }

    /// Errors that mean the whole batch cannot be recorded, as opposed to
    /// failures local to one dataset item.
    pub fn is_fatal_to_batch(&self) -> bool {
        matches!(
            self,
            Self::StorageIo { .. } | Self::Configuration { .. } | Self::Validation { .. }
        )
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
