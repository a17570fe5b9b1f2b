//! Runner — drives an agent over a dataset and records every run.
//!
//! Items run strictly sequentially in dataset order. Each item gets its own
//! [`RunContext`]; whatever the agent does (returns, errors, panics) becomes
//! exactly one appended [`RunRecord`]. Only errors that are fatal to the
//! batch (storage, validation) abort it; spans recorded so far are flushed
//! first.

use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::config::RunConfig;
use crate::context::{RunContext, RunMetadata, run_within};
use crate::dataset::DatasetItem;
use crate::error;
use crate::instrument::Instrumentation;
use crate::record::{RunRecord, runtime_env};
use crate::storage::JsonlStorage;
use crate::tracer::Tracer;

/// Counts reported after a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub output_path: PathBuf,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} failed={} output={}",
            self.processed,
            self.failed,
            self.output_path.display()
        )
    }
}

pub struct Runner {
    agent: Arc<dyn Agent>,
    tracer: Tracer,
    storage: JsonlStorage,
    dataset_id: Option<String>,
    agent_name: String,
    agent_version: String,
    config: RunConfig,
    config_hash: String,
    limit: Option<usize>,
}

impl Runner {
    /// Instruments `agent` (once; already-observed agents are kept as is).
    pub fn new(agent: Arc<dyn Agent>, tracer: Tracer, storage: JsonlStorage) -> Self {
        let agent = Instrumentation::new(tracer.clone()).agent(agent);
        let config = RunConfig::default();
        Self {
            agent_name: agent.name().to_string(),
            agent_version: agent.version().to_string(),
            config_hash: config.hash(),
            agent,
            tracer,
            storage,
            dataset_id: None,
            config,
            limit: None,
        }
    }

    pub fn dataset_id(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }

    pub fn agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    pub fn agent_version(mut self, version: impl Into<String>) -> Self {
        self.agent_version = version.into();
        self
    }

    /// The configuration recorded with (and hashed into) every record.
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config_hash = config.hash();
        self.config = config;
        self
    }

    /// Stop after `limit` items.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn storage(&self) -> &JsonlStorage {
        &self.storage
    }

    /// Run every item (up to the limit), append one record each, then flush
    /// the tracer.
    pub async fn run(&self, items: &[DatasetItem]) -> error::Result<RunSummary> {
        let mut summary = RunSummary {
            processed: 0,
            succeeded: 0,
            failed: 0,
            output_path: self.storage.path().to_path_buf(),
        };
        let limit = self.limit.unwrap_or(usize::MAX);

        for item in items.iter().take(limit) {
            let record = self.run_item(item).await;
            summary.processed += 1;
            if let Err(e) = self.storage.append(&record) {
                if e.is_fatal_to_batch() {
                    error!(run_id = %record.run_id, error = %e, "Aborting batch");
                    self.tracer.flush().await;
                    return Err(e);
                }
                warn!(run_id = %record.run_id, error = %e, "Record not stored");
                summary.failed += 1;
                continue;
            }
            if record.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        self.tracer.flush().await;
        info!(
            processed = summary.processed,
            failed = summary.failed,
            output = %summary.output_path.display(),
            "Batch complete"
        );
        Ok(summary)
    }

    /// Run one item and build its record. Never fails: agent errors and
    /// panics are captured in the record.
    pub async fn run_item(&self, item: &DatasetItem) -> RunRecord {
        let metadata = RunMetadata {
            dataset_id: self.dataset_id.clone(),
            item_id: Some(item.id.clone()),
            agent_name: Some(self.agent_name.clone()),
            config_hash: Some(self.config_hash.clone()),
        };
        let ctx = Arc::new(RunContext::with_metadata(metadata));
        debug!(run_id = ctx.run_id(), item_id = %item.id, "Running item");

        let outcome = run_within(
            ctx.clone(),
            AssertUnwindSafe(self.agent.solve(&item.goal)).catch_unwind(),
        )
        .await;

        let mut record = RunRecord::new(
            ctx.run_id(),
            self.agent_name.as_str(),
            self.agent_version.as_str(),
            self.config_hash.as_str(),
            item.goal.as_str(),
        );
        record.dataset_id = self.dataset_id.clone();
        record.item_id = Some(item.id.clone());
        record.expected = item.expected.clone();
        record.agent_config = Some(self.config.public_value());
        record.runtime_env = Some(runtime_env());
        record.extra = item.metadata.clone();

        match outcome {
            Ok(Ok(result)) => {
                record.success = result.success;
                record.result = Some(Value::String(result.output));
            }
            Ok(Err(e)) => {
                warn!(item_id = %item.id, error = %e, "Agent failed");
                record.push_error(e.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(item_id = %item.id, panic = %message, "Agent panicked");
                record.push_error(format!("agent panicked: {message}"));
            }
        }

        let mut metrics = ctx.metrics();
        if metrics.duration_ms.is_none() {
            metrics.duration_ms = Some(ctx.elapsed_ms());
        }
        record.apply_metrics(&metrics);
        record
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
