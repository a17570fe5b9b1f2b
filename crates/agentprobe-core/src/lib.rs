//! # agentprobe Core
//!
//! Zero-intrusion instrumentation and evaluation for LLM agents.
//! Wraps agents and LLMs in spans without touching their code, attributes
//! nested token usage to the enclosing run, persists one validated record
//! per run to append-only JSONL, and aggregates records into comparable
//! statistics across agent configurations.

pub mod aggregate;
pub mod agent;
pub mod builtin;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod exporters;
pub mod instrument;
pub mod record;
pub mod runner;
pub mod span;
pub mod storage;
pub mod tracer;

pub use aggregate::{Aggregate, Distribution, Summary, render_table, summarize};
pub use agent::{Agent, ChatMessage, Completion, CompletionRequest, Llm, ReasoningResult, Usage};
pub use config::{RunConfig, config_hash, short_hash};
pub use context::{RunContext, RunMetadata, RunMetrics, get_current, propagate, run_within};
pub use dataset::{Dataset, DatasetItem, load_dataset};
pub use error::ProbeError;
pub use instrument::{Instrumentation, ObservationKind, ObservedAgent, ObservedLlm, observe};
pub use record::{ParseMode, RunRecord, SCHEMA_VERSION, UNKNOWN_AGENT_VERSION};
pub use runner::{RunSummary, Runner};
pub use span::{AttributeValue, Attributes, Span, SpanData, SpanStatus};
pub use storage::{JsonlStorage, default_output_path, output_path};
pub use tracer::{SpanExporter, Tracer, TracerConfig, create_tracer};
