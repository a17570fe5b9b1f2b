//! Concrete [`SpanExporter`](crate::tracer::SpanExporter) backends.

pub mod batch;
pub mod jsonl;
pub mod langfuse;
pub mod memory;
pub mod otlp;

pub use batch::{BatchConfig, BatchExporter};
pub use jsonl::JsonlExporter;
pub use langfuse::{LangfuseConfig, LangfuseExporter};
pub use memory::InMemoryExporter;
pub use otlp::{OtlpConfig, OtlpExporter};
