//! Tracers — the pluggable backends that receive finished spans.
//!
//! A [`Tracer`] is a cheap, clonable handle around one [`SpanExporter`].
//! Export is best-effort: any error an exporter reports is logged and the
//! span is dropped, so telemetry can never abort instrumented code.
//!
//! | Backend    | Description |
//! |------------|-------------|
//! | `noop`     | Default. Spans are not recorded, nothing is written or sent |
//! | `jsonl`    | Appends one JSON object per span to a local file |
//! | `otlp`     | Forwards spans to an OpenTelemetry collector (OTLP/HTTP JSON) |
//! | `langfuse` | Sends spans to the Langfuse ingestion API |

use async_trait::async_trait;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::error::{self, ProbeError};
use crate::exporters::batch::BatchConfig;
use crate::exporters::jsonl::JsonlExporter;
use crate::exporters::langfuse::{DEFAULT_LANGFUSE_HOST, LangfuseConfig, LangfuseExporter};
use crate::exporters::otlp::{OtlpConfig, OtlpExporter};
use crate::span::{Attributes, Span, SpanContext, SpanData};

// ---------------------------------------------------------------------------
// Exporter trait
// ---------------------------------------------------------------------------

/// Backend contract for finished spans.
///
/// `export` is called synchronously when a span closes and must not block on
/// network I/O; exporters that talk to a remote backend queue the span and
/// deliver it in the background.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Backend name (e.g. "noop", "jsonl", "otlp").
    fn name(&self) -> &str;

    /// Hand over one finished span.
    fn export(&self, span: &SpanData) -> error::Result<()>;

    /// Deliver anything buffered. No-op by default.
    async fn flush(&self) -> error::Result<()> {
        Ok(())
    }

    /// Whether spans sent to this backend are discarded unseen.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Exporter that discards everything. The default backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

#[async_trait]
impl SpanExporter for NoopExporter {
    fn name(&self) -> &str {
        "noop"
    }

    #[inline(always)]
    fn export(&self, _span: &SpanData) -> error::Result<()> {
        Ok(())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tracer handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Tracer {
    exporter: Arc<dyn SpanExporter>,
    recording: bool,
}

impl Tracer {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        let recording = !exporter.is_noop();
        Self {
            exporter,
            recording,
        }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopExporter))
    }

    /// False for the no-op tracer: its spans carry no ids and no attributes.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn exporter_name(&self) -> &str {
        self.exporter.name()
    }

    /// Open a span that starts a new trace.
    pub fn start_span(&self, name: &str, attributes: Attributes) -> Span {
        let context = if self.recording {
            SpanContext::root()
        } else {
            SpanContext::default()
        };
        Span::start(self.clone(), name, context, attributes)
    }

    /// Open a span nested under `parent`.
    pub fn start_child_span(&self, name: &str, parent: &SpanContext, attributes: Attributes) -> Span {
        let context = if self.recording && parent.is_valid() {
            SpanContext::child_of(parent)
        } else if self.recording {
            SpanContext::root()
        } else {
            SpanContext::default()
        };
        Span::start(self.clone(), name, context, attributes)
    }

    pub(crate) fn export(&self, span: SpanData) {
        if let Err(e) = self.exporter.export(&span) {
            warn!(
                exporter = self.exporter.name(),
                span = %span.name,
                error = %e,
                "Dropping span after export failure"
            );
        }
    }

    /// Flush the exporter, logging (never returning) delivery failures.
    pub async fn flush(&self) {
        if let Err(e) = self.exporter.flush().await {
            warn!(exporter = self.exporter.name(), error = %e, "Span flush failed");
        }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("exporter", &self.exporter.name())
            .field("recording", &self.recording)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which tracer backend to build. Absent configuration means [`TracerConfig::Noop`].
#[derive(Debug, Clone, Default)]
pub enum TracerConfig {
    #[default]
    Noop,
    Jsonl {
        path: PathBuf,
    },
    Otlp(OtlpConfig),
    Langfuse(LangfuseConfig),
}

impl TracerConfig {
    /// Resolve the tracer from an explicit selection, falling back to the
    /// process environment.
    pub fn from_env(
        selection: Option<&str>,
        spans_path: Option<PathBuf>,
        default_spans_path: &Path,
    ) -> error::Result<Self> {
        Self::from_lookup(selection, spans_path, default_spans_path, |key| {
            std::env::var(key).ok()
        })
    }

    /// Same as [`TracerConfig::from_env`] with an injectable variable lookup.
    ///
    /// Recognised variables: `AGENTPROBE_TRACER`, `AGENTPROBE_SPANS_PATH`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`,
    /// `LANGFUSE_PUBLIC_KEY`, `LANGFUSE_SECRET_KEY`, `LANGFUSE_HOST`.
    pub fn from_lookup<F>(
        selection: Option<&str>,
        spans_path: Option<PathBuf>,
        default_spans_path: &Path,
        lookup: F,
    ) -> error::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let selected = selection
            .map(str::to_string)
            .or_else(|| lookup("AGENTPROBE_TRACER"))
            .map(|s| s.trim().to_ascii_lowercase());

        match selected.as_deref() {
            None | Some("") | Some("none") | Some("noop") => Ok(Self::Noop),
            Some("jsonl") => {
                let path = spans_path
                    .or_else(|| lookup("AGENTPROBE_SPANS_PATH").map(PathBuf::from))
                    .unwrap_or_else(|| default_spans_path.to_path_buf());
                Ok(Self::Jsonl { path })
            }
            Some("otlp") | Some("otel") => {
                let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").ok_or_else(|| {
                    ProbeError::config("otlp tracer requires OTEL_EXPORTER_OTLP_ENDPOINT")
                })?;
                Ok(Self::Otlp(OtlpConfig {
                    endpoint: parse_endpoint("OTEL_EXPORTER_OTLP_ENDPOINT", &endpoint)?,
                    service_name: lookup("OTEL_SERVICE_NAME")
                        .unwrap_or_else(|| "agentprobe".to_string()),
                    batch: BatchConfig::default(),
                }))
            }
            Some("langfuse") => {
                let public_key = lookup("LANGFUSE_PUBLIC_KEY").ok_or_else(|| {
                    ProbeError::config("langfuse tracer requires LANGFUSE_PUBLIC_KEY")
                })?;
                let secret_key = lookup("LANGFUSE_SECRET_KEY").ok_or_else(|| {
                    ProbeError::config("langfuse tracer requires LANGFUSE_SECRET_KEY")
                })?;
                let host = lookup("LANGFUSE_HOST")
                    .unwrap_or_else(|| DEFAULT_LANGFUSE_HOST.to_string());
                Ok(Self::Langfuse(LangfuseConfig {
                    host: parse_endpoint("LANGFUSE_HOST", &host)?,
                    public_key,
                    secret_key: SecretString::from(secret_key),
                    batch: BatchConfig::default(),
                }))
            }
            Some(other) => Err(ProbeError::config(format!(
                "Unknown tracer '{other}' (expected none, jsonl, otlp or langfuse)"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Jsonl { .. } => "jsonl",
            Self::Otlp(_) => "otlp",
            Self::Langfuse(_) => "langfuse",
        }
    }
}

fn parse_endpoint(var: &str, value: &str) -> error::Result<Url> {
    Url::parse(value.trim()).map_err(|e| ProbeError::config(format!("{var}: invalid URL '{value}': {e}")))
}

/// Build the tracer selected by `config`.
///
/// Network backends spawn their delivery worker on the current Tokio
/// runtime and fail with a configuration error outside of one.
pub fn create_tracer(config: &TracerConfig) -> error::Result<Tracer> {
    let exporter: Arc<dyn SpanExporter> = match config {
        TracerConfig::Noop => return Ok(Tracer::noop()),
        TracerConfig::Jsonl { path } => Arc::new(JsonlExporter::create(path)?),
        TracerConfig::Otlp(cfg) => Arc::new(OtlpExporter::spawn(cfg.clone())?),
        TracerConfig::Langfuse(cfg) => Arc::new(LangfuseExporter::spawn(cfg.clone())?),
    };
    Ok(Tracer::new(exporter))
}
