//! Langfuse adapter: spans become ingestion-API events.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use url::Url;

use crate::error;
use crate::exporters::batch::{BatchConfig, BatchEncoder, BatchExporter};
use crate::span::{SpanData, SpanStatus};
use crate::tracer::SpanExporter;

pub const DEFAULT_LANGFUSE_HOST: &str = "https://cloud.langfuse.com";

#[derive(Debug, Clone)]
pub struct LangfuseConfig {
    pub host: Url,
    pub public_key: String,
    pub secret_key: SecretString,
    pub batch: BatchConfig,
}

impl LangfuseConfig {
    pub fn ingestion_url(&self) -> String {
        format!(
            "{}/api/public/ingestion",
            self.host.as_str().trim_end_matches('/')
        )
    }
}

struct LangfuseEncoder {
    url: String,
    public_key: String,
    secret_key: SecretString,
}

impl BatchEncoder for LangfuseEncoder {
    fn name(&self) -> &'static str {
        "langfuse"
    }

    fn request(&self, client: &reqwest::Client, spans: &[SpanData]) -> reqwest::RequestBuilder {
        client
            .post(&self.url)
            .basic_auth(&self.public_key, Some(self.secret_key.expose_secret()))
            .json(&encode_batch(spans))
    }
}

/// Sends spans to Langfuse.
pub struct LangfuseExporter {
    inner: BatchExporter,
}

impl LangfuseExporter {
    pub fn spawn(config: LangfuseConfig) -> error::Result<Self> {
        let encoder = LangfuseEncoder {
            url: config.ingestion_url(),
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
        };
        Ok(Self {
            inner: BatchExporter::spawn(encoder, config.batch)?,
        })
    }
}

#[async_trait]
impl SpanExporter for LangfuseExporter {
    fn name(&self) -> &str {
        "langfuse"
    }

    fn export(&self, span: &SpanData) -> error::Result<()> {
        self.inner.export(span)
    }

    async fn flush(&self) -> error::Result<()> {
        self.inner.flush().await
    }
}

/// Build an ingestion request body. Root spans also open their trace.
pub fn encode_batch(spans: &[SpanData]) -> Value {
    let mut batch = Vec::with_capacity(spans.len() + 1);
    for span in spans {
        let metadata: Map<String, Value> = span
            .attributes
            .iter()
            .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.to_string(), v)))
            .collect();
        let start = iso_timestamp(span.start_unix_nanos);
        let end = iso_timestamp(span.end_unix_nanos);

        if span.is_root() {
            batch.push(event(
                "trace-create",
                &start,
                json!({
                    "id": span.context.trace_id,
                    "name": span.name,
                    "timestamp": start,
                    "sessionId": span.run_id(),
                    "metadata": metadata,
                }),
            ));
        }

        let mut body = json!({
            "id": span.context.span_id,
            "traceId": span.context.trace_id,
            "name": span.name,
            "startTime": start,
            "endTime": end,
            "metadata": metadata,
            "level": "DEFAULT",
        });
        if let Some(parent) = &span.context.parent_span_id {
            body["parentObservationId"] = json!(parent);
        }
        if span.status == SpanStatus::Error {
            body["level"] = json!("ERROR");
            body["statusMessage"] = json!(span.error.clone().unwrap_or_default());
        }
        batch.push(event("span-create", &end, body));
    }
    json!({ "batch": batch })
}

fn event(kind: &str, timestamp: &str, body: Value) -> Value {
    json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "type": kind,
        "timestamp": timestamp,
        "body": body,
    })
}

fn iso_timestamp(unix_nanos: u64) -> String {
    let secs = i64::try_from(unix_nanos / 1_000_000_000).unwrap_or(i64::MAX);
    let nanos = u32::try_from(unix_nanos % 1_000_000_000).unwrap_or(0);
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Attributes, SpanContext};

    fn root_span() -> SpanData {
        SpanData {
            context: SpanContext {
                trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
                span_id: "b7ad6b7169203331".into(),
                parent_span_id: None,
            },
            name: "agent.solve".into(),
            status: SpanStatus::Error,
            error: Some("tool crashed".into()),
            start_unix_nanos: 1_700_000_000_000_000_000,
            end_unix_nanos: 1_700_000_001_500_000_000,
            duration_ms: 1500,
            attributes: Attributes::new().with("run_id", "r-1"),
        }
    }

    #[test]
    fn root_span_opens_trace_and_marks_error_level() {
        let body = encode_batch(&[root_span()]);
        let batch = body["batch"].as_array().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["type"], "trace-create");
        assert_eq!(batch[0]["body"]["sessionId"], "r-1");
        assert_eq!(batch[1]["type"], "span-create");
        assert_eq!(batch[1]["body"]["level"], "ERROR");
        assert_eq!(batch[1]["body"]["statusMessage"], "tool crashed");
        assert_eq!(batch[1]["body"]["startTime"], "2023-11-14T22:13:20.000Z");
        assert_eq!(batch[1]["body"]["endTime"], "2023-11-14T22:13:21.500Z");
    }

    #[test]
    fn ingestion_url_tolerates_trailing_slash() {
        let cfg = LangfuseConfig {
            host: Url::parse("https://lf.example.com/").unwrap(),
            public_key: "pk".into(),
            secret_key: SecretString::from("sk".to_string()),
            batch: BatchConfig::default(),
        };
        assert_eq!(cfg.ingestion_url(), "https://lf.example.com/api/public/ingestion");
    }
}
