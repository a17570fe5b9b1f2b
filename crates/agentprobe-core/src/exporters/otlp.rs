//! OpenTelemetry forwarding over OTLP/HTTP with the JSON encoding.

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use crate::error;
use crate::exporters::batch::{BatchConfig, BatchEncoder, BatchExporter};
use crate::span::{AttributeValue, Attributes, SpanData, SpanStatus};
use crate::tracer::SpanExporter;

const SCOPE_NAME: &str = "agentprobe";
// OTLP SpanKind / StatusCode enum values
const SPAN_KIND_INTERNAL: u8 = 1;
const STATUS_OK: u8 = 1;
const STATUS_ERROR: u8 = 2;

#[derive(Debug, Clone)]
pub struct OtlpConfig {
    /// Collector base URL, e.g. `http://localhost:4318`. `/v1/traces` is appended.
    pub endpoint: Url,
    pub service_name: String,
    pub batch: BatchConfig,
}

impl OtlpConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            service_name: "agentprobe".to_string(),
            batch: BatchConfig::default(),
        }
    }

    pub fn traces_url(&self) -> String {
        let base = self.endpoint.as_str().trim_end_matches('/');
        if base.ends_with("/v1/traces") {
            base.to_string()
        } else {
            format!("{base}/v1/traces")
        }
    }
}

struct OtlpEncoder {
    url: String,
    service_name: String,
}

impl BatchEncoder for OtlpEncoder {
    fn name(&self) -> &'static str {
        "otlp"
    }

    fn request(&self, client: &reqwest::Client, spans: &[SpanData]) -> reqwest::RequestBuilder {
        client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&encode_spans(&self.service_name, spans))
    }
}

/// Forwards spans to an OTLP/HTTP collector.
pub struct OtlpExporter {
    inner: BatchExporter,
}

impl OtlpExporter {
    pub fn spawn(config: OtlpConfig) -> error::Result<Self> {
        let encoder = OtlpEncoder {
            url: config.traces_url(),
            service_name: config.service_name.clone(),
        };
        Ok(Self {
            inner: BatchExporter::spawn(encoder, config.batch)?,
        })
    }
}

#[async_trait]
impl SpanExporter for OtlpExporter {
    fn name(&self) -> &str {
        "otlp"
    }

    fn export(&self, span: &SpanData) -> error::Result<()> {
        self.inner.export(span)
    }

    async fn flush(&self) -> error::Result<()> {
        self.inner.flush().await
    }
}

/// Build an `ExportTraceServiceRequest` body.
pub fn encode_spans(service_name: &str, spans: &[SpanData]) -> Value {
    let spans: Vec<Value> = spans.iter().map(encode_span).collect();
    json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [key_value("service.name", &AttributeValue::from(service_name))]
            },
            "scopeSpans": [{
                "scope": {"name": SCOPE_NAME, "version": env!("CARGO_PKG_VERSION")},
                "spans": spans
            }]
        }]
    })
}

fn encode_span(span: &SpanData) -> Value {
    let mut out = json!({
        "traceId": span.context.trace_id,
        "spanId": span.context.span_id,
        "name": span.name,
        "kind": SPAN_KIND_INTERNAL,
        "startTimeUnixNano": span.start_unix_nanos.to_string(),
        "endTimeUnixNano": span.end_unix_nanos.to_string(),
        "attributes": encode_attributes(&span.attributes),
    });
    if let Some(parent) = &span.context.parent_span_id {
        out["parentSpanId"] = json!(parent);
    }
    out["status"] = match span.status {
        SpanStatus::Ok => json!({"code": STATUS_OK}),
        SpanStatus::Error => json!({
            "code": STATUS_ERROR,
            "message": span.error.clone().unwrap_or_default()
        }),
    };
    out
}

fn encode_attributes(attributes: &Attributes) -> Vec<Value> {
    attributes.iter().map(|(k, v)| key_value(k, v)).collect()
}

fn key_value(key: &str, value: &AttributeValue) -> Value {
    let value = match value {
        AttributeValue::Bool(b) => json!({"boolValue": b}),
        // int64 travels as a decimal string in OTLP/JSON
        AttributeValue::Int(i) => json!({"intValue": i.to_string()}),
        AttributeValue::Float(f) => json!({"doubleValue": f}),
        AttributeValue::String(s) => json!({"stringValue": s}),
    };
    json!({"key": key, "value": value})
}
