//! Timed, attributed records of one instrumented operation.
//!
//! A [`Span`] is opened by a [`Tracer`], mutated in place while the
//! operation runs, and closed exactly once. Closing happens explicitly via
//! [`Span::end`] / [`Span::end_with_error`], or implicitly on `Drop`, so the
//! finished [`SpanData`] reaches the tracer on every exit path (early
//! returns, `?`, panics, dropped futures).

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::tracer::Tracer;

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Scalar or short string attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Insertion-ordered attribute map. Setting an existing key overwrites its
/// value in place (last write wins, original position kept).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder-style [`Attributes::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Span data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Identifiers linking a span into a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpanContext {
    /// 32 lowercase hex chars; empty for non-recording spans.
    pub trace_id: String,
    /// 16 lowercase hex chars; empty for non-recording spans.
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl SpanContext {
    pub(crate) fn root() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    pub(crate) fn child_of(parent: &SpanContext) -> Self {
        Self {
            trace_id: parent.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(parent.span_id.clone()),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.trace_id.is_empty() && !self.span_id.is_empty()
    }
}

fn new_span_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

/// A closed span, as handed to exporters. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    #[serde(flatten)]
    pub context: SpanContext,
    pub name: String,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: u64,
    pub duration_ms: u64,
    pub attributes: Attributes,
}

impl SpanData {
    pub fn is_root(&self) -> bool {
        self.context.parent_span_id.is_none()
    }

    /// The `run_id` attribute, when the span belongs to a run.
    pub fn run_id(&self) -> Option<&str> {
        match self.attributes.get("run_id") {
            Some(AttributeValue::String(id)) => Some(id),
            _ => None,
        }
    }
}

pub(crate) fn unix_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Live span
// ---------------------------------------------------------------------------

struct LiveSpan {
    context: SpanContext,
    name: String,
    attributes: Attributes,
    started_at: SystemTime,
    started: Instant,
}

/// An open span. Exclusively owned by the code that started it.
pub struct Span {
    tracer: Tracer,
    live: Option<LiveSpan>,
    recording: bool,
}

impl Span {
    pub(crate) fn start(
        tracer: Tracer,
        name: &str,
        context: SpanContext,
        attributes: Attributes,
    ) -> Self {
        let recording = tracer.is_recording();
        Self {
            tracer,
            live: Some(LiveSpan {
                context,
                name: name.to_string(),
                attributes: if recording { attributes } else { Attributes::new() },
                started_at: SystemTime::now(),
                started: Instant::now(),
            }),
            recording,
        }
    }

    /// Set an attribute; repeated keys overwrite. No-op for non-recording spans.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if !self.recording {
            return;
        }
        if let Some(live) = self.live.as_mut() {
            live.attributes.set(key, value);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn context(&self) -> SpanContext {
        self.live
            .as_ref()
            .map(|l| l.context.clone())
            .unwrap_or_default()
    }

    /// Close the span with status OK.
    pub fn end(mut self) {
        self.finish(SpanStatus::Ok, None);
    }

    /// Close the span with status ERROR and the given description.
    pub fn end_with_error(mut self, error: impl Into<String>) {
        self.finish(SpanStatus::Error, Some(error.into()));
    }

    fn finish(&mut self, status: SpanStatus, error: Option<String>) {
        let Some(live) = self.live.take() else {
            return;
        };
        if !self.recording {
            return;
        }
        let elapsed = live.started.elapsed();
        let start_unix_nanos = unix_nanos(live.started_at);
        let elapsed_nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let data = SpanData {
            context: live.context,
            name: live.name,
            status,
            error,
            start_unix_nanos,
            end_unix_nanos: start_unix_nanos.saturating_add(elapsed_nanos),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            attributes: live.attributes,
        };
        self.tracer.export(data);
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.live.is_some() {
            self.finish(
                SpanStatus::Error,
                Some("span dropped before completion".to_string()),
            );
        }
    }
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.live.as_ref().map(|l| l.name.as_str()))
            .field("recording", &self.recording)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_keep_order_and_last_write_wins() {
        let mut attrs = Attributes::new().with("a", 1i64).with("b", "x");
        attrs.set("a", 2i64);
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(attrs.get("a"), Some(&AttributeValue::Int(2)));
    }

    #[test]
    fn attributes_serialize_as_json_object() {
        let attrs = Attributes::new().with("ok", true).with("n", 3u64);
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "n": 3}));
    }

    #[test]
    fn child_context_shares_trace_id() {
        let root = SpanContext::root();
        let child = SpanContext::child_of(&root);
        assert_eq!(root.trace_id.len(), 32);
        assert_eq!(root.span_id.len(), 16);
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
    }
}
