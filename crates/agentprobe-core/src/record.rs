//! The persisted, validated summary of one run.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::RunMetrics;
use crate::error::{self, ProbeError};

pub const SCHEMA_VERSION: &str = "1.0";

/// Stand-in for a null or absent `agent_version` under lenient parsing.
pub const UNKNOWN_AGENT_VERSION: &str = "unknown";

/// One evaluation run, exactly as written to a JSONL line.
///
/// Every field is always serialized; absent optionals become `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub schema_version: String,
    pub run_id: String,
    pub dataset_id: Option<String>,
    pub item_id: Option<String>,
    pub agent_name: String,
    pub agent_version: String,
    pub config_hash: String,
    pub timestamp_utc: String,
    pub goal: String,
    pub expected: Option<Value>,
    pub result: Option<Value>,
    pub success: bool,
    pub time_ms: i64,
    pub tokens_prompt: Option<i64>,
    pub tokens_completion: Option<i64>,
    pub tokens_total: Option<i64>,
    pub trace_ids: Option<Vec<String>>,
    pub errors: Option<Vec<String>>,
    /// The non-secret configuration the hash was computed over.
    pub agent_config: Option<Value>,
    pub runtime_env: Option<Map<String, Value>>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl RunRecord {
    /// A record with the current timestamp and every optional field unset.
    pub fn new(
        run_id: impl Into<String>,
        agent_name: impl Into<String>,
        agent_version: impl Into<String>,
        config_hash: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: run_id.into(),
            dataset_id: None,
            item_id: None,
            agent_name: agent_name.into(),
            agent_version: agent_version.into(),
            config_hash: config_hash.into(),
            timestamp_utc: now_utc(),
            goal: goal.into(),
            expected: None,
            result: None,
            success: false,
            time_ms: 0,
            tokens_prompt: None,
            tokens_completion: None,
            tokens_total: None,
            trace_ids: None,
            errors: None,
            agent_config: None,
            runtime_env: None,
            extra: Map::new(),
        }
    }

    /// Set prompt/completion tokens and derive the total.
    pub fn set_tokens(&mut self, prompt: i64, completion: i64) {
        self.tokens_prompt = Some(prompt);
        self.tokens_completion = Some(completion);
        self.tokens_total = Some(prompt.saturating_add(completion));
    }

    /// Copy duration, token totals and trace id from a finished run.
    pub fn apply_metrics(&mut self, metrics: &RunMetrics) {
        self.run_id = metrics.run_id.clone();
        if let Some(ms) = metrics.duration_ms {
            self.time_ms = to_i64(ms);
        }
        match (metrics.tokens_prompt, metrics.tokens_completion) {
            (Some(p), Some(c)) => self.set_tokens(to_i64(p), to_i64(c)),
            _ => {
                self.tokens_prompt = None;
                self.tokens_completion = None;
                self.tokens_total = None;
            }
        }
        if let Some(trace_id) = &metrics.trace_id {
            self.trace_ids
                .get_or_insert_with(Vec::new)
                .push(trace_id.clone());
        }
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.get_or_insert_with(Vec::new).push(error.into());
    }

    /// Check the schema invariants. The error names the offending field.
    pub fn validate(&self) -> error::Result<()> {
        for (field, value) in [
            ("schema_version", &self.schema_version),
            ("run_id", &self.run_id),
            ("agent_name", &self.agent_name),
            ("config_hash", &self.config_hash),
        ] {
            if value.trim().is_empty() {
                return Err(ProbeError::validation(field, "must not be empty"));
            }
        }
        if self.time_ms < 0 {
            return Err(ProbeError::validation(
                "time_ms",
                format!("must be >= 0, got {}", self.time_ms),
            ));
        }
        for (field, value) in [
            ("tokens_prompt", self.tokens_prompt),
            ("tokens_completion", self.tokens_completion),
            ("tokens_total", self.tokens_total),
        ] {
            if let Some(v) = value
                && v < 0
            {
                return Err(ProbeError::validation(field, format!("must be >= 0, got {v}")));
            }
        }
        if let (Some(p), Some(c), Some(t)) =
            (self.tokens_prompt, self.tokens_completion, self.tokens_total)
            && p.checked_add(c) != Some(t)
        {
            return Err(ProbeError::validation(
                "tokens_total",
                format!("must equal tokens_prompt + tokens_completion ({p} + {c}), got {t}"),
            ));
        }
        if !is_iso8601(&self.timestamp_utc) {
            return Err(ProbeError::validation(
                "timestamp_utc",
                format!("not an ISO-8601 timestamp: '{}'", self.timestamp_utc),
            ));
        }
        Ok(())
    }

    /// Serialize as one compact JSON line (no trailing newline).
    pub fn to_json_line(&self) -> error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate one JSON line.
    pub fn from_json_line(line: &str, mode: ParseMode) -> error::Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value, mode)
    }

    /// Validate a decoded JSON value against the schema.
    pub fn from_value(value: Value, mode: ParseMode) -> error::Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(ProbeError::validation("record", "expected a JSON object"));
        };

        let unknown: Vec<String> = map
            .keys()
            .filter(|k| !is_known_field(k))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            match mode {
                ParseMode::Strict => {
                    return Err(ProbeError::validation(&unknown[0], "unknown field"));
                }
                ParseMode::Lenient => {
                    let mut moved = Map::new();
                    for key in unknown {
                        if let Some(v) = map.remove(&key) {
                            moved.insert(key, v);
                        }
                    }
                    let extra = map
                        .entry("extra")
                        .or_insert_with(|| Value::Object(Map::new()));
                    if extra.is_null() {
                        *extra = Value::Object(Map::new());
                    }
                    if let Value::Object(extra) = extra {
                        for (k, v) in moved {
                            extra.entry(k).or_insert(v);
                        }
                    }
                }
            }
        }

        if mode == ParseMode::Lenient && map.get("agent_version").is_none_or(Value::is_null) {
            map.insert(
                "agent_version".to_string(),
                Value::from(UNKNOWN_AGENT_VERSION),
            );
        }

        for &(field, kind, required) in FIELDS {
            match map.get(field) {
                None if required || mode == ParseMode::Strict => {
                    return Err(ProbeError::validation(field, "missing"));
                }
                None => {
                    let default = if field == "extra" {
                        Value::Object(Map::new())
                    } else {
                        Value::Null
                    };
                    map.insert(field.to_string(), default);
                }
                Some(v) if !kind.accepts(v, required) => {
                    return Err(ProbeError::validation(
                        field,
                        format!("expected {}, got {}", kind.describe(), json_type(v)),
                    ));
                }
                Some(_) => {}
            }
        }
        if map.get("extra").is_some_and(Value::is_null) {
            map.insert("extra".to_string(), Value::Object(Map::new()));
        }

        let record: RunRecord = serde_json::from_value(Value::Object(map))?;
        record.validate()?;
        Ok(record)
    }
}

/// How [`RunRecord::from_json_line`] treats schema drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Unknown or missing keys are validation errors.
    #[default]
    Strict,
    /// Unknown keys move into `extra`, missing optional keys become null.
    /// Required keys and invariants are still enforced.
    Lenient,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    String,
    Bool,
    Integer,
    StringList,
    Object,
    Any,
}

impl Kind {
    fn accepts(self, v: &Value, required: bool) -> bool {
        if v.is_null() {
            return !required;
        }
        match self {
            Kind::String => v.is_string(),
            Kind::Bool => v.is_boolean(),
            Kind::Integer => v.is_i64(),
            Kind::StringList => v
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Kind::Object => v.is_object(),
            Kind::Any => true,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Kind::String => "a string",
            Kind::Bool => "a boolean",
            Kind::Integer => "an integer",
            Kind::StringList => "a list of strings",
            Kind::Object => "an object",
            Kind::Any => "any value",
        }
    }
}

// (name, kind, required)
const FIELDS: &[(&str, Kind, bool)] = &[
    ("schema_version", Kind::String, true),
    ("run_id", Kind::String, true),
    ("dataset_id", Kind::String, false),
    ("item_id", Kind::String, false),
    ("agent_name", Kind::String, true),
    ("agent_version", Kind::String, true),
    ("config_hash", Kind::String, true),
    ("timestamp_utc", Kind::String, true),
    ("goal", Kind::String, true),
    ("expected", Kind::Any, false),
    ("result", Kind::Any, false),
    ("success", Kind::Bool, true),
    ("time_ms", Kind::Integer, true),
    ("tokens_prompt", Kind::Integer, false),
    ("tokens_completion", Kind::Integer, false),
    ("tokens_total", Kind::Integer, false),
    ("trace_ids", Kind::StringList, false),
    ("errors", Kind::StringList, false),
    ("agent_config", Kind::Any, false),
    ("runtime_env", Kind::Object, false),
    ("extra", Kind::Object, false),
];

fn is_known_field(name: &str) -> bool {
    FIELDS.iter().any(|(n, _, _)| *n == name)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "an integer",
        Value::Number(_) => "a float",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn is_iso8601(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Where a record was produced: crate version, OS and architecture.
pub fn runtime_env() -> Map<String, Value> {
    let mut env = Map::new();
    env.insert(
        "agentprobe_version".into(),
        Value::from(env!("CARGO_PKG_VERSION")),
    );
    env.insert("os".into(), Value::from(std::env::consts::OS));
    env.insert("arch".into(), Value::from(std::env::consts::ARCH));
    env.insert("family".into(), Value::from(std::env::consts::FAMILY));
    env
}
