//! Run configuration — the agent settings a batch is evaluated under.
//!
//! A configuration file is an arbitrary object (model, prompts, parameters)
//! in JSON, YAML or TOML. A handful of keys are understood by the built-in
//! agent; everything else is carried opaquely. The whole object, minus
//! secrets, is fingerprinted by [`config_hash`] so records produced under
//! the same settings group together.
//!
//! ```json
//! {
//!   "name": "direct",
//!   "model": "gpt-4o-mini",
//!   "api_key": "${OPENAI_API_KEY}",
//!   "temperature": 0.2,
//!   "instructions": "Answer with a single number."
//! }
//! ```

use secrecy::SecretString;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{self, ProbeError};

/// Keys that never contribute to the configuration hash, at any depth.
const SECRET_KEYS: &[&str] = &["api_key"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    values: Map<String, Value>,
}

impl RunConfig {
    /// Wrap an already-decoded value, which must be an object (or null for
    /// an empty configuration).
    pub fn from_value(value: Value) -> error::Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            other => Err(ProbeError::config(format!(
                "Configuration must be an object, got {other}"
            ))),
        }
    }

    /// Parse from JSON string.
    pub fn from_json(json: &str) -> error::Result<Self> {
        let value = serde_json::from_str(json).map_err(|e| ProbeError::Configuration {
            message: format!("Invalid JSON config: {e}"),
        })?;
        Self::from_value(value)
    }

    /// Parse from YAML string.
    #[cfg(feature = "config-yaml")]
    pub fn from_yaml(yaml: &str) -> error::Result<Self> {
        let value = serde_yaml::from_str(yaml).map_err(|e| ProbeError::Configuration {
            message: format!("Invalid YAML config: {e}"),
        })?;
        Self::from_value(value)
    }

    /// Parse from TOML string.
    #[cfg(feature = "config-toml")]
    pub fn from_toml(toml: &str) -> error::Result<Self> {
        let value = toml::from_str(toml).map_err(|e| ProbeError::Configuration {
            message: format!("Invalid TOML config: {e}"),
        })?;
        Self::from_value(value)
    }

    /// Load from a file, picking the format from the extension (JSON by default).
    pub fn from_file(path: impl AsRef<Path>) -> error::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ProbeError::Configuration {
            message: format!("Failed to read config file '{}': {e}", path.display()),
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            #[cfg(feature = "config-yaml")]
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            #[cfg(feature = "config-toml")]
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn str_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_value("name")
    }

    pub fn version(&self) -> Option<&str> {
        self.str_value("version")
    }

    pub fn model(&self) -> Option<&str> {
        self.str_value("model")
    }

    pub fn instructions(&self) -> Option<&str> {
        self.str_value("instructions")
    }

    /// Base URL with `${VAR}` references resolved.
    pub fn base_url(&self) -> Option<String> {
        self.str_value("base_url").map(resolve_env)
    }

    /// API key with `${VAR}` references resolved. Empty resolves to `None`.
    pub fn api_key(&self) -> Option<SecretString> {
        self.str_value("api_key")
            .map(resolve_env)
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.values.get("temperature").and_then(Value::as_f64)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.values
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// The configuration without secrets, as recorded and hashed.
    pub fn public_value(&self) -> Value {
        Value::Object(strip_secrets(&self.values))
    }

    /// SHA-256 fingerprint of [`RunConfig::public_value`].
    pub fn hash(&self) -> String {
        config_hash(&self.public_value())
    }
}

fn strip_secrets(values: &Map<String, Value>) -> Map<String, Value> {
    values
        .iter()
        .filter(|(k, _)| !SECRET_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), without_secrets(v)))
        .collect()
}

fn without_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(strip_secrets(map)),
        Value::Array(items) => Value::Array(items.iter().map(without_secrets).collect()),
        scalar => scalar.clone(),
    }
}

/// Resolve `${VAR}` from the process environment; other strings pass through.
pub fn resolve_env(value: &str) -> String {
    resolve_env_with(value, |name| std::env::var(name).ok())
}

/// [`resolve_env`] with an injectable lookup. Unset variables resolve to "".
pub fn resolve_env_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(stripped) = value.strip_prefix("${")
        && let Some(var_name) = stripped.strip_suffix('}')
    {
        return lookup(var_name).unwrap_or_default();
    }
    value.to_string()
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 of [`canonical_json`]. Independent of key order.
pub fn config_hash(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// First 8 characters of a hash, as used in file names.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(8) {
        Some((cut, _)) => &hash[..cut],
        None => hash,
    }
}
