//! Effective configuration with full provenance
//!
//! The effective config captures the merged configuration plus information
//! about where each value came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::PublishConfig;

/// Schema version for effective config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "plugin-publish/effective_config@1";

/// Environment variables and the config key each one sets
pub const ENV_BINDINGS: &[(&str, &str)] = &[
    ("R2_ENDPOINT_URL", "storage.endpoint_url"),
    ("R2_BUCKET_NAME", "storage.bucket"),
    ("R2_PUBLIC_URL", "storage.public_url"),
    ("R2_ACCESS_KEY_ID", "storage.access_key_id"),
    ("R2_SECRET_ACCESS_KEY", "storage.secret_access_key"),
    ("PLUGIN_DOMAIN", "plugin.domain"),
];

/// Keys that must be present and non-empty after merging
const REQUIRED_KEYS: &[&str] = &[
    "plugin.slug",
    "plugin.main_file",
    "plugin.version_constant",
    "plugin.domain",
    "storage.bucket",
    "storage.public_url",
];

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &["secret", "access_key", "password", "token"];

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Origin of this source
    pub origin: ConfigOrigin,

    /// File path (None for builtin/env/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/env/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Environment variables that contributed (env only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

impl ConfigSource {
    fn new(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
            variables: Vec::new(),
        }
    }
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object (unredacted)
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

/// Build the environment layer from `(name, value)` pairs.
///
/// Only names in [`ENV_BINDINGS`] with non-empty values contribute. Returns
/// the layer and the names that were used.
pub fn env_layer<I>(vars: I) -> (Value, Vec<String>)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut layer = Value::Object(Map::new());
    let mut used = Vec::new();

    for (name, value) in vars {
        let Some((_, key)) = ENV_BINDINGS.iter().find(|(env, _)| *env == name) else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        set_path(&mut layer, key, Value::String(value));
        used.push(name);
    }

    used.sort();
    used.dedup();
    (layer, used)
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };

    let mut current = root;
    for part in parents {
        current = ensure_object(current)
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current).insert(last.to_string(), value);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

impl EffectiveConfig {
    /// Build effective config from layers.
    ///
    /// `file` is skipped when it does not exist. `env` is the process
    /// environment (or a stand-in); it is never read here directly.
    pub fn build<I>(
        file: Option<&Path>,
        env: I,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource::new(ConfigOrigin::Builtin));

        // Layer 2: Config file
        if let Some(path) = file {
            if path.exists() {
                let (value, digest) = Self::load_toml_file(path)?;
                layers.push(value);
                sources.push(ConfigSource {
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                    ..ConfigSource::new(ConfigOrigin::File)
                });
            } else {
                tracing::debug!(path = %path.display(), "config file not found, skipping");
            }
        }

        // Layer 3: Environment
        let (env_value, variables) = env_layer(env);
        if !variables.is_empty() {
            layers.push(env_value);
            sources.push(ConfigSource {
                variables,
                ..ConfigSource::new(ConfigOrigin::Env)
            });
        }

        // Layer 4: CLI overrides
        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource::new(ConfigOrigin::Cli));
        }

        let merged = merge_layers(layers);
        Self::validate_config(&merged)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let digest = hex::encode(Sha256::digest(&bytes));

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Validate configuration values
    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| {
                lookup(config, key)
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        // lock_timeout_seconds must be in (0, 3600]
        if let Some(timeout) = config.get("lock_timeout_seconds") {
            match timeout.as_u64() {
                Some(t) if t > 0 && t <= 3600 => {}
                _ => {
                    return Err(ConfigError::ValidationError(
                        "lock_timeout_seconds must be in (0, 3600]".to_string(),
                    ))
                }
            }
        }

        if let Some(policy) = lookup(config, "manifest.on_corrupt").and_then(|v| v.as_str()) {
            if policy != "fail" && policy != "reset" {
                return Err(ConfigError::ValidationError(format!(
                    "manifest.on_corrupt must be \"fail\" or \"reset\", got {:?}",
                    policy
                )));
            }
        }

        Ok(())
    }

    /// Typed settings
    pub fn settings(&self) -> Result<PublishConfig, ConfigError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Copy of the merged config with secrets replaced, plus the redacted key paths
    pub fn redacted(&self) -> (Value, Vec<String>) {
        let mut value = self.config.clone();
        let mut redactions = Vec::new();
        redact_recursive(&mut value, String::new(), &mut redactions);
        (value, redactions)
    }

    /// Redacted report as pretty JSON
    pub fn to_redacted_json(&self) -> Result<String, serde_json::Error> {
        let (config, redactions) = self.redacted();
        serde_json::to_string_pretty(&serde_json::json!({
            "schema_version": self.schema_version,
            "schema_id": self.schema_id,
            "created_at": self.created_at,
            "config": config,
            "sources": self.sources,
            "redactions": redactions,
        }))
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let current_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };

                let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));

                if is_secret && !val.is_object() && !val.is_array() {
                    *val = Value::String("[REDACTED]".to_string());
                    redactions.push(current_path);
                } else {
                    redact_recursive(val, current_path, redactions);
                }
            }
        }
        Value::Array(arr) => {
            for (i, val) in arr.iter_mut().enumerate() {
                redact_recursive(val, format!("{}[{}]", path, i), redactions);
            }
        }
        _ => {}
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
