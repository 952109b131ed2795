use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/v1";
pub const DEFAULT_REFRESH_PATH: &str = "/user/refresh-tokens";
pub const DEFAULT_CONFIG_PATH: &str = "configs/default.toml";

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// API root every request path is joined onto.
    pub base_url: String,
    /// Endpoint that rotates the session cookies.
    pub refresh_path: String,
    /// Paths whose 401 is returned to the caller instead of triggering a refresh.
    pub auth_boundary_paths: Vec<String>,
    /// Optional per-request timeout; unset means the transport never times out.
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            auth_boundary_paths: vec![
                "/user/login".to_string(),
                "/user/signup".to_string(),
                DEFAULT_REFRESH_PATH.to_string(),
            ],
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// How long a fetched entry is served without refetching.
    pub stale_time_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Broadcast buffer per subscriber.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub events: EventsConfig,
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading client config at {path}"))?;
    let raw: toml::Value = toml::from_str(&content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(&content)?;
    Ok(cfg)
}

impl Config {
    /// Resolve the config file (`SBRAIN_CONFIG`, else `configs/default.toml` when present,
    /// else built-in defaults) and overlay environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("SBRAIN_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
                load_config(DEFAULT_CONFIG_PATH)?
            }
            Err(_) => Config::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(base) = std::env::var("SBRAIN_BASE_URL") {
            let base = base.trim();
            if !base.is_empty() {
                self.http.base_url = base.to_string();
            }
        }
        if let Ok(raw) = std::env::var("SBRAIN_REQUEST_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.http.request_timeout_secs = Some(secs),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid SBRAIN_REQUEST_TIMEOUT_SECS"),
            }
        }
    }
}
