//! Provider configuration.
//!
//! Resolution order (lowest to highest priority):
//! 1. `application.yaml` (base)
//! 2. `application-{profile}.yaml` (profile override)
//! 3. `.env` / `.env.{profile}` files (loaded into the process environment,
//!    never overwriting variables that are already set)
//! 4. Environment variables: `ROWKIT_API_KEY` overrides `rowkit.api_key`
//!
//! Profile is determined by: `ROWKIT_PROFILE` env var > argument.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const DEFAULT_RPC_FUNCTION: &str = "exec_sql";

const PREFIX: &str = "rowkit";
const KEYS: &[&str] = &[
    "url",
    "api_key",
    "schema",
    "default_page_size",
    "rpc_function",
    "request_timeout_secs",
    "realtime_join_timeout_secs",
];

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// A required key was not found in any source.
    NotFound(String),
    /// The value could not be converted to the expected type.
    Invalid { key: String, message: String },
    /// An I/O or YAML parsing error occurred while loading config files.
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Config key not found: {key}"),
            ConfigError::Invalid { key, message } => {
                write!(f, "Invalid config value for '{key}': {message}")
            }
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Connection descriptor for a PostgREST + Realtime backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PostgrestConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    pub api_key: String,
    pub schema: String,
    /// Page size used when an offset is given without a limit.
    pub default_page_size: u64,
    /// RPC function that executes raw statements.
    pub rpc_function: String,
    pub request_timeout_secs: u64,
    pub realtime_join_timeout_secs: u64,
}

impl PostgrestConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            rpc_function: DEFAULT_RPC_FUNCTION.to_string(),
            request_timeout_secs: 30,
            realtime_join_timeout_secs: 10,
        }
    }

    /// Load configuration for the given profile from the working directory.
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."), profile)
    }

    /// Load configuration for the given profile from `dir`.
    pub fn load_from(dir: &Path, profile: &str) -> Result<Self, ConfigError> {
        let active_profile =
            std::env::var("ROWKIT_PROFILE").unwrap_or_else(|_| profile.to_string());

        let mut values = HashMap::new();
        load_yaml_file(&dir.join("application.yaml"), &mut values)?;
        load_yaml_file(&dir.join(format!("application-{active_profile}.yaml")), &mut values)?;

        let _ = dotenvy::from_path(dir.join(".env"));
        let _ = dotenvy::from_path(dir.join(format!(".env.{active_profile}")));

        for key in KEYS {
            let env_key = format!("{}_{}", PREFIX, key).to_uppercase();
            if let Ok(value) = std::env::var(&env_key) {
                values.insert(format!("{PREFIX}.{key}"), value);
            }
        }

        Self::from_values(&values)
    }

    /// Create a config from a YAML string (useful for testing).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        load_yaml_str(yaml, &mut values)?;
        Self::from_values(&values)
    }

    fn from_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            values
                .get(&format!("{PREFIX}.{key}"))
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::NotFound(format!("{PREFIX}.{key}")))
        };
        let mut config = Self::new(required("url")?, required("api_key")?);

        if let Some(schema) = values.get(&format!("{PREFIX}.schema")) {
            config.schema = schema.clone();
        }
        if let Some(function) = values.get(&format!("{PREFIX}.rpc_function")) {
            config.rpc_function = function.clone();
        }
        if let Some(size) = parse_u64(values, "default_page_size")? {
            if size == 0 {
                return Err(ConfigError::Invalid {
                    key: format!("{PREFIX}.default_page_size"),
                    message: "must be positive".into(),
                });
            }
            config.default_page_size = size;
        }
        if let Some(secs) = parse_u64(values, "request_timeout_secs")? {
            config.request_timeout_secs = secs;
        }
        if let Some(secs) = parse_u64(values, "realtime_join_timeout_secs")? {
            config.realtime_join_timeout_secs = secs;
        }

        url::Url::parse(&config.url).map_err(|e| ConfigError::Invalid {
            key: format!("{PREFIX}.url"),
            message: e.to_string(),
        })?;
        Ok(config)
    }

    /// Base URL of the REST endpoint (`{url}/rest/v1`).
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url.trim_end_matches('/'))
    }

    /// Websocket URL of the realtime endpoint, with the API key encoded
    /// into the query string.
    pub fn realtime_url(&self) -> Result<url::Url, ConfigError> {
        let base = self.url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        let mut url = url::Url::parse(&format!("{ws_base}/realtime/v1/websocket")).map_err(|e| {
            ConfigError::Invalid {
                key: format!("{PREFIX}.url"),
                message: e.to_string(),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn realtime_join_timeout(&self) -> Duration {
        Duration::from_secs(self.realtime_join_timeout_secs)
    }
}

fn parse_u64(values: &HashMap<String, String>, key: &str) -> Result<Option<u64>, ConfigError> {
    let full_key = format!("{PREFIX}.{key}");
    match values.get(&full_key) {
        None => Ok(None),
        Some(raw) => raw.parse::<u64>().map(Some).map_err(|e| ConfigError::Invalid {
            key: full_key,
            message: e.to_string(),
        }),
    }
}

fn load_yaml_file(path: &Path, values: &mut HashMap<String, String>) -> Result<(), ConfigError> {
    if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        load_yaml_str(&content, values)?;
    }
    Ok(())
}

fn load_yaml_str(content: &str, values: &mut HashMap<String, String>) -> Result<(), ConfigError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
    flatten_yaml("", &yaml, values);
    Ok(())
}

/// Flatten a YAML tree into dot-separated keys with scalar string values.
fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key_str = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => format!("{other:?}"),
                };
                let full_key = if prefix.is_empty() {
                    key_str
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(&full_key, v, out);
            }
        }
        serde_yaml::Value::String(s) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), s.clone());
        }
        serde_yaml::Value::Number(n) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), n.to_string());
        }
        serde_yaml::Value::Bool(b) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), b.to_string());
        }
        _ => {}
    }
}
