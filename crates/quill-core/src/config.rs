//! Configuration resolution for Quill.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/quill/settings.json)
//! 3. Explicit config file (`--config`), merged key by key over the global one
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binaries)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Default upstream completion endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Complete Quill configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Relay server configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    /// Bearer credential for the upstream API. A relay without one still
    /// starts, but rejects every chat request.
    pub api_key: Option<String>,
    pub default_model: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    /// Upstream request timeout. Unset means no timeout.
    pub upstream_timeout_secs: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            upstream_timeout_secs: None,
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("listen_addr", &self.listen_addr)
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .finish()
    }
}

/// Session client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay base URL (e.g., "<http://127.0.0.1:8080>").
    pub relay_url: String,
    /// Path of the chat endpoint on the relay.
    pub chat_path: String,
    /// Token attached as `Authorization: Bearer` to every relay request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:8080".to_string(),
            chat_path: "/api/chat".to_string(),
            auth_token: None,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// Settings files are layered: a key set in the explicit file replaces the
/// same key from the global file, and every other key is kept.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        layers.push(global_path);
    }
    if let Some(path) = explicit {
        layers.push(path.to_path_buf());
    }

    let mut config = load_layers(&layers)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".quill").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/quill/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("quill").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Merge settings files in order, later files winning per key.
fn load_layers(paths: &[PathBuf]) -> Result<Config> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in paths {
        merge_json(&mut merged, read_config_file(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
}

fn read_config_file(path: &Path) -> Result<Value> {
    debug!(path = %path.display(), "Loading config file");
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply environment overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("QUILL_LISTEN_ADDR")
        && let Ok(addr) = val.parse()
    {
        config.relay.listen_addr = addr;
    }
    if let Some(val) = lookup("DEEPSEEK_API_URL") {
        config.relay.upstream_url = val;
    }
    if let Some(val) = lookup("DEEPSEEK_API_KEY")
        && !val.is_empty()
    {
        config.relay.api_key = Some(val);
    }
    if let Some(val) = lookup("QUILL_DEFAULT_MODEL") {
        config.relay.default_model = val;
    }
    if let Some(val) = lookup("QUILL_RELAY_URL") {
        config.client.relay_url = val;
    }
    if let Some(val) = lookup("QUILL_AUTH_TOKEN")
        && !val.is_empty()
    {
        config.client.auth_token = Some(val);
    }
}
