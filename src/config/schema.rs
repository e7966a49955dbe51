use crate::plugin::schema::PluginCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub middlewares: MiddlewareConfig,
    #[serde(default = "default_plugins")]
    pub plugins: BTreeMap<String, BuiltinPluginConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Production mode silences per-route registration logs
    #[serde(default)]
    pub prod: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Number of worker tasks draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long a caller waits for its response
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Default bound for a single plugin execution
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_ms: u64,
    /// Age after which an unclaimed entry is evicted
    #[serde(default = "default_entry_ttl")]
    pub entry_ttl_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareConfig {
    #[serde(default = "default_enabled")]
    pub timer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinKind {
    Echo,
    Sleep,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltinPluginConfig {
    pub kind: BuiltinKind,
    #[serde(default = "default_category")]
    pub category: PluginCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_workers() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    60_000
}

fn default_execution_timeout() -> u64 {
    30_000
}

fn default_entry_ttl() -> u64 {
    300_000
}

fn default_sweep_interval() -> u64 {
    30_000
}

fn default_enabled() -> bool {
    true
}

fn default_category() -> PluginCategory {
    PluginCategory::Fields
}

fn default_plugins() -> BTreeMap<String, BuiltinPluginConfig> {
    let mut plugins = BTreeMap::new();
    plugins.insert(
        "echo".to_string(),
        BuiltinPluginConfig {
            kind: BuiltinKind::Echo,
            category: PluginCategory::Fields,
            timeout_ms: None,
        },
    );
    plugins
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            middlewares: MiddlewareConfig::default(),
            plugins: default_plugins(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            prod: false,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            request_timeout_ms: default_request_timeout(),
            execution_timeout_ms: default_execution_timeout(),
            entry_ttl_ms: default_entry_ttl(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            timer: default_enabled(),
        }
    }
}

impl QueueConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_millis(self.entry_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
