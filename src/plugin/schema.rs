//! Plugin I/O schema definitions and serialization
//!
//! Requests and responses travel as camelCase JSON, matching what the
//! front-end sends to `POST /{identifier}`.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Category tag used to select which middlewares apply to a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PluginCategory {
    /// Plugin renders a form of fields and returns a fields-shaped payload
    Fields,
    /// Fields plugin with a submit action
    Task,
    TextArea,
    Qa,
    Chat,
    Markdown,
}

impl PluginCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginCategory::Fields => "fields",
            PluginCategory::Task => "task",
            PluginCategory::TextArea => "textArea",
            PluginCategory::Qa => "qa",
            PluginCategory::Chat => "chat",
            PluginCategory::Markdown => "markdown",
        }
    }
}

impl std::fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a plugin is reached. Only `Http` plugins get an inbound route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginTransport {
    Http,
    Socket,
}

/// Caller-supplied invocation payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRequest {
    /// Identity hash the caller believes is current for the target plugin
    pub identifier: String,

    /// Data of the node the plugin was triggered on
    #[serde(default)]
    pub node_data: Value,

    /// Data of every selected node, for multi-selection plugins
    #[serde(default)]
    pub node_data_list: Vec<Value>,

    /// Plugin-specific parameters
    #[serde(default)]
    pub extra_data: Value,
}

/// Structured reply handed back to the caller, success or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl PluginResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            message: String::new(),
            data: normalize_data(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Object(Map::new()),
        }
    }

    /// Failure response for one of the locally resolved error kinds
    pub fn from_kind(kind: ErrorKind, detail: impl std::fmt::Display) -> Self {
        let message = match kind {
            ErrorKind::IdentityMismatch => {
                format!("internal error occurred: identifier mismatch, {detail}")
            }
            ErrorKind::ResponseLost => format!(
                "internal error occurred: cannot find response after request is processed ({detail})"
            ),
            ErrorKind::ExecutionFailure => detail.to_string(),
            ErrorKind::NotFound => format!("internal error occurred: {detail}"),
            ErrorKind::Timeout => format!("request timed out: {detail}"),
        };
        Self::failure(message)
    }

    /// Insert a key into `data`, converting a non-object payload into
    /// `{"value": <payload>}` first.
    pub fn insert_data(&mut self, key: impl Into<String>, value: Value) {
        let mut map = into_object(std::mem::take(&mut self.data));
        map.insert(key.into(), value);
        self.data = Value::Object(map);
    }
}

fn normalize_data(data: Value) -> Value {
    Value::Object(into_object(data))
}

fn into_object(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Raw output of a plugin before the middleware chain runs
#[derive(Debug, Clone, PartialEq)]
pub enum PluginOutput {
    /// Payload to be wrapped in a successful response
    Data(Value),
    /// Response the plugin formed itself
    Message(PluginResponse),
}

impl PluginOutput {
    pub fn is_message(&self) -> bool {
        matches!(self, PluginOutput::Message(_))
    }

    pub fn into_response(self) -> PluginResponse {
        match self {
            PluginOutput::Data(data) => PluginResponse::ok(data),
            PluginOutput::Message(response) => response,
        }
    }
}

/// Wall-clock timing of one request through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElapsedTimes {
    pub create_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds spent queued before a worker picked the request up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<f64>,
    /// Seconds between pickup and the end of the measurement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executing: Option<f64>,
}

impl ElapsedTimes {
    pub fn new() -> Self {
        Self {
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            pending: None,
            executing: None,
        }
    }

    pub fn start(&mut self) {
        let now = Utc::now();
        self.pending = Some(seconds_between(self.create_time, now));
        self.start_time = Some(now);
    }

    pub fn end(&mut self) {
        let now = Utc::now();
        let started = *self.start_time.get_or_insert(self.create_time);
        self.executing = Some(seconds_between(started, now));
        self.end_time = Some(now);
    }
}

impl Default for ElapsedTimes {
    fn default() -> Self {
        Self::new()
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Plugin-specific errors
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin execution timed out
    #[error("Plugin timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Plugin panicked while executing
    #[error("Plugin panicked: {reason}")]
    Panicked { reason: String },

    /// Plugin rejected its input
    #[error("Invalid plugin input: {reason}")]
    InvalidInput { reason: String },

    /// Middleware failed while post-processing a response
    #[error("Middleware '{name}' failed: {reason}")]
    Middleware { name: String, reason: String },

    /// Any other execution failure raised by plugin code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
