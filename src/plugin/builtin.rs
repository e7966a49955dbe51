//! Plugins shipped with the relay binary
//!
//! These exist so a freshly configured relay has something to route to; real
//! deployments register their own `Plugin` implementations.

use crate::config::{BuiltinKind, BuiltinPluginConfig};
use crate::plugin::schema::{
    PluginCategory, PluginError, PluginOutput, PluginRequest, PluginResponse,
};
use crate::plugin::Plugin;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const MAX_SLEEP_MS: u64 = 60_000;

/// Returns the node and extra data it was called with
pub struct EchoPlugin {
    category: PluginCategory,
    timeout: Option<Duration>,
}

impl EchoPlugin {
    pub fn new(category: PluginCategory) -> Self {
        Self {
            category,
            timeout: None,
        }
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    fn category(&self) -> PluginCategory {
        self.category
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, request: &PluginRequest) -> Result<PluginOutput, PluginError> {
        Ok(PluginOutput::Data(json!({
            "nodeData": request.node_data,
            "nodeDataList": request.node_data_list,
            "extraData": request.extra_data,
        })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SleepParams {
    duration_ms: u64,
    #[serde(default)]
    fail: bool,
}

/// Sleeps for `extraData.durationMs`, then reports how long it slept.
/// `extraData.fail = true` makes it answer with a failure message instead.
pub struct SleepPlugin {
    category: PluginCategory,
    timeout: Option<Duration>,
}

impl SleepPlugin {
    pub fn new(category: PluginCategory) -> Self {
        Self {
            category,
            timeout: None,
        }
    }
}

#[async_trait]
impl Plugin for SleepPlugin {
    fn category(&self) -> PluginCategory {
        self.category
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, request: &PluginRequest) -> Result<PluginOutput, PluginError> {
        let params: SleepParams = serde_json::from_value(request.extra_data.clone())
            .context("extraData must contain durationMs")?;

        if params.duration_ms > MAX_SLEEP_MS {
            return Err(PluginError::InvalidInput {
                reason: format!("durationMs cannot exceed {MAX_SLEEP_MS}"),
            });
        }

        tokio::time::sleep(Duration::from_millis(params.duration_ms)).await;

        if params.fail {
            return Ok(PluginOutput::Message(PluginResponse::failure(format!(
                "refused after {}ms",
                params.duration_ms
            ))));
        }
        Ok(PluginOutput::Data(json!({ "sleptMs": params.duration_ms })))
    }
}

/// Instantiate a built-in plugin from its configuration
pub fn build(config: &BuiltinPluginConfig) -> Arc<dyn Plugin> {
    let timeout = config.timeout_ms.map(Duration::from_millis);
    match config.kind {
        BuiltinKind::Echo => Arc::new(EchoPlugin {
            category: config.category,
            timeout,
        }),
        BuiltinKind::Sleep => Arc::new(SleepPlugin {
            category: config.category,
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_input() {
        let plugin = EchoPlugin::new(PluginCategory::Fields);
        let request = PluginRequest {
            identifier: "hash".to_string(),
            extra_data: json!({"prompt": "a cat"}),
            ..Default::default()
        };

        let output = plugin.execute(&request).await.unwrap();
        match output {
            PluginOutput::Data(data) => assert_eq!(data["extraData"]["prompt"], "a cat"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sleep_rejects_missing_duration() {
        let plugin = SleepPlugin::new(PluginCategory::Task);
        let request = PluginRequest::default();
        let err = plugin.execute(&request).await.unwrap_err();
        assert!(err.to_string().contains("durationMs"));
    }

    #[tokio::test]
    async fn test_sleep_failure_is_message() {
        let plugin = SleepPlugin::new(PluginCategory::Task);
        let request = PluginRequest {
            extra_data: json!({"durationMs": 1, "fail": true}),
            ..Default::default()
        };
        let output = plugin.execute(&request).await.unwrap();
        assert!(output.is_message());
    }

    #[test]
    fn test_build_from_config() {
        let plugin = build(&BuiltinPluginConfig {
            kind: BuiltinKind::Sleep,
            category: PluginCategory::Qa,
            timeout_ms: Some(250),
        });
        assert_eq!(plugin.category(), PluginCategory::Qa);
        assert_eq!(plugin.timeout(), Some(Duration::from_millis(250)));
    }
}
