use crate::plugin::chain::{Middleware, MiddlewareContext};
use crate::plugin::schema::{PluginCategory, PluginError, PluginResponse};
use async_trait::async_trait;

/// Stops the request's elapsed-time measurement and attaches it to the
/// response as `data.elapsedTimes`.
pub struct TimerMiddleware {
    subscriptions: Vec<PluginCategory>,
}

impl TimerMiddleware {
    pub fn new() -> Self {
        Self::with_subscriptions(vec![PluginCategory::Fields, PluginCategory::Task])
    }

    pub fn with_subscriptions(subscriptions: Vec<PluginCategory>) -> Self {
        Self { subscriptions }
    }
}

impl Default for TimerMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for TimerMiddleware {
    fn name(&self) -> &str {
        "timer"
    }

    fn can_handle_message(&self) -> bool {
        true
    }

    fn subscriptions(&self) -> &[PluginCategory] {
        &self.subscriptions
    }

    async fn process(
        &self,
        mut response: PluginResponse,
        ctx: &mut MiddlewareContext,
    ) -> Result<PluginResponse, PluginError> {
        ctx.elapsed_times.end();
        let elapsed = serde_json::to_value(&ctx.elapsed_times).map_err(|e| {
            PluginError::Middleware {
                name: self.name().to_string(),
                reason: e.to_string(),
            }
        })?;
        response.insert_data("elapsedTimes", elapsed);
        Ok(response)
    }
}
