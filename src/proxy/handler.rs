use crate::error::ErrorKind;
use crate::plugin::schema::{PluginRequest, PluginResponse};
use crate::plugin::RegisteredPlugin;
use crate::queue::RequestQueue;
use crate::state::{AppState, Metrics, RequestTimer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Inbound operation for one plugin identifier: verify the caller's identity
/// hash, enqueue, wait for the worker and hand back the correlated response.
pub struct RequestHandler {
    plugin: Arc<RegisteredPlugin>,
    queue: Arc<RequestQueue>,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
}

impl RequestHandler {
    pub fn new(state: &AppState, plugin: Arc<RegisteredPlugin>) -> Self {
        Self {
            plugin,
            queue: state.queue.clone(),
            metrics: state.metrics.clone(),
            request_timeout: state.config.queue.request_timeout(),
        }
    }

    pub fn plugin(&self) -> &Arc<RegisteredPlugin> {
        &self.plugin
    }

    /// Always yields a well-formed response; failures are encoded in it
    pub async fn handle(&self, request: PluginRequest) -> PluginResponse {
        let timer = RequestTimer::new(self.metrics.clone());

        let current = self.plugin.hash();
        if !current.matches(&request.identifier) {
            self.metrics.record_identity_mismatch();
            warn!(
                identifier = %self.plugin.identifier(),
                incoming = %request.identifier,
                "Rejected request with stale identifier hash"
            );
            timer.fail();
            return PluginResponse::from_kind(
                ErrorKind::IdentityMismatch,
                format!(
                    "current hash is {} but incoming identifier is {}",
                    current, request.identifier
                ),
            );
        }

        let response = self.dispatch(request).await;
        if response.success {
            timer.finish();
        } else {
            timer.fail();
        }
        response
    }

    async fn dispatch(&self, request: PluginRequest) -> PluginResponse {
        let id = match self.queue.push(request, self.plugin.clone()) {
            Ok(id) => id,
            Err(e) => return PluginResponse::from_kind(ErrorKind::from(&e), e),
        };
        self.metrics.set_pending_entries(self.queue.pending());

        // dropping this (completion, timeout or a cancelled caller) removes the entry
        let _guard = self.queue.guard(id);

        match timeout(self.request_timeout, self.queue.wait(id)).await {
            Ok(Ok(())) => match self.queue.pop_response(id) {
                Some(response) => {
                    debug!(request_id = %id, success = response.success, "Returning response");
                    response
                }
                // complete writes the slot before waking us and only this
                // handler pops `id`, so this needs an eviction between wait and pop
                None => PluginResponse::from_kind(ErrorKind::ResponseLost, id),
            },
            Ok(Err(e)) => PluginResponse::from_kind(ErrorKind::from(&e), e),
            Err(_) => {
                warn!(
                    request_id = %id,
                    identifier = %self.plugin.identifier(),
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Gave up waiting for plugin response"
                );
                PluginResponse::from_kind(
                    ErrorKind::Timeout,
                    format!(
                        "no response within {}ms",
                        self.request_timeout.as_millis()
                    ),
                )
            }
        }
    }
}
