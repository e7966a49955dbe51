use crate::queue::RequestQueue;
use crate::state::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Periodically evict queue entries older than `ttl`.
///
/// Catches entries whose caller vanished without dropping its guard, and
/// completed responses nobody popped.
pub fn spawn_sweeper(
    queue: Arc<RequestQueue>,
    metrics: Arc<Metrics>,
    interval: Duration,
    ttl: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let removed = queue.sweep(ttl);
                    if removed > 0 {
                        info!("Sweeper evicted {} expired queue entries", removed);
                        metrics.record_swept(removed);
                    }
                    metrics.set_pending_entries(queue.pending());
                }
            }
        }
        debug!("Sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::schema::{PluginCategory, PluginError, PluginOutput, PluginRequest};
    use crate::plugin::{Plugin, PluginRegistry};
    use async_trait::async_trait;

    struct IdlePlugin;

    #[async_trait]
    impl Plugin for IdlePlugin {
        fn category(&self) -> PluginCategory {
            PluginCategory::Markdown
        }

        async fn execute(&self, _request: &PluginRequest) -> Result<PluginOutput, PluginError> {
            Ok(PluginOutput::Data(serde_json::Value::Null))
        }
    }

    #[tokio::test]
    async fn test_sweeper_evicts_orphans() {
        let (queue, _jobs) = RequestQueue::new();
        let queue = Arc::new(queue);
        let metrics = Arc::new(Metrics::new());
        let mut registry = PluginRegistry::new();
        let plugin = registry.register("idle", Arc::new(IdlePlugin)).unwrap().clone();

        let id = queue.push(PluginRequest::default(), plugin).unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_sweeper(
            queue.clone(),
            metrics.clone(),
            Duration::from_millis(10),
            Duration::from_millis(30),
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!queue.contains(id));
        assert_eq!(metrics.swept_entries.get(), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
