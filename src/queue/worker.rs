//! Worker pool draining the request queue
//!
//! Every job ends with exactly one `RequestQueue::complete` call. Plugin
//! errors, panics, timeouts and middleware failures are all turned into a
//! `success: false` response first, so no waiter is left suspended.

use crate::error::ErrorKind;
use crate::plugin::chain::{MiddlewareChain, MiddlewareContext};
use crate::plugin::schema::{PluginError, PluginOutput, PluginRequest, PluginResponse};
use crate::plugin::RegisteredPlugin;
use crate::queue::{Job, JobReceiver, RequestQueue};
use crate::state::Metrics;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Clone)]
pub struct Worker {
    queue: Arc<RequestQueue>,
    chain: Arc<MiddlewareChain>,
    metrics: Arc<Metrics>,
    execution_timeout: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<RequestQueue>,
        chain: Arc<MiddlewareChain>,
        metrics: Arc<Metrics>,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            chain,
            metrics,
            execution_timeout,
        }
    }

    /// Process one job and complete its queue entry
    pub async fn process(&self, job: Job) {
        let Job {
            id,
            request,
            plugin,
            mut elapsed_times,
        } = job;

        let span = tracing::info_span!(
            "plugin_execution",
            request_id = %id,
            identifier = %plugin.identifier(),
            category = %plugin.category(),
        );

        async move {
            elapsed_times.start();
            let start = Instant::now();

            let response = match self.execute(&plugin, &request).await {
                Ok(output) => {
                    let mut ctx = MiddlewareContext {
                        request_id: id,
                        identifier: plugin.identifier().to_string(),
                        category: plugin.category(),
                        elapsed_times,
                    };
                    self.post_process(output, &mut ctx).await
                }
                Err(e) => {
                    error!(error = %e, "Plugin execution failed");
                    PluginResponse::from_kind(ErrorKind::ExecutionFailure, e)
                }
            };

            let duration = start.elapsed();
            self.metrics.record_plugin_execution(duration);
            debug!(
                duration_ms = duration.as_millis() as u64,
                success = response.success,
                "Request processed"
            );

            if !self.queue.complete(id, response) {
                debug!("Caller stopped waiting before the response was ready");
            }
            self.metrics.set_pending_entries(self.queue.pending());
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        plugin: &RegisteredPlugin,
        request: &PluginRequest,
    ) -> Result<PluginOutput, PluginError> {
        let limit = plugin.plugin().timeout().unwrap_or(self.execution_timeout);
        let run = AssertUnwindSafe(plugin.plugin().execute(request)).catch_unwind();

        match timeout(limit, run).await {
            Ok(Ok(result)) => {
                if result.is_err() {
                    self.metrics.record_plugin_error();
                }
                result
            }
            Ok(Err(panic)) => {
                self.metrics.record_plugin_error();
                Err(PluginError::Panicked {
                    reason: panic_message(panic.as_ref()),
                })
            }
            Err(_) => {
                self.metrics.record_plugin_timeout();
                warn!(timeout_ms = limit.as_millis() as u64, "Plugin execution timed out");
                Err(PluginError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    async fn post_process(
        &self,
        output: PluginOutput,
        ctx: &mut MiddlewareContext,
    ) -> PluginResponse {
        match AssertUnwindSafe(self.chain.apply(output, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.metrics.record_plugin_error();
                PluginResponse::from_kind(ErrorKind::ExecutionFailure, e)
            }
            Err(panic) => {
                self.metrics.record_plugin_error();
                let reason = panic_message(panic.as_ref());
                error!(reason = %reason, "Middleware panicked");
                PluginResponse::from_kind(
                    ErrorKind::ExecutionFailure,
                    format!("Middleware panicked: {reason}"),
                )
            }
        }
    }

    /// Process jobs until the channel closes.
    ///
    /// Shutdown closes the channel to new jobs; jobs already queued are still
    /// processed so their callers get an answer.
    pub async fn run(
        self,
        worker_id: usize,
        jobs: Arc<Mutex<JobReceiver>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        debug!(worker_id, "Worker started");
        let mut draining = false;
        loop {
            let job = if draining {
                jobs.lock().await.recv().await
            } else {
                tokio::select! {
                    _ = shutdown.recv() => {
                        jobs.lock().await.close();
                        draining = true;
                        continue;
                    }
                    job = async { jobs.lock().await.recv().await } => job,
                }
            };
            match job {
                Some(job) => self.process(job).await,
                None => break,
            }
        }
        debug!(worker_id, "Worker stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handles of the spawned worker tasks
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers sharing one job receiver
    pub fn spawn(
        worker: Worker,
        jobs: JobReceiver,
        size: usize,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let jobs = Arc::new(Mutex::new(jobs));
        let handles = (0..size.max(1))
            .map(|worker_id| {
                tokio::spawn(
                    worker
                        .clone()
                        .run(worker_id, jobs.clone(), shutdown.subscribe()),
                )
            })
            .collect::<Vec<_>>();

        info!("Started {} queue workers", handles.len());
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::plugin::schema::PluginCategory;
    use crate::plugin::{Middleware, Plugin, PluginRegistry, TimerMiddleware};
    use async_trait::async_trait;
    use serde_json::json;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Hang,
        Slow,
    }

    struct ScriptedPlugin(Behaviour);

    #[async_trait]
    impl Plugin for ScriptedPlugin {
        fn category(&self) -> PluginCategory {
            PluginCategory::Fields
        }

        async fn execute(&self, request: &PluginRequest) -> Result<PluginOutput, PluginError> {
            match self.0 {
                Behaviour::Succeed => Ok(PluginOutput::Data(request.extra_data.clone())),
                Behaviour::Fail => Err(anyhow::anyhow!("model not loaded").into()),
                Behaviour::Panic => panic!("plugin exploded"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(PluginOutput::Data(json!({})))
                }
                Behaviour::Slow => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(PluginOutput::Data(json!({})))
                }
            }
        }
    }

    struct Harness {
        queue: Arc<RequestQueue>,
        worker: Worker,
        jobs: JobReceiver,
        plugin: Arc<RegisteredPlugin>,
        metrics: Arc<Metrics>,
    }

    enum Fault {
        Error,
        Panic,
    }

    struct FaultyMiddleware(Fault);

    #[async_trait]
    impl Middleware for FaultyMiddleware {
        fn name(&self) -> &str {
            "faulty"
        }

        fn can_handle_message(&self) -> bool {
            true
        }

        fn subscriptions(&self) -> &[PluginCategory] {
            &[PluginCategory::Fields]
        }

        async fn process(
            &self,
            _response: PluginResponse,
            _ctx: &mut MiddlewareContext,
        ) -> Result<PluginResponse, PluginError> {
            match self.0 {
                Fault::Error => Err(anyhow::anyhow!("schema rejected").into()),
                Fault::Panic => panic!("middleware exploded"),
            }
        }
    }

    fn harness(behaviour: Behaviour) -> Harness {
        harness_with(behaviour, Arc::new(TimerMiddleware::new()))
    }

    fn harness_with(behaviour: Behaviour, middleware: Arc<dyn Middleware>) -> Harness {
        let (queue, jobs) = RequestQueue::new();
        let queue = Arc::new(queue);
        let mut chain = MiddlewareChain::new();
        chain.register(middleware);
        let metrics = Arc::new(Metrics::new());
        let worker = Worker::new(
            queue.clone(),
            Arc::new(chain),
            metrics.clone(),
            Duration::from_millis(200),
        );

        let mut registry = PluginRegistry::new();
        let plugin = registry
            .register("scripted", Arc::new(ScriptedPlugin(behaviour)))
            .unwrap()
            .clone();

        Harness {
            queue,
            worker,
            jobs,
            plugin,
            metrics,
        }
    }

    async fn run_one(h: &mut Harness, request: PluginRequest) -> PluginResponse {
        let id = h.queue.push(request, h.plugin.clone()).unwrap();
        let job = h.jobs.recv().await.unwrap();
        h.worker.process(job).await;
        h.queue.wait(id).await.unwrap();
        h.queue.pop_response(id).unwrap()
    }

    #[tokio::test]
    async fn test_success_runs_middlewares() {
        let mut h = harness(Behaviour::Succeed);
        let request = PluginRequest {
            extra_data: json!({"text": "hello"}),
            ..Default::default()
        };

        let response = run_one(&mut h, request).await;
        assert!(response.success);
        assert_eq!(response.data["text"], "hello");
        assert!(response.data["elapsedTimes"]["executing"].is_number());
        assert_eq!(h.metrics.plugin_executions_total.get(), 1);
    }

    #[tokio::test]
    async fn test_error_becomes_failure_response() {
        let mut h = harness(Behaviour::Fail);
        let response = run_one(&mut h, PluginRequest::default()).await;

        assert!(!response.success);
        assert!(response.message.contains("model not loaded"));
        assert!(response.data.get("elapsedTimes").is_none());
        assert_eq!(h.metrics.plugin_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_response() {
        let mut h = harness(Behaviour::Panic);
        let response = run_one(&mut h, PluginRequest::default()).await;

        assert!(!response.success);
        assert!(response.message.contains("plugin exploded"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure_response() {
        let mut h = harness(Behaviour::Hang);
        let response = run_one(&mut h, PluginRequest::default()).await;

        assert!(!response.success);
        assert!(response.message.contains("timed out after 200ms"));
        assert_eq!(h.metrics.plugin_timeouts_total.get(), 1);
    }

    #[tokio::test]
    async fn test_middleware_error_becomes_failure_response() {
        let mut h = harness_with(
            Behaviour::Succeed,
            Arc::new(FaultyMiddleware(Fault::Error)),
        );
        let response = run_one(&mut h, PluginRequest::default()).await;

        assert!(!response.success);
        assert!(response.message.contains("faulty"));
        assert!(response.message.contains("schema rejected"));
        assert!(h.queue.is_empty());
        assert_eq!(h.metrics.plugin_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn test_middleware_panic_becomes_failure_response() {
        let mut h = harness_with(
            Behaviour::Succeed,
            Arc::new(FaultyMiddleware(Fault::Panic)),
        );
        let response = run_one(&mut h, PluginRequest::default()).await;

        assert!(!response.success);
        assert!(response.message.contains("Middleware panicked"));
        assert!(response.message.contains("middleware exploded"));
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_discarded_entry_completes_silently() {
        let mut h = harness(Behaviour::Succeed);
        let id = h.queue.push(PluginRequest::default(), h.plugin.clone()).unwrap();
        h.queue.discard(id);

        let job = h.jobs.recv().await.unwrap();
        h.worker.process(job).await;
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_pool_drains_and_stops_on_shutdown() {
        let h = harness(Behaviour::Succeed);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(h.worker.clone(), h.jobs, 3, &shutdown_tx);
        assert_eq!(pool.len(), 3);

        let ids: Vec<_> = (0..10)
            .map(|_| h.queue.push(PluginRequest::default(), h.plugin.clone()).unwrap())
            .collect();
        for id in ids {
            h.queue.wait(id).await.unwrap();
            assert!(h.queue.pop_response(id).unwrap().success);
        }

        shutdown_tx.send(()).unwrap();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_shutdown_processes_queued_jobs() {
        let h = harness(Behaviour::Slow);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(h.worker.clone(), h.jobs, 1, &shutdown_tx);

        let ids: Vec<_> = (0..6)
            .map(|_| h.queue.push(PluginRequest::default(), h.plugin.clone()).unwrap())
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown_tx.send(()).unwrap();
        pool.join().await;

        for id in ids {
            h.queue.wait(id).await.unwrap();
            assert!(h.queue.pop_response(id).unwrap().success);
        }
        assert!(h.queue.is_empty());
        assert_eq!(h.queue.pending(), 0);

        // the channel is closed once the workers are gone
        assert_eq!(
            h.queue.push(PluginRequest::default(), h.plugin.clone()).unwrap_err(),
            QueueError::Closed
        );
    }
}
