use crate::config::Config;
use crate::error::Result;
use crate::plugin::{builtin, MiddlewareChain, PluginRegistry, TimerMiddleware};
use crate::queue::{spawn_sweeper, JobReceiver, RequestQueue, Worker, WorkerPool};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub mod metrics;

pub use metrics::{Metrics, RequestTimer};

/// Everything a request needs, constructed once at startup and shared by `Arc`
pub struct AppState {
    pub config: Config,
    pub registry: Arc<PluginRegistry>,
    pub chain: Arc<MiddlewareChain>,
    pub queue: Arc<RequestQueue>,
    pub metrics: Arc<Metrics>,
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

/// Background tasks started by [`AppState::start`]
pub struct BackgroundTasks {
    pub workers: WorkerPool,
    pub sweeper: JoinHandle<()>,
}

impl BackgroundTasks {
    pub async fn join(self) {
        self.workers.join().await;
        if let Err(e) = self.sweeper.await {
            tracing::error!("Sweeper task failed: {}", e);
        }
    }
}

impl AppState {
    pub fn new(
        config: Config,
        registry: PluginRegistry,
        chain: MiddlewareChain,
    ) -> (Arc<Self>, JobReceiver) {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(16);
        let (queue, jobs) = RequestQueue::new();

        let state = Arc::new(Self {
            config,
            registry: Arc::new(registry),
            chain: Arc::new(chain),
            queue: Arc::new(queue),
            metrics: Arc::new(Metrics::new()),
            shutdown_tx,
        });

        (state, jobs)
    }

    /// Build the registry and middleware chain described by `config`
    pub fn from_config(config: Config) -> Result<(Arc<Self>, JobReceiver)> {
        let mut registry = PluginRegistry::new();
        for (identifier, plugin_config) in &config.plugins {
            registry.register(identifier.clone(), builtin::build(plugin_config))?;
        }

        let mut chain = MiddlewareChain::new();
        if config.middlewares.timer {
            chain.register(Arc::new(TimerMiddleware::new()));
        }

        info!(
            "Loaded {} plugins and {} middlewares",
            registry.len(),
            chain.len()
        );
        Ok(Self::new(config, registry, chain))
    }

    /// Spawn the worker pool and the sweeper
    pub fn start(&self, jobs: JobReceiver) -> BackgroundTasks {
        let queue_config = &self.config.queue;
        let worker = Worker::new(
            self.queue.clone(),
            self.chain.clone(),
            self.metrics.clone(),
            queue_config.execution_timeout(),
        );
        let workers = WorkerPool::spawn(worker, jobs, queue_config.workers, &self.shutdown_tx);
        let sweeper = spawn_sweeper(
            self.queue.clone(),
            self.metrics.clone(),
            queue_config.sweep_interval(),
            queue_config.entry_ttl(),
            self.shutdown_tx.subscribe(),
        );

        BackgroundTasks { workers, sweeper }
    }

    pub fn shutdown(&self) {
        // no receivers simply means nothing is running yet
        let _ = self.shutdown_tx.send(());
    }
}
