//! Request/response correlation queue
//!
//! Callers `push` a request and get back a correlation id, then `wait` on that
//! id and `pop_response` once it completes. Workers drain the job channel and
//! hand results back through [`RequestQueue::complete`].
//!
//! Each entry owns a `watch` channel whose value is the response slot. Storing
//! the response and waking the waiter is the same `send`, so a waiter that
//! wakes up always finds the response in place.

pub mod sweeper;
pub mod worker;

pub use sweeper::spawn_sweeper;
pub use worker::{Worker, WorkerPool};

use crate::error::QueueError;
use crate::plugin::schema::{ElapsedTimes, PluginRequest, PluginResponse};
use crate::plugin::RegisteredPlugin;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

pub type RequestId = Uuid;

/// Unit of work handed to the worker pool
pub struct Job {
    pub id: RequestId,
    pub request: PluginRequest,
    pub plugin: Arc<RegisteredPlugin>,
    pub elapsed_times: ElapsedTimes,
}

pub type JobReceiver = mpsc::UnboundedReceiver<Job>;

struct QueueEntry {
    identifier: String,
    created_at: Instant,
    slot: watch::Sender<Option<PluginResponse>>,
}

impl QueueEntry {
    fn is_complete(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

pub struct RequestQueue {
    entries: DashMap<RequestId, QueueEntry>,
    /// Entries that have not completed yet
    pending: AtomicUsize,
    jobs: mpsc::UnboundedSender<Job>,
}

impl RequestQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (jobs, receiver) = mpsc::unbounded_channel();
        (
            Self {
                entries: DashMap::new(),
                pending: AtomicUsize::new(0),
                jobs,
            },
            receiver,
        )
    }

    /// Store a new entry and hand its job to the workers. Never blocks.
    pub fn push(
        &self,
        request: PluginRequest,
        plugin: Arc<RegisteredPlugin>,
    ) -> Result<RequestId, QueueError> {
        let id = Uuid::new_v4();
        let (slot, _) = watch::channel(None);
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            QueueEntry {
                identifier: plugin.identifier().to_string(),
                created_at: Instant::now(),
                slot,
            },
        );

        let job = Job {
            id,
            request,
            plugin,
            elapsed_times: ElapsedTimes::new(),
        };
        if self.jobs.send(job).is_err() {
            self.discard(id);
            return Err(QueueError::Closed);
        }

        debug!(request_id = %id, "Queued request");
        Ok(id)
    }

    /// Suspend until the entry for `id` has a response.
    ///
    /// Fails with `NotFound` if `id` is unknown or the entry is evicted while
    /// waiting.
    pub async fn wait(&self, id: RequestId) -> Result<(), QueueError> {
        let mut receiver = self
            .entries
            .get(&id)
            .map(|entry| entry.slot.subscribe())
            .ok_or(QueueError::NotFound(id))?;

        receiver
            .wait_for(Option::is_some)
            .await
            .map(|_| ())
            .map_err(|_| QueueError::NotFound(id))
    }

    /// Remove and return the response for `id` if it has completed.
    ///
    /// Returns `None` while the entry is still pending (the entry is kept) and
    /// for ids that are unknown or already popped.
    pub fn pop_response(&self, id: RequestId) -> Option<PluginResponse> {
        let (_, entry) = self
            .entries
            .remove_if(&id, |_, entry| entry.is_complete())?;
        entry.slot.send_replace(None)
    }

    /// Write the response for `id` and wake its waiter.
    ///
    /// Returns `false` when the entry is gone (popped, discarded or swept) or
    /// was already completed; the response is dropped in that case.
    pub fn complete(&self, id: RequestId, response: PluginResponse) -> bool {
        let Some(entry) = self.entries.get(&id) else {
            debug!(request_id = %id, "Completed request no longer queued");
            return false;
        };

        let completed = entry.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(response);
            true
        });
        if completed {
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
        completed
    }

    /// Drop the entry for `id` whatever its state
    pub fn discard(&self, id: RequestId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                if !entry.is_complete() {
                    self.pending.fetch_sub(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// Guard that discards `id` when dropped
    pub fn guard(&self, id: RequestId) -> EntryGuard<'_> {
        EntryGuard { queue: self, id }
    }

    /// Evict entries older than `ttl`; returns how many were removed
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut removed = 0;
        self.entries.retain(|id, entry| {
            if entry.created_at.elapsed() < ttl {
                return true;
            }
            debug!(
                request_id = %id,
                identifier = %entry.identifier,
                completed = entry.is_complete(),
                "Evicting expired queue entry"
            );
            if !entry.is_complete() {
                self.pending.fetch_sub(1, Ordering::Relaxed);
            }
            removed += 1;
            false
        });
        removed
    }

    /// Entries that have not completed yet
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Removes a queue entry when the caller stops waiting for it, so entries of
/// cancelled or timed-out callers do not pile up.
pub struct EntryGuard<'a> {
    queue: &'a RequestQueue,
    id: RequestId,
}

impl EntryGuard<'_> {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        if self.queue.discard(self.id) {
            debug!(request_id = %self.id, "Discarded unclaimed queue entry");
        }
    }
}
