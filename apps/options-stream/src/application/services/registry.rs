//! Subscription Registry
//!
//! Owns every live polling worker, keyed by `(owner, topic)`.
//!
//! # Guarantees
//!
//! - At most one worker runs per key. Installing over an existing key
//!   cancels the old worker and waits for it to finish before the new one
//!   is spawned, so a superseded worker never emits after the caller sees
//!   the replacement succeed.
//! - Lifecycle operations (install, remove, drain, shutdown) are serialized
//!   behind one async lock. Lookups take only the short entry lock.
//! - A worker that ends on its own, normally or by panicking, deregisters
//!   itself, but only if its entry still carries its generation id. A newer
//!   worker installed under the same key is never removed by a stale one.
//! - A worker that has called `WorkerContext::retire` is no longer reported
//!   by `live_handle`, so callers sharing a worker start a fresh one instead
//!   of joining one that is about to end.
//! - After `shutdown` the registry is empty and rejects new installs.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::subscription::{
    ConnectionId, SubscriptionId, SubscriptionKey, SubscriptionParams, Topic,
};
use crate::infrastructure::metrics::{self, StopReason};

// =============================================================================
// Types
// =============================================================================

/// Registry error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry is shutting down.
    #[error("subscription registry is shutting down")]
    Closed,
}

/// Handed to a worker when it is spawned.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Key the worker is registered under.
    pub key: SubscriptionKey,
    /// Generation id of this worker.
    pub id: SubscriptionId,
    /// Fires when the worker must stop.
    pub cancel: CancellationToken,
    retiring: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Mark the worker as ending on its own.
    ///
    /// Call before sending a terminal notice.
    pub fn retire(&self) {
        self.retiring.store(true, Ordering::Release);
    }
}

/// Receipt for an installed worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Registry key.
    pub key: SubscriptionKey,
    /// Generation id.
    pub id: SubscriptionId,
}

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live workers.
    pub total: usize,
    /// Live single-symbol workers.
    pub single_symbol: usize,
    /// Live shared index workers.
    pub indexes: usize,
    /// Whether shutdown has started.
    pub closing: bool,
}

struct Entry {
    id: SubscriptionId,
    params: SubscriptionParams,
    cancel: CancellationToken,
    retiring: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrent map of live polling workers.
pub struct SubscriptionRegistry {
    lifecycle: tokio::sync::Mutex<()>,
    entries: Mutex<HashMap<SubscriptionKey, Entry>>,
    closing: AtomicBool,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("len", &self.len())
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifecycle: tokio::sync::Mutex::new(()),
            entries: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Install a worker under `key`, replacing any existing one.
    ///
    /// `worker` receives its `WorkerContext` and returns the future to run.
    /// The previous worker, if any, is cancelled and awaited first.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Closed` once shutdown has begun.
    pub async fn subscribe<F, Fut>(
        self: &Arc<Self>,
        key: SubscriptionKey,
        params: SubscriptionParams,
        worker: F,
    ) -> Result<SubscriptionHandle, RegistryError>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _lifecycle = self.lifecycle.lock().await;

        if self.closing.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }

        let previous = self.entries.lock().remove(&key);
        if let Some(previous) = previous {
            debug!(key = %key, old_id = previous.id, "Replacing worker");
            stop_entry(key, previous).await;
        }

        Ok(self.install(key, params, worker))
    }

    /// Replace the worker under `key` with one built from new parameters.
    ///
    /// Same semantics as `subscribe`: the old worker is fully stopped
    /// before the new one starts, and a missing entry is simply installed.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Closed` once shutdown has begun.
    pub async fn update<F, Fut>(
        self: &Arc<Self>,
        key: SubscriptionKey,
        params: SubscriptionParams,
        worker: F,
    ) -> Result<SubscriptionHandle, RegistryError>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(key, params, worker).await
    }

    /// Cancel and remove the worker under `key`.
    ///
    /// Returns `false` if nothing was registered.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        let removed = self.entries.lock().remove(key);
        match removed {
            Some(entry) => {
                stop_entry(*key, entry).await;
                self.publish_gauge();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every worker owned by a connection.
    ///
    /// Returns how many were removed.
    pub async fn unsubscribe_all(&self, connection: ConnectionId) -> usize {
        let _lifecycle = self.lifecycle.lock().await;

        let removed: Vec<_> = {
            let mut entries = self.entries.lock();
            let keys: Vec<SubscriptionKey> = entries
                .keys()
                .filter(|key| key.is_owned_by(connection))
                .copied()
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        let count = removed.len();
        stop_all(removed).await;
        self.publish_gauge();
        count
    }

    /// Cancel and remove every worker. The registry stays usable.
    ///
    /// Used when the market closes. Returns how many were removed.
    pub async fn drain(&self) -> usize {
        let _lifecycle = self.lifecycle.lock().await;
        self.drain_locked().await
    }

    /// Reject new installs, then cancel and remove every worker.
    ///
    /// Returns how many were removed. Idempotent.
    pub async fn shutdown(&self) -> usize {
        let _lifecycle = self.lifecycle.lock().await;
        self.closing.store(true, Ordering::Release);
        let count = self.drain_locked().await;
        info!(stopped = count, "Subscription registry shut down");
        count
    }

    /// Whether a worker is registered under `key`.
    #[must_use]
    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Handle of the worker registered under `key`.
    #[must_use]
    pub fn handle(&self, key: &SubscriptionKey) -> Option<SubscriptionHandle> {
        self.entries
            .lock()
            .get(key)
            .map(|entry| SubscriptionHandle { key: *key, id: entry.id })
    }

    /// Handle of the worker under `key`, unless it is retiring.
    #[must_use]
    pub fn live_handle(&self, key: &SubscriptionKey) -> Option<SubscriptionHandle> {
        self.entries
            .lock()
            .get(key)
            .filter(|entry| !entry.retiring.load(Ordering::Acquire))
            .map(|entry| SubscriptionHandle { key: *key, id: entry.id })
    }

    /// Parameters of the worker registered under `key`.
    #[must_use]
    pub fn params(&self, key: &SubscriptionKey) -> Option<SubscriptionParams> {
        self.entries.lock().get(key).map(|entry| entry.params.clone())
    }

    /// Number of live workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no worker is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Counters for health reporting.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.lock();
        let mut stats = RegistryStats {
            total: entries.len(),
            closing: self.is_closing(),
            ..RegistryStats::default()
        };
        for key in entries.keys() {
            match key.topic {
                Topic::SingleSymbol => stats.single_symbol += 1,
                Topic::Indexes => stats.indexes += 1,
            }
        }
        stats
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn install<F, Fut>(
        self: &Arc<Self>,
        key: SubscriptionKey,
        params: SubscriptionParams,
        worker: F,
    ) -> SubscriptionHandle
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let retiring = Arc::new(AtomicBool::new(false));
        let future = worker(WorkerContext {
            key,
            id,
            cancel: cancel.clone(),
            retiring: Arc::clone(&retiring),
        });
        let registry: Weak<Self> = Arc::downgrade(self);

        // Spawn while holding the entry lock so a worker that finishes
        // immediately cannot try to deregister before it is inserted.
        let mut entries = self.entries.lock();
        let handle = tokio::spawn(async move {
            if AssertUnwindSafe(future).catch_unwind().await.is_err() {
                metrics::record_worker_stopped(key.topic, StopReason::Panicked);
                error!(key = %key, id, "Worker panicked");
            }
            if let Some(registry) = registry.upgrade() {
                registry.deregister(key, id);
            }
        });
        entries.insert(
            key,
            Entry {
                id,
                params,
                cancel,
                retiring,
                handle,
            },
        );
        metrics::set_active_subscriptions(entries.len());
        drop(entries);

        metrics::record_worker_started(key.topic);
        debug!(key = %key, id, "Worker installed");

        SubscriptionHandle { key, id }
    }

    /// Remove `key` only if it still holds generation `id`.
    fn deregister(&self, key: SubscriptionKey, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let matches = entries.get(&key).is_some_and(|entry| entry.id == id);
        if matches {
            entries.remove(&key);
            metrics::set_active_subscriptions(entries.len());
            debug!(key = %key, id, "Worker deregistered itself");
        }
        matches
    }

    async fn drain_locked(&self) -> usize {
        let removed: Vec<_> = self.entries.lock().drain().collect();
        let count = removed.len();
        stop_all(removed).await;
        self.publish_gauge();
        count
    }

    fn publish_gauge(&self) {
        metrics::set_active_subscriptions(self.len());
    }
}

/// Cancel one worker and wait for it to finish.
async fn stop_entry(key: SubscriptionKey, entry: Entry) {
    entry.cancel.cancel();
    join_worker(key, entry.id, entry.handle).await;
}

/// Cancel every worker first, then wait for all of them.
async fn stop_all(removed: Vec<(SubscriptionKey, Entry)>) {
    for (_, entry) in &removed {
        entry.cancel.cancel();
    }
    join_all(
        removed
            .into_iter()
            .map(|(key, entry)| join_worker(key, entry.id, entry.handle)),
    )
    .await;
}

async fn join_worker(key: SubscriptionKey, id: SubscriptionId, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => debug!(key = %key, id, "Worker stopped"),
        Err(e) => debug!(key = %key, id, error = %e, "Worker aborted"),
    }
}

// =============================================================================
// Tests
// =============================================================================
