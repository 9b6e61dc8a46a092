//! Cached, write-buffered credential store.
//!
//! # Read path
//! ```text
//! get(key)
//!     → LRU cache
//!     → pending write buffer (not yet flushed)
//!     → durable backend (blocking pool)
//! ```
//!
//! # Write path
//! ```text
//! set(key, value)            [per-key lock held]
//!     → cache
//!     → critical kind?  yes → durable write now, bounded retries
//!                       no  → pending buffer, flushed on interval / batch size
//! ```
//!
//! Durable mutations (direct writes, flushes, deletes, purges, batches) are
//! serialized by one store-wide write lock, so a flush can never reorder a
//! newer direct write or resurrect a deleted key.
//!
//! When both are needed, the pending buffer is locked before the cache. Every
//! eviction and every read-path cache fill happens under those locks, so a
//! reader can never put back a value a concurrent delete already removed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::credentials::backend::{CredentialBackend, SqliteBackend};
use crate::credentials::cache::LruCache;
use crate::credentials::tracker::{ErrorTracker, ErrorVerdict};
use crate::credentials::types::{
    key_kind, make_key, now_millis, validate_key, CredentialError, CredentialRecord,
    CredentialResult, StoreStats, CREDS_KEY,
};
use crate::observability::metrics;
use crate::resilience::retries::{retry_with_backoff, RetriesExhausted, RetryPolicy};

/// A buffered write. `seq` identifies the exact write so a flush only
/// retires entries that were not overwritten while it ran.
#[derive(Debug, Clone)]
struct PendingWrite {
    record: CredentialRecord,
    seq: u64,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flushes: AtomicU64,
    errors: AtomicU64,
}

/// Persistent keyed credential storage.
///
/// Share it as `Arc<CredentialStore>`; every method takes `&self`.
pub struct CredentialStore {
    id: Uuid,
    backend: Arc<dyn CredentialBackend>,
    cache: Mutex<LruCache>,
    pending: Mutex<HashMap<String, PendingWrite>>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    write_lock: tokio::sync::Mutex<()>,
    /// Bumped around every mutation; a read only fills the cache when no
    /// mutation overlapped it.
    generation: AtomicU64,
    write_seq: AtomicU64,
    critical_kinds: HashSet<String>,
    retry: RetryPolicy,
    max_batch: usize,
    flush_interval: Duration,
    maintenance_interval: Duration,
    retention: Duration,
    counters: Counters,
    session_errors: Mutex<ErrorTracker>,
    closed: AtomicBool,
    stop: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CredentialStore {
    /// Open the SQLite database named in `config`.
    pub fn open(config: &StoreConfig) -> CredentialResult<Self> {
        let backend = SqliteBackend::open(&config.db_path)?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    /// Build a store over any backend.
    pub fn with_backend(backend: Arc<dyn CredentialBackend>, config: &StoreConfig) -> Self {
        let (stop, _) = watch::channel(false);
        let store = Self {
            id: Uuid::new_v4(),
            backend,
            cache: Mutex::new(LruCache::new(config.cache_capacity)),
            pending: Mutex::new(HashMap::new()),
            key_locks: DashMap::new(),
            write_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            write_seq: AtomicU64::new(0),
            critical_kinds: config.critical_kinds.iter().cloned().collect(),
            retry: RetryPolicy::new(
                config.write_retries,
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
            ),
            max_batch: config.max_batch.max(1),
            flush_interval: config.flush_interval(),
            maintenance_interval: config.maintenance_interval(),
            retention: config.retention(),
            counters: Counters::default(),
            session_errors: Mutex::new(ErrorTracker::new(
                config.session_error_threshold,
                config.session_error_window(),
            )),
            closed: AtomicBool::new(false),
            stop,
            background: Mutex::new(Vec::new()),
        };
        tracing::info!(
            store_id = %store.id,
            cache_capacity = config.cache_capacity,
            critical_kinds = ?config.critical_kinds,
            "Credential store ready"
        );
        store
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether writes of this kind are persisted before `set` returns.
    pub fn is_critical(&self, key: &str) -> bool {
        self.critical_kinds.contains(key_kind(key))
    }

    fn ensure_open(&self) -> CredentialResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CredentialError::Closed);
        }
        Ok(())
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn fail(&self, op: &'static str) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_store_error(op);
        self.record_error(op);
    }

    /// Count a session error toward the purge window.
    ///
    /// `should_clear` tells the caller the session records look corrupt and
    /// should be purged with [`clear_session`](Self::clear_session).
    pub fn record_error(&self, detail: &str) -> ErrorVerdict {
        let verdict = lock(&self.session_errors).record(Instant::now());
        tracing::debug!(detail, errors = verdict.count, "Session error recorded");
        verdict
    }

    /// Remove `key` from the buffer and the cache in one step.
    fn evict_key(&self, key: &str) {
        let mut pending = lock(&self.pending);
        let mut cache = lock(&self.cache);
        self.bump_generation();
        pending.remove(key);
        cache.remove(key);
    }

    /// Drop cached copies again once a durable removal has landed, catching
    /// reads that filled the cache while it ran.
    fn evict_cached(&self, drop_record: impl Fn(&CredentialRecord) -> bool) {
        let mut cache = lock(&self.cache);
        self.bump_generation();
        cache.retain(|record| !drop_record(record));
    }

    /// Run a backend call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> CredentialResult<T>
    where
        F: FnOnce(&dyn CredentialBackend) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| CredentialError::Task(e.to_string()))?
            .map_err(CredentialError::from)
    }

    /// Run a backend call under the retry policy.
    async fn durable<T, F>(
        &self,
        operation: &str,
        f: F,
    ) -> Result<T, RetriesExhausted<CredentialError>>
    where
        F: Fn(&dyn CredentialBackend) -> rusqlite::Result<T> + Clone + Send + 'static,
        T: Send + 'static,
    {
        retry_with_backoff(self.retry, operation, || self.blocking(f.clone())).await
    }

    /// Serialize `op` with every other mutation of `keys`. Locks are taken in
    /// sorted order; `keys` must be sorted and free of duplicates.
    async fn with_key_locks<T>(&self, keys: &[String], op: impl Future<Output = T>) -> T {
        let key_locks: Vec<_> = keys
            .iter()
            .map(|key| self.key_locks.entry(key.clone()).or_default().clone())
            .collect();
        let out = {
            let mut guards = Vec::with_capacity(key_locks.len());
            for key_lock in &key_locks {
                guards.push(key_lock.lock().await);
            }
            op.await
        };
        drop(key_locks);
        for key in keys {
            self.key_locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        }
        out
    }

    /// Serialize `op` with every other mutation of `key`.
    async fn with_key_lock<T>(&self, key: &str, op: impl Future<Output = T>) -> T {
        let key_lock = self.key_locks.entry(key.to_string()).or_default().clone();
        let out = {
            let _guard = key_lock.lock().await;
            op.await
        };
        drop(key_lock);
        self.key_locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        out
    }

    /// Read a record's value.
    pub async fn get(&self, key: &str) -> CredentialResult<Option<Vec<u8>>> {
        Ok(self.get_record(key).await?.map(|r| r.value))
    }

    /// Read a full record, including its last-write time.
    pub async fn get_record(&self, key: &str) -> CredentialResult<Option<CredentialRecord>> {
        validate_key(key)?;
        self.ensure_open()?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Acquire);

        if let Some(record) = lock(&self.cache).get(key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_store_read(true);
            return Ok(Some(record));
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_store_read(false);

        {
            let pending = lock(&self.pending);
            if let Some(buffered) = pending.get(key) {
                let record = buffered.record.clone();
                lock(&self.cache).put_if_absent(record.clone());
                return Ok(Some(record));
            }
        }

        let owned = key.to_string();
        let record = self
            .blocking(move |b| b.read(&owned))
            .await
            .inspect_err(|_| self.fail("read"))?;

        if let Some(record) = &record {
            let mut cache = lock(&self.cache);
            if self.generation.load(Ordering::Acquire) == generation {
                cache.put_if_absent(record.clone());
            }
        }
        Ok(record)
    }

    /// Write a record. Critical kinds are durable when this returns `Ok`.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> CredentialResult<()> {
        validate_key(key)?;
        self.ensure_open()?;
        self.with_key_lock(key, self.write_locked(key, value)).await
    }

    /// Delete a record. Returns whether a durable row was removed.
    pub async fn delete(&self, key: &str) -> CredentialResult<bool> {
        validate_key(key)?;
        self.ensure_open()?;
        self.with_key_lock(key, self.delete_locked(key)).await
    }

    /// Read-modify-write under the key's lock.
    ///
    /// `f` receives the current value; returning `None` deletes the record.
    pub async fn update<F>(&self, key: &str, f: F) -> CredentialResult<Option<Vec<u8>>>
    where
        F: FnOnce(Option<Vec<u8>>) -> Option<Vec<u8>>,
    {
        validate_key(key)?;
        self.ensure_open()?;
        self.with_key_lock(key, self.update_locked(key, f)).await
    }

    async fn update_locked<F>(&self, key: &str, f: F) -> CredentialResult<Option<Vec<u8>>>
    where
        F: FnOnce(Option<Vec<u8>>) -> Option<Vec<u8>>,
    {
        let current = self.get(key).await?;
        match f(current) {
            Some(next) => {
                self.write_locked(key, next.clone()).await?;
                Ok(Some(next))
            }
            None => {
                self.delete_locked(key).await?;
                Ok(None)
            }
        }
    }

    /// Fetch several ids of one kind. Missing ids are omitted.
    pub async fn get_many(
        &self,
        kind: &str,
        ids: &[String],
    ) -> CredentialResult<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = self.get(&make_key(kind, id)).await? {
                found.insert(id.clone(), value);
            }
        }
        Ok(found)
    }

    /// Apply a set of writes grouped by kind; `None` values delete.
    ///
    /// The batch is durable and all-or-nothing: on `Ok` every change is
    /// persisted, on `Err` none is visible.
    pub async fn set_many(
        &self,
        data: HashMap<String, HashMap<String, Option<Vec<u8>>>>,
    ) -> CredentialResult<()> {
        self.ensure_open()?;
        let mut upserts = Vec::new();
        let mut removals = Vec::new();
        for (kind, entries) in data {
            for (id, value) in entries {
                let key = make_key(&kind, &id);
                validate_key(&key)?;
                match value {
                    Some(value) => upserts.push(CredentialRecord::new(key, value)),
                    None => removals.push(key),
                }
            }
        }
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<String> = upserts
            .iter()
            .map(|r| r.key.clone())
            .chain(removals.iter().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        self.with_key_locks(&keys, self.apply_locked(upserts, removals))
            .await
    }

    /// Caller holds the locks of every key in the batch.
    async fn apply_locked(
        &self,
        upserts: Vec<CredentialRecord>,
        removals: Vec<String>,
    ) -> CredentialResult<()> {
        let _write = self.write_lock.lock().await;
        let (batch, gone) = (upserts.clone(), removals.clone());
        let result = self
            .durable("set_many", move |b| b.apply(&batch, &gone))
            .await;

        if let Err(exhausted) = result {
            self.fail("set_many");
            tracing::error!(
                upserts = upserts.len(),
                removals = removals.len(),
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "Credential batch failed; nothing applied"
            );
            return Err(CredentialError::Persist {
                key: "*".to_string(),
                attempts: exhausted.attempts,
                message: exhausted.last_error.to_string(),
            });
        }

        {
            let mut pending = lock(&self.pending);
            let mut cache = lock(&self.cache);
            self.bump_generation();
            for record in &upserts {
                pending.remove(&record.key);
                cache.put(record.clone());
            }
            for key in &removals {
                pending.remove(key);
                cache.remove(key);
            }
        }
        let changed = upserts.len() + removals.len();
        self.counters.writes.fetch_add(changed as u64, Ordering::Relaxed);
        metrics::record_store_writes(true, changed);
        tracing::debug!(
            upserts = upserts.len(),
            removals = removals.len(),
            "Credential batch applied"
        );
        Ok(())
    }

    /// Caller holds the key lock.
    async fn write_locked(&self, key: &str, value: Vec<u8>) -> CredentialResult<()> {
        let record = CredentialRecord::new(key, value);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        if self.is_critical(key) {
            metrics::record_store_write(true);
            {
                let mut cache = lock(&self.cache);
                self.bump_generation();
                cache.put(record.clone());
            }
            return self.persist_now(record).await;
        }

        metrics::record_store_write(false);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let buffered = {
            let mut pending = lock(&self.pending);
            let mut cache = lock(&self.cache);
            self.bump_generation();
            cache.put(record.clone());
            pending.insert(key.to_string(), PendingWrite { record, seq });
            pending.len()
        };

        if buffered >= self.max_batch {
            // Entries stay queued on failure; the next flush retries them.
            if let Err(e) = self.flush().await {
                tracing::warn!(error = %e, "Batch flush failed; writes remain buffered");
            }
        }
        Ok(())
    }

    async fn persist_now(&self, record: CredentialRecord) -> CredentialResult<()> {
        let _write = self.write_lock.lock().await;
        // A newer durable write supersedes any buffered value for the key.
        lock(&self.pending).remove(&record.key);

        let batch = vec![record.clone()];
        match self.durable("persist", move |b| b.write_batch(&batch)).await {
            Ok(()) => {
                tracing::debug!(key = %record.key, "Credential persisted");
                Ok(())
            }
            Err(exhausted) => {
                self.fail("persist");
                let key = record.key.clone();
                let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
                lock(&self.pending).insert(key.clone(), PendingWrite { record, seq });
                tracing::error!(
                    key = %key,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Critical credential write failed"
                );
                Err(CredentialError::Persist {
                    key,
                    attempts: exhausted.attempts,
                    message: exhausted.last_error.to_string(),
                })
            }
        }
    }

    /// Caller holds the key lock.
    async fn delete_locked(&self, key: &str) -> CredentialResult<bool> {
        let _write = self.write_lock.lock().await;
        self.evict_key(key);

        let owned = key.to_string();
        let result = self.durable("delete", move |b| b.remove(&owned)).await;
        self.evict_cached(|record| record.key == key);

        result.map_err(|exhausted| {
            self.fail("delete");
            CredentialError::Persist {
                key: key.to_string(),
                attempts: exhausted.attempts,
                message: exhausted.last_error.to_string(),
            }
        })
    }

    /// Write every buffered record in one atomic batch.
    ///
    /// Returns the number of records written. Entries overwritten while the
    /// flush ran stay queued with their newer value.
    pub async fn flush(&self) -> CredentialResult<usize> {
        let _write = self.write_lock.lock().await;

        let snapshot: Vec<(String, u64, CredentialRecord)> = lock(&self.pending)
            .iter()
            .map(|(key, p)| (key.clone(), p.seq, p.record.clone()))
            .collect();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let records: Vec<CredentialRecord> = snapshot.iter().map(|(_, _, r)| r.clone()).collect();
        let count = records.len();

        match self.durable("flush", move |b| b.write_batch(&records)).await {
            Ok(()) => {
                let mut pending = lock(&self.pending);
                for (key, seq, _) in &snapshot {
                    if pending.get(key).is_some_and(|p| p.seq == *seq) {
                        pending.remove(key);
                    }
                }
                drop(pending);

                self.counters.flushes.fetch_add(1, Ordering::Relaxed);
                metrics::record_store_flush(count, started.elapsed());
                tracing::debug!(
                    records = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Flushed buffered credentials"
                );
                Ok(count)
            }
            Err(exhausted) => {
                self.fail("flush");
                Err(CredentialError::Flush {
                    pending: count,
                    attempts: exhausted.attempts,
                    message: exhausted.last_error.to_string(),
                })
            }
        }
    }

    /// Remove every record, identity included.
    pub async fn clear(&self) -> CredentialResult<usize> {
        self.purge("clear", |_| false, |b| b.remove_all()).await
    }

    /// Remove every record except the identity record.
    pub async fn clear_session(&self) -> CredentialResult<usize> {
        let removed = self
            .purge("clear_session", |key| key == CREDS_KEY, |b| b.remove_session())
            .await?;
        lock(&self.session_errors).reset();
        Ok(removed)
    }

    async fn purge<K, F>(&self, op: &'static str, keep: K, f: F) -> CredentialResult<usize>
    where
        K: Fn(&str) -> bool,
        F: Fn(&dyn CredentialBackend) -> rusqlite::Result<usize> + Clone + Send + 'static,
    {
        self.ensure_open()?;
        let _write = self.write_lock.lock().await;
        {
            let mut pending = lock(&self.pending);
            let mut cache = lock(&self.cache);
            self.bump_generation();
            pending.retain(|key, _| keep(key));
            cache.retain(|record| keep(&record.key));
        }

        let result = self.durable(op, f).await;
        // Buffered writes made since the purge began stay in the buffer.
        self.evict_cached(|record| !keep(&record.key));

        match result {
            Ok(removed) => {
                tracing::info!(op, removed, "Credential records purged");
                Ok(removed)
            }
            Err(exhausted) => {
                self.fail(op);
                Err(CredentialError::Persist {
                    key: "*".to_string(),
                    attempts: exhausted.attempts,
                    message: exhausted.last_error.to_string(),
                })
            }
        }
    }

    /// Drop non-critical records last written more than `age` ago.
    pub async fn prune_older_than(&self, age: Duration) -> CredentialResult<usize> {
        self.ensure_open()?;
        let cutoff = now_millis().saturating_sub(age.as_millis() as i64);
        let protected: Vec<String> = self.critical_kinds.iter().cloned().collect();

        let stale = |record: &CredentialRecord| {
            record.updated_at < cutoff && !self.is_critical(&record.key)
        };

        let _write = self.write_lock.lock().await;
        self.evict_cached(stale);

        let result = self
            .durable("prune", move |b| b.prune(cutoff, &protected))
            .await;
        self.evict_cached(stale);

        let removed = result.map_err(|exhausted| {
            self.fail("prune");
            CredentialError::Persist {
                key: "*".to_string(),
                attempts: exhausted.attempts,
                message: exhausted.last_error.to_string(),
            }
        })?;
        if removed > 0 {
            tracing::info!(removed, retention_secs = age.as_secs(), "Pruned stale credentials");
        }
        Ok(removed)
    }

    /// Durable keys, optionally restricted to one kind. Buffered writes are
    /// included.
    pub async fn keys(&self, kind: Option<&str>) -> CredentialResult<Vec<String>> {
        self.ensure_open()?;
        let filter = kind.map(str::to_string);
        let mut keys = self.blocking(move |b| b.keys(filter.as_deref())).await?;

        let mut seen: HashSet<String> = keys.iter().cloned().collect();
        for key in lock(&self.pending).keys() {
            if kind.map_or(true, |k| key_kind(key) == k) && seen.insert(key.clone()) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn stats(&self) -> StoreStats {
        let recent_errors = lock(&self.session_errors).count(Instant::now());
        let pending_writes = lock(&self.pending).len();
        let cache = lock(&self.cache);
        StoreStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            recent_errors,
            cache_len: cache.len(),
            cache_capacity: cache.capacity(),
            pending_writes,
        }
    }

    pub fn pending_writes(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start the interval flusher and the retention sweep.
    ///
    /// Tasks hold a weak reference and stop on `close` or when the store is
    /// dropped.
    pub fn spawn_background(self: &Arc<Self>) {
        let flusher = {
            let store = Arc::downgrade(self);
            let stop = self.stop.subscribe();
            let period = self.flush_interval;
            tokio::spawn(run_periodic(store, stop, period, "flusher", |store| async move {
                if store.pending_writes() == 0 {
                    return;
                }
                if let Err(e) = store.flush().await {
                    tracing::warn!(error = %e, "Background flush failed; will retry");
                }
            }))
        };

        let sweeper = {
            let store = Arc::downgrade(self);
            let stop = self.stop.subscribe();
            let period = self.maintenance_interval;
            tokio::spawn(run_periodic(store, stop, period, "retention", |store| async move {
                let retention = store.retention;
                if let Err(e) = store.prune_older_than(retention).await {
                    tracing::warn!(error = %e, "Retention sweep failed");
                }
            }))
        };

        lock(&self.background).extend([flusher, sweeper]);
    }

    /// Stop background tasks, flush buffered writes, and checkpoint.
    ///
    /// Idempotent. Later reads and writes fail with `Closed`.
    pub async fn close(&self) -> CredentialResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.stop.send(true);
        let tasks: Vec<JoinHandle<()>> = lock(&self.background).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let flushed = self.flush().await?;
        self.blocking(|b| b.checkpoint()).await?;
        tracing::info!(store_id = %self.id, flushed, "Credential store closed");
        Ok(())
    }
}

async fn run_periodic<F, Fut>(
    store: Weak<CredentialStore>,
    mut stop: watch::Receiver<bool>,
    period: Duration,
    task: &'static str,
    mut tick: F,
) where
    F: FnMut(Arc<CredentialStore>) -> Fut,
    Fut: Future<Output = ()>,
{
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else { break };
                tick(store).await;
            }
            _ = stop.changed() => break,
        }
    }
    tracing::debug!(task, "Credential store task stopped");
}
