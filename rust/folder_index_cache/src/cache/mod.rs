//! Per-tenant cache of `ConditionTreeMap`s.
//!
//! Tenant entry lifecycle: ABSENT → LOADING → READY → (idle) → ABSENT.
//!
//! - Blocking and awaited lookups go through `moka`'s `try_get_with`, so
//!   concurrent first access for one tenant performs a single bulk read and
//!   every waiter observes the same map or the same error. Failures are not
//!   cached; the next call retries.
//! - Background loads (`opt_map_for(.., true)`) run on the runtime's
//!   blocking pool and are deduplicated per tenant.
//! - Entries expire after `idle_ttl` without access. The sweep task purges
//!   them and trims the maps that survive.
//! - Every map records the tenant generation read before its snapshot.
//!   `drop_for`, `drop_all` and `stop` bump the generation, so a load that
//!   was running across an invalidation is discarded instead of served.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use folder_index::{ConditionTreeMap, PermissionFact, PermissionSource};
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};

/// Snapshot of cache counters (relaxed atomics, approximate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resident tenant maps.
    pub tenants: u64,
    pub hits: u64,
    pub misses: u64,
    /// Bulk reads issued against the permission source.
    pub loads: u64,
    pub load_failures: u64,
    /// Background loads scheduled by `opt_map_for`.
    pub background_loads: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    background_loads: AtomicU64,
}

/// A loaded map tagged with the tenant generation it was read under.
#[derive(Clone)]
struct Resident {
    map: Arc<ConditionTreeMap>,
    generation: u64,
}

struct Inner {
    config: IndexConfig,
    source: Arc<dyn PermissionSource>,
    maps: Cache<i32, Resident>,
    /// tenant_id → in-flight background load.
    pending: DashMap<i32, JoinHandle<()>>,
    /// Bumped by `drop_all` and `stop`.
    epoch: AtomicU64,
    /// tenant_id → number of `drop_for` calls.
    dropped: DashMap<i32, u64>,
    runtime: Handle,
    counters: Counters,
}

impl Inner {
    /// Changes whenever the tenant is invalidated. Both counters only grow.
    fn generation(&self, tenant_id: i32) -> u64 {
        let dropped = self.dropped.get(&tenant_id).map_or(0, |n| *n);
        self.epoch.load(Ordering::Acquire) + dropped
    }

    fn is_current(&self, tenant_id: i32, resident: &Resident) -> bool {
        if resident.generation == self.generation(tenant_id) {
            return true;
        }
        self.maps.invalidate(&tenant_id);
        tracing::debug!(tenant_id, "discarded index loaded before invalidation");
        false
    }

    /// The resident map, if it is still current. Does not touch counters.
    fn resident(&self, tenant_id: i32) -> Option<Arc<ConditionTreeMap>> {
        self.maps
            .get(&tenant_id)
            .filter(|r| self.is_current(tenant_id, r))
            .map(|r| r.map)
    }

    fn cached(&self, tenant_id: i32) -> Option<Arc<ConditionTreeMap>> {
        let map = self.resident(tenant_id);
        let counter = if map.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        map
    }

    /// Return the resident map or load it, collapsing concurrent loads.
    /// A result invalidated while it was loading is dropped and reloaded.
    fn load(&self, tenant_id: i32) -> Result<Arc<ConditionTreeMap>> {
        if let Some(map) = self.cached(tenant_id) {
            return Ok(map);
        }
        loop {
            if let Some(map) = self.load_once(tenant_id)? {
                return Ok(map);
            }
        }
    }

    /// One shared load attempt. `None` if the tenant was invalidated while
    /// the snapshot was being read.
    fn load_once(&self, tenant_id: i32) -> Result<Option<Arc<ConditionTreeMap>>> {
        let resident = self
            .maps
            .try_get_with(tenant_id, || {
                let generation = self.generation(tenant_id);
                self.counters.loads.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tenant_id, generation, "loading permission index");
                ConditionTreeMap::load(tenant_id, self.source.as_ref())
                    .map(|map| Resident {
                        map: Arc::new(map),
                        generation,
                    })
                    .inspect_err(|e| {
                        self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(tenant_id, error = %e, "permission index load failed");
                    })
            })
            .map_err(|source| IndexError::Load { tenant_id, source })?;
        Ok(self.is_current(tenant_id, &resident).then_some(resident.map))
    }

    fn invalidate(&self, tenant_id: i32) {
        *self.dropped.entry(tenant_id).or_default() += 1;
        self.maps.invalidate(&tenant_id);
    }

    fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.maps.invalidate_all();
    }

    fn sweep(&self) -> usize {
        let started = Instant::now();
        self.maps.run_pending_tasks();
        let Some(cutoff) = started.checked_sub(self.config.idle_ttl()) else {
            return 0;
        };
        let mut trimmed = 0;
        for (_, resident) in self.maps.iter() {
            trimmed += resident.map.trim(cutoff);
        }
        tracing::debug!(
            tenants = self.maps.entry_count(),
            trimmed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "permission index sweep"
        );
        trimmed
    }
}

struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

/// Node-local cache of per-tenant visibility indexes.
///
/// Thread-safe: all methods take `&self`. Background work (async loads and
/// the sweep) runs on the tokio runtime behind the supplied handle.
pub struct TenantIndexCache {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl TenantIndexCache {
    /// Create a cache over `source`. Nothing runs in the background until
    /// [`start`](Self::start) is called.
    pub fn new(config: IndexConfig, source: Arc<dyn PermissionSource>, runtime: Handle) -> Self {
        let maps = Cache::builder()
            .time_to_idle(config.idle_ttl())
            .eviction_listener(
                |tenant_id: Arc<i32>, _resident: Resident, cause: RemovalCause| {
                    tracing::trace!(tenant_id = *tenant_id, ?cause, "permission index evicted");
                },
            )
            .build();
        if !config.enabled {
            tracing::info!("permission index disabled by configuration");
        }
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                maps,
                pending: DashMap::new(),
                epoch: AtomicU64::new(0),
                dropped: DashMap::new(),
                runtime,
                counters: Counters::default(),
            }),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Spawn the periodic sweep. Calling it again while running is a no-op.
    pub fn start(&self) {
        if !self.is_enabled() {
            return;
        }
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        // `interval` panics on a zero period.
        let period = self.inner.config.sweep_interval().max(Duration::from_millis(1));
        let handle = self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let inner = Arc::clone(&inner);
                        if let Err(e) = tokio::task::spawn_blocking(move || inner.sweep()).await {
                            tracing::warn!(error = %e, "permission index sweep failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("permission index sweep stopped");
        });

        *sweeper = Some(Sweeper {
            shutdown_tx,
            handle,
        });
        tracing::info!(
            idle_ttl_ms = self.inner.config.idle_ttl_ms,
            sweep_interval_ms = self.inner.config.sweep_interval_ms,
            "permission index cache started"
        );
    }

    /// Stop the sweep, cancel queued background loads and drop every map.
    /// Loads already running finish, but their results are discarded.
    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.shutdown();
        }
        self.inner.pending.retain(|_, handle| {
            handle.abort();
            false
        });
        self.inner.invalidate_all();
        tracing::info!("permission index cache stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// The tenant's map, loading it on the calling thread if needed.
    ///
    /// Blocks for the duration of a cold load. Concurrent callers for the
    /// same tenant wait on one shared load.
    pub fn get_map_for(&self, tenant_id: i32) -> Result<Arc<ConditionTreeMap>> {
        if !self.is_enabled() {
            return Err(IndexError::Disabled);
        }
        self.inner.load(tenant_id)
    }

    /// Like [`get_map_for`](Self::get_map_for), but the load runs on the
    /// blocking pool and is awaited.
    pub async fn get_map_for_async(&self, tenant_id: i32) -> Result<Arc<ConditionTreeMap>> {
        if !self.is_enabled() {
            return Err(IndexError::Disabled);
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .runtime
            .spawn_blocking(move || inner.load(tenant_id))
            .await?
    }

    /// Await the tenant's map for at most `wait`.
    ///
    /// On timeout only this caller gives up; the load continues and
    /// populates the cache for later callers.
    pub async fn get_map_for_timeout(
        &self,
        tenant_id: i32,
        wait: Duration,
    ) -> Result<Arc<ConditionTreeMap>> {
        if !self.is_enabled() {
            return Err(IndexError::Disabled);
        }
        let inner = Arc::clone(&self.inner);
        let load = self
            .inner
            .runtime
            .spawn_blocking(move || inner.load(tenant_id));
        match tokio::time::timeout(wait, load).await {
            Ok(joined) => joined?,
            Err(_) => Err(IndexError::Timeout {
                tenant_id,
                waited: wait,
            }),
        }
    }

    /// The tenant's map if it is resident; never blocks.
    ///
    /// `None` means "not available right now", not "nothing visible":
    /// callers fall back to storage. With `trigger_load` a background load
    /// is scheduled unless one is already in flight for the tenant.
    pub fn opt_map_for(&self, tenant_id: i32, trigger_load: bool) -> Option<Arc<ConditionTreeMap>> {
        if !self.is_enabled() {
            return None;
        }
        if let Some(map) = self.inner.cached(tenant_id) {
            return Some(map);
        }
        if trigger_load {
            self.schedule_load(tenant_id);
        }
        None
    }

    /// Queue a background load; returns false if one is already pending.
    fn schedule_load(&self, tenant_id: i32) -> bool {
        match self.inner.pending.entry(tenant_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let inner = Arc::clone(&self.inner);
                let handle = self.inner.runtime.spawn_blocking(move || {
                    match inner.load_once(tenant_id) {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            tracing::debug!(tenant_id, "background index load invalidated")
                        }
                        Err(e) => {
                            tracing::warn!(tenant_id, error = %e, "background index load failed")
                        }
                    }
                    inner.pending.remove(&tenant_id);
                });
                slot.insert(handle);
                self.inner
                    .counters
                    .background_loads
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tenant_id, "background index load scheduled");
                true
            }
        }
    }

    /// Evict one tenant regardless of idle time. A load in flight for the
    /// tenant is not served; the next lookup reads storage again.
    pub fn drop_for(&self, tenant_id: i32) {
        self.inner.invalidate(tenant_id);
        tracing::debug!(tenant_id, "permission index dropped");
    }

    /// Evict every tenant.
    pub fn drop_all(&self) {
        self.inner.invalidate_all();
    }

    /// Apply a newly granted permission to a resident map. Returns false
    /// when the tenant is not loaded (the next load reads it from storage)
    /// or the fact grants no visibility.
    pub fn insert_fact(&self, tenant_id: i32, fact: PermissionFact) -> bool {
        self.inner
            .resident(tenant_id)
            .is_some_and(|map| map.insert(fact))
    }

    /// Remove a deleted user's or group's tree from a resident map.
    pub fn remove_entity(&self, tenant_id: i32, entity_id: i32) -> bool {
        self.inner
            .resident(tenant_id)
            .is_some_and(|map| map.remove_for(entity_id))
    }

    /// One sweep pass: purge idle tenants, then trim the survivors.
    /// Returns the number of trees compacted.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.maps.run_pending_tasks();
        let c = &self.inner.counters;
        CacheStats {
            tenants: self.inner.maps.entry_count(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            loads: c.loads.load(Ordering::Relaxed),
            load_failures: c.load_failures.load(Ordering::Relaxed),
            background_loads: c.background_loads.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TenantIndexCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.shutdown();
        }
    }
}
