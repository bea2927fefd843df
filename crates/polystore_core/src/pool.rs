//! Bounded, health-checked connection pool.
//!
//! Each driver implements [`Manager`] for its native connection type and
//! embeds a [`Pool`] behind its backend. Entries move idle → in-use on
//! acquire and back on release; a failed check or an invalidated guard
//! evicts the entry, and the health loop replaces entries up to `min`.

use crate::config::PoolConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::sync::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;

/// Factory and health probe for one driver's connections.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Open a new connection.
    async fn create(&self) -> Result<Self::Conn>;

    /// Cheap liveness check run on idle entries before handout and by the
    /// background health loop.
    async fn check(&self, conn: &mut Self::Conn) -> Result<()>;
}

struct IdleEntry<C> {
    conn: C,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleEntry<C>>,
    /// Connections currently alive, idle or handed out.
    live: usize,
    closed: bool,
}

struct PoolInner<M: Manager> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState<M::Conn>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Manager> PoolInner<M> {
    /// The state lock is never held across an await point.
    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState<M::Conn>> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Shared handle to a pool.
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Snapshot of pool occupancy, used by tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub live: usize,
    pub idle: usize,
    pub min: usize,
    pub max: usize,
}

impl<M: Manager> Pool<M> {
    /// Create the pool and warm it up to `min` connections. Warm-up failures
    /// are logged, not fatal; acquires create on demand.
    pub async fn new(manager: M, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max)),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                live: 0,
                closed: false,
            }),
            health_task: Mutex::new(None),
            manager,
            config,
        });

        for _ in 0..inner.config.min {
            match inner.manager.create().await {
                Ok(conn) => {
                    let mut state = inner.lock_state();
                    state.live += 1;
                    state.idle.push_back(IdleEntry {
                        conn,
                        idle_since: Instant::now(),
                    });
                }
                Err(err) => {
                    log::warn!("pool warm-up connection failed: {err}");
                    break;
                }
            }
        }

        let pool = Self { inner };
        pool.spawn_health_loop();
        pool
    }

    fn spawn_health_loop(&self) {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.health_check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.lock_state().closed {
                    return;
                }
                Self::run_health_pass(&inner).await;
            }
        });
        *self
            .inner
            .health_task
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(handle);
    }

    /// Probe idle entries, evict stale or unhealthy ones, and replace
    /// entries up to `min`.
    async fn run_health_pass(inner: &Arc<PoolInner<M>>) {
        let idle_timeout = inner.config.idle_timeout;

        let candidates = {
            let mut state = inner.lock_state();
            std::mem::take(&mut state.idle)
        };

        let mut kept = VecDeque::new();
        let mut evicted = 0usize;
        for mut entry in candidates {
            if entry.idle_since.elapsed() > idle_timeout {
                evicted += 1;
                continue;
            }
            match inner.manager.check(&mut entry.conn).await {
                Ok(()) => kept.push_back(entry),
                Err(err) => {
                    log::warn!("pool health check evicting connection: {err}");
                    evicted += 1;
                }
            }
        }

        let replenish = {
            let mut state = inner.lock_state();
            // Entries acquired while the pass ran were not candidates; only
            // the evicted ones leave the live count.
            state.live -= evicted;
            for entry in kept {
                state.idle.push_back(entry);
            }
            inner.config.min.saturating_sub(state.live)
        };

        for _ in 0..replenish {
            match inner.manager.create().await {
                Ok(conn) => {
                    let mut state = inner.lock_state();
                    if state.closed {
                        return;
                    }
                    state.live += 1;
                    state.idle.push_back(IdleEntry {
                        conn,
                        idle_since: Instant::now(),
                    });
                }
                Err(err) => {
                    log::warn!("pool replenish failed: {err}");
                    return;
                }
            }
        }
    }

    /// Acquire a connection within the configured `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PoolGuard<M>> {
        self.acquire_until(Instant::now() + self.inner.config.acquire_timeout)
            .await
    }

    /// Acquire with an explicit deadline; the smaller of the deadline and
    /// `acquire_timeout` applies.
    pub async fn acquire_deadline(&self, deadline: Instant) -> Result<PoolGuard<M>> {
        let configured = Instant::now() + self.inner.config.acquire_timeout;
        self.acquire_until(deadline.min(configured)).await
    }

    async fn acquire_until(&self, deadline: Instant) -> Result<PoolGuard<M>> {
        let started = Instant::now();
        let inner = &self.inner;

        let permit = match timeout_at(
            deadline.into(),
            inner.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(StoreError::transport("pool is closed"));
            }
            Err(_elapsed) => {
                return Err(StoreError::AcquireTimeout {
                    waited: started.elapsed(),
                });
            }
        };

        loop {
            let entry = {
                let mut state = inner.lock_state();
                if state.closed {
                    return Err(StoreError::transport("pool is closed"));
                }
                state.idle.pop_front()
            };

            match entry {
                Some(mut entry) => {
                    if entry.idle_since.elapsed() > inner.config.idle_timeout {
                        inner.lock_state().live -= 1;
                        continue;
                    }
                    match inner.manager.check(&mut entry.conn).await {
                        Ok(()) => {
                            return Ok(PoolGuard {
                                conn: Some(entry.conn),
                                inner: inner.clone(),
                                _permit: Some(permit),
                                broken: false,
                            });
                        }
                        Err(err) => {
                            log::debug!("pool acquire evicting stale connection: {err}");
                            inner.lock_state().live -= 1;
                            continue;
                        }
                    }
                }
                None => {
                    inner.lock_state().live += 1;
                    match inner.manager.create().await {
                        Ok(conn) => {
                            return Ok(PoolGuard {
                                conn: Some(conn),
                                inner: inner.clone(),
                                _permit: Some(permit),
                                broken: false,
                            });
                        }
                        Err(err) => {
                            inner.lock_state().live -= 1;
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.inner.lock_state();
        PoolStatus {
            live: state.live,
            idle: state.idle.len(),
            min: self.inner.config.min,
            max: self.inner.config.max,
        }
    }

    /// Close the pool: reject new acquires, drop idle entries, and wait up
    /// to `grace` for in-use entries to come back before force-closing.
    pub async fn close(&self, grace: Duration) {
        {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            let dropped = state.idle.len();
            state.idle.clear();
            state.live -= dropped;
        }
        self.inner.semaphore.close();

        if let Some(handle) = self
            .inner
            .health_task
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
        {
            handle.abort();
        }

        let deadline = Instant::now() + grace;
        loop {
            if self.inner.lock_state().live == 0 {
                return;
            }
            if Instant::now() >= deadline {
                log::warn!("pool close grace period expired with connections in use");
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Exclusive handle to one pooled connection.
///
/// Dropping the guard returns the connection to the idle set unless it was
/// invalidated, in which case the entry is evicted and later replaced up to
/// `min` by the health loop.
pub struct PoolGuard<M: Manager> {
    conn: Option<M::Conn>,
    inner: Arc<PoolInner<M>>,
    _permit: Option<OwnedSemaphorePermit>,
    broken: bool,
}

impl<M: Manager> PoolGuard<M> {
    /// Mark the connection unusable after a fatal transport error.
    pub fn invalidate(&mut self) {
        self.broken = true;
    }
}

impl<M: Manager> std::fmt::Debug for PoolGuard<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard").field("broken", &self.broken).finish()
    }
}

impl<M: Manager> Deref for PoolGuard<M> {
    type Target = M::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken")
    }
}

impl<M: Manager> DerefMut for PoolGuard<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken")
    }
}

impl<M: Manager> Drop for PoolGuard<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut state = self.inner.lock_state();
        if self.broken || state.closed {
            state.live -= 1;
        } else {
            state.idle.push_back(IdleEntry {
                conn,
                idle_since: Instant::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingManager {
        created: Arc<AtomicUsize>,
        fail_checks: Arc<AtomicUsize>,
    }

    struct TestConn {
        serial: usize,
    }

    #[async_trait]
    impl Manager for CountingManager {
        type Conn = TestConn;

        async fn create(&self) -> Result<TestConn> {
            let serial = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(TestConn { serial })
        }

        async fn check(&self, _conn: &mut TestConn) -> Result<()> {
            if self.fail_checks.load(Ordering::SeqCst) > 0 {
                self.fail_checks.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::transport("probe failed"));
            }
            Ok(())
        }
    }

    fn manager() -> (CountingManager, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        (
            CountingManager {
                created: created.clone(),
                fail_checks: Arc::new(AtomicUsize::new(0)),
            },
            created,
        )
    }

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min,
            max,
            acquire_timeout: Duration::from_millis(200),
            health_check_interval: Duration::from_secs(3600),
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn live_count_never_exceeds_max() {
        let (manager, _created) = manager();
        let pool = Pool::new(manager, config(0, 3)).await;

        let mut guards = Vec::new();
        for _ in 0..3 {
            guards.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.status().await.live, 3);

        // Fourth concurrent acquire times out instead of growing the pool.
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, StoreError::AcquireTimeout { .. }));

        drop(guards);
    }

    #[tokio::test]
    async fn connections_are_reused_after_release() {
        let (manager, created) = manager();
        let pool = Pool::new(manager, config(0, 2)).await;

        let first = pool.acquire().await.unwrap();
        let serial = first.serial;
        drop(first);
        tokio::task::yield_now().await;

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.serial, serial);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_connection_is_handed_to_two_callers() {
        let (manager, _created) = manager();
        let pool = Pool::new(manager, config(0, 4)).await;

        let seen = Arc::new(std::sync::Mutex::new(std::collections::HashSet::new()));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let seen = seen.clone();
            tasks.push(tokio::spawn(async move {
                let guard = pool.acquire().await.unwrap();
                {
                    let mut held = seen.lock().unwrap();
                    assert!(held.insert(guard.serial), "connection handed out twice");
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                seen.lock().unwrap().remove(&guard.serial);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn invalidated_guard_evicts_instead_of_returning() {
        let (manager, created) = manager();
        let pool = Pool::new(manager, config(0, 2)).await;

        let mut guard = pool.acquire().await.unwrap();
        guard.invalidate();
        drop(guard);
        tokio::task::yield_now().await;

        assert_eq!(pool.status().await.live, 0);

        // Next acquire creates a fresh connection.
        let replacement = pool.acquire().await.unwrap();
        assert_eq!(replacement.serial, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_idle_check_falls_through_to_a_new_connection() {
        let (manager, created) = manager();
        let fail_checks = manager.fail_checks.clone();
        let pool = Pool::new(manager, config(0, 2)).await;

        let first = pool.acquire().await.unwrap();
        drop(first);
        tokio::task::yield_now().await;

        // The idle entry fails its pre-handout check and is evicted.
        fail_checks.store(1, Ordering::SeqCst);
        let second = pool.acquire().await.unwrap();
        assert_eq!(second.serial, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().await.live, 1);
    }

    #[tokio::test]
    async fn close_rejects_new_acquires() {
        let (manager, _created) = manager();
        let pool = Pool::new(manager, config(1, 2)).await;

        pool.close(Duration::from_millis(100)).await;

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
        assert_eq!(pool.status().await.live, 0);
    }

    #[tokio::test]
    async fn warm_up_reaches_min() {
        let (manager, created) = manager();
        let pool = Pool::new(manager, config(2, 4)).await;

        let status = pool.status().await;
        assert_eq!(status.live, 2);
        assert_eq!(status.idle, 2);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
