//! Typed Object Pools
//!
//! Reusable instances handed out by exclusive ownership: an item is either
//! idle inside the pool or checked out by exactly one caller.
//!
//! Capacity bounds the idle set only. Acquiring beyond capacity still
//! calls the factory and is counted in `over_capacity`; releasing into a
//! full idle set discards the item instead of growing the pool.

use crate::error::panic_message;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pool {0} has been destroyed")]
    Destroyed(String),

    #[error("Factory for pool {pool} panicked: {message}")]
    Factory { pool: String, message: String },

    #[error("Reset hook for pool {pool} panicked: {message}")]
    Reset { pool: String, message: String },
}

/// Which idle item `acquire` hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStrategy {
    /// Most recently released first; the least recently used age out
    #[default]
    Lru,
    /// Oldest idle item first
    Fifo,
}

pub type Factory<T> = Arc<dyn Fn() -> T + Send + Sync>;
pub type ResetHook<T> = Arc<dyn Fn(&mut T) + Send + Sync>;
pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Pool definition
pub struct PoolConfig<T> {
    pub name: String,
    pub capacity: usize,
    pub strategy: PoolStrategy,
    /// Items created up front, capped at capacity
    pub prefill: usize,
    factory: Factory<T>,
    reset: Option<ResetHook<T>>,
    validator: Option<Validator<T>>,
}

impl<T> PoolConfig<T> {
    pub fn new<F>(name: impl Into<String>, capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            capacity,
            strategy: PoolStrategy::default(),
            prefill: 0,
            factory: Arc::new(factory),
            reset: None,
            validator: None,
        }
    }

    /// Hook run on every released item. It must leave the item as if
    /// freshly created (e.g. zero sensitive buffers).
    pub fn with_reset<F>(mut self, reset: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Arc::new(reset));
        self
    }

    /// Idle items failing the validator are discarded on acquire
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_strategy(mut self, strategy: PoolStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_prefill(mut self, count: usize) -> Self {
        self.prefill = count;
        self
    }
}

impl<T> fmt::Debug for PoolConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("strategy", &self.strategy)
            .field("prefill", &self.prefill)
            .field("has_reset", &self.reset.is_some())
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

/// Pool counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub capacity: usize,
    pub strategy: PoolStrategy,
    pub idle: usize,
    pub in_use: usize,
    /// Factory invocations
    pub created: u64,
    pub acquired: u64,
    pub released: u64,
    /// Acquisitions served from the idle set
    pub hits: u64,
    /// Acquisitions that needed the factory
    pub misses: u64,
    /// Released items dropped because the idle set was full
    pub discarded: u64,
    pub validation_failures: u64,
    pub reset_failures: u64,
    /// Idle items dropped for age
    pub evicted: u64,
    /// Acquisitions made while `in_use` already met capacity
    pub over_capacity: u64,
    pub hit_rate: f64,
}

struct IdleItem<T> {
    item: T,
    released_at: Instant,
}

struct PoolState<T> {
    idle: VecDeque<IdleItem<T>>,
    stats: PoolStats,
    destroyed: bool,
}

struct PoolShared<T> {
    name: String,
    capacity: usize,
    strategy: PoolStrategy,
    factory: Factory<T>,
    reset: Option<ResetHook<T>>,
    validator: Option<Validator<T>>,
    state: Mutex<PoolState<T>>,
}

/// A named, typed object pool. Cloning yields another handle to the same pool.
pub struct ObjectPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Create a pool, running the factory for any prefill
    pub fn new(config: PoolConfig<T>) -> Self {
        let stats = PoolStats {
            name: config.name.clone(),
            capacity: config.capacity,
            strategy: config.strategy,
            ..PoolStats::default()
        };

        let pool = Self {
            shared: Arc::new(PoolShared {
                name: config.name,
                capacity: config.capacity,
                strategy: config.strategy,
                factory: config.factory,
                reset: config.reset,
                validator: config.validator,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(config.capacity),
                    stats,
                    destroyed: false,
                }),
            }),
        };

        pool.prefill(config.prefill.min(config.capacity));

        info!(
            pool = %pool.shared.name,
            capacity = pool.shared.capacity,
            strategy = ?pool.shared.strategy,
            "Created object pool"
        );
        pool
    }

    fn prefill(&self, count: usize) {
        for _ in 0..count {
            let Ok(item) = self.create() else { break };
            self.lock().idle.push_back(IdleItem {
                item,
                released_at: Instant::now(),
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Run the factory in a panic isolation boundary
    fn create(&self) -> Result<T, PoolError> {
        let item = panic::catch_unwind(AssertUnwindSafe(|| (self.shared.factory)())).map_err(
            |payload| PoolError::Factory {
                pool: self.shared.name.clone(),
                message: panic_message(payload),
            },
        )?;
        self.lock().stats.created += 1;
        Ok(item)
    }

    fn is_valid(&self, item: &T) -> bool {
        let Some(validator) = &self.shared.validator else {
            return true;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| validator(item))) {
            Ok(valid) => valid,
            Err(payload) => {
                warn!(
                    pool = %self.shared.name,
                    "Validator panicked, discarding item: {}",
                    panic_message(payload)
                );
                false
            }
        }
    }

    /// Take an item out of the pool.
    ///
    /// Reuses an idle item when one passes validation, otherwise calls the
    /// factory. Never blocks on capacity.
    pub fn acquire(&self) -> Result<Pooled<T>, PoolError> {
        let candidate = {
            let mut state = self.lock();
            if state.destroyed {
                return Err(PoolError::Destroyed(self.shared.name.clone()));
            }
            match self.shared.strategy {
                PoolStrategy::Lru => state.idle.pop_back(),
                PoolStrategy::Fifo => state.idle.pop_front(),
            }
        };

        let reused = match candidate {
            Some(idle) if self.is_valid(&idle.item) => Some(idle.item),
            Some(_) => {
                self.lock().stats.validation_failures += 1;
                debug!(pool = %self.shared.name, "Idle item failed validation");
                None
            }
            None => None,
        };

        let hit = reused.is_some();
        let item = match reused {
            Some(item) => item,
            None => self.create()?,
        };

        let mut state = self.lock();
        if state.stats.in_use >= self.shared.capacity {
            state.stats.over_capacity += 1;
            debug!(
                pool = %self.shared.name,
                in_use = state.stats.in_use,
                capacity = self.shared.capacity,
                "Acquiring beyond pool capacity"
            );
        }
        state.stats.in_use += 1;
        state.stats.acquired += 1;
        if hit {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        drop(state);

        Ok(Pooled {
            item: Some(item),
            pool: self.clone(),
        })
    }

    /// Return an item to the pool.
    ///
    /// The reset hook runs first. Returns `Ok(true)` if the item went back
    /// to the idle set and `Ok(false)` if it was discarded because the idle
    /// set is full.
    pub fn release(&self, mut item: T) -> Result<bool, PoolError> {
        if self.lock().destroyed {
            return Err(PoolError::Destroyed(self.shared.name.clone()));
        }

        if let Some(reset) = &self.shared.reset {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| reset(&mut item))) {
                let mut state = self.lock();
                state.stats.reset_failures += 1;
                state.stats.in_use = state.stats.in_use.saturating_sub(1);
                return Err(PoolError::Reset {
                    pool: self.shared.name.clone(),
                    message: panic_message(payload),
                });
            }
        }

        let mut state = self.lock();
        state.stats.in_use = state.stats.in_use.saturating_sub(1);
        state.stats.released += 1;

        if state.destroyed {
            return Err(PoolError::Destroyed(self.shared.name.clone()));
        }
        if state.idle.len() >= self.shared.capacity {
            state.stats.discarded += 1;
            drop(state);
            drop(item);
            return Ok(false);
        }

        state.idle.push_back(IdleItem {
            item,
            released_at: Instant::now(),
        });
        Ok(true)
    }

    /// Drop idle items released more than `max_age` ago
    pub fn evict_idle(&self, max_age: Duration) -> usize {
        let evicted: VecDeque<IdleItem<T>> = {
            let mut state = self.lock();
            let (keep, evict): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|i| i.released_at.elapsed() <= max_age);
            state.idle = keep;
            state.stats.evicted += evict.len() as u64;
            evict
        };

        if !evicted.is_empty() {
            debug!(pool = %self.shared.name, count = evicted.len(), "Evicted aged idle items");
        }
        evicted.len()
    }

    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.idle = state.idle.len();
        stats.hit_rate = if stats.acquired == 0 {
            0.0
        } else {
            stats.hits as f64 / stats.acquired as f64
        };
        stats
    }

    /// Clear the idle set and refuse further acquire/release
    pub fn destroy(&self) {
        let drained: Vec<IdleItem<T>> = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.idle.drain(..).collect()
        };
        // Items are dropped outside the lock
        drop(drained);

        info!(pool = %self.shared.name, "Destroyed object pool");
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    fn forget_checkout(&self) {
        let mut state = self.lock();
        state.stats.in_use = state.stats.in_use.saturating_sub(1);
    }
}

/// A checked-out item. Released back to its pool on drop.
pub struct Pooled<T: Send + 'static> {
    item: Option<T>,
    pool: ObjectPool<T>,
}

impl<T: Send + 'static> Pooled<T> {
    /// Take the item out of pool management
    pub fn detach(mut self) -> T {
        self.pool.forget_checkout();
        self.item.take().expect("pooled item present until drop")
    }
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item present until drop")
    }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item present until drop")
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            if let Err(e) = self.pool.release(item) {
                debug!("Pooled item not returned: {}", e);
            }
        }
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("pool", &self.pool.shared.name)
            .field("item", &self.item)
            .finish()
    }
}

/// Type-erased view used by the pool registry
pub trait ManagedPool: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> PoolStats;
    fn evict_idle(&self, max_age: Duration) -> usize;
    fn destroy(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> ManagedPool for ObjectPool<T> {
    fn name(&self) -> &str {
        ObjectPool::name(self)
    }

    fn stats(&self) -> PoolStats {
        ObjectPool::stats(self)
    }

    fn evict_idle(&self, max_age: Duration) -> usize {
        ObjectPool::evict_idle(self, max_age)
    }

    fn destroy(&self) {
        ObjectPool::destroy(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_pool(capacity: usize) -> (ObjectPool<Vec<u8>>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let config = PoolConfig::new("buffers", capacity, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![0u8; 32]
        })
        .with_reset(|buf: &mut Vec<u8>| buf.iter_mut().for_each(|b| *b = 0));
        (ObjectPool::new(config), calls)
    }

    #[test]
    fn test_idle_reuse_skips_factory() {
        let (pool, calls) = counting_pool(2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        drop(a);
        drop(b);

        let _c = pool.acquire().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.in_use, 1);
    }

    #[test]
    fn test_release_runs_reset() {
        let (pool, _) = counting_pool(1);
        let mut buf = pool.acquire().unwrap();
        buf[0] = 0xAA;
        drop(buf);

        let buf = pool.acquire().unwrap();
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn test_release_beyond_capacity_discards() {
        let (pool, calls) = counting_pool(2);
        let items: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        drop(items);

        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.over_capacity, 2);
    }

    #[test]
    fn test_explicit_release_of_detached_item() {
        let (pool, _) = counting_pool(1);
        let item = pool.acquire().unwrap().detach();
        assert_eq!(pool.stats().in_use, 0);

        assert!(pool.release(item).unwrap());
        assert!(!pool.release(vec![1, 2, 3]).unwrap());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_invalid_idle_item_replaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let pool = ObjectPool::new(
            PoolConfig::new("validated", 2, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                String::new()
            })
            .with_validator(|s: &String| s.is_empty()),
        );

        let mut item = pool.acquire().unwrap();
        item.push_str("dirty");
        drop(item);

        let item = pool.acquire().unwrap();
        assert!(item.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().validation_failures, 1);
    }

    #[test]
    fn test_strategies() {
        let next = Arc::new(AtomicUsize::new(0));
        let make = |strategy| {
            let next = next.clone();
            ObjectPool::new(
                PoolConfig::new("ordered", 3, move || next.fetch_add(1, Ordering::SeqCst))
                    .with_strategy(strategy),
            )
        };

        let lru = make(PoolStrategy::Lru);
        lru.release(10).unwrap();
        lru.release(11).unwrap();
        assert_eq!(*lru.acquire().unwrap(), 11);

        let fifo = make(PoolStrategy::Fifo);
        fifo.release(10).unwrap();
        fifo.release(11).unwrap();
        assert_eq!(*fifo.acquire().unwrap(), 10);
    }

    #[test]
    fn test_prefill_and_eviction() {
        let pool = ObjectPool::new(PoolConfig::new("prefilled", 4, || 0u64).with_prefill(10));
        assert_eq!(pool.idle_count(), 4);
        assert_eq!(pool.stats().created, 4);

        assert_eq!(pool.evict_idle(Duration::from_secs(3600)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.evict_idle(Duration::ZERO), 4);
        assert_eq!(pool.stats().evicted, 4);
    }

    #[test]
    fn test_eviction_keeps_recently_released() {
        let pool = ObjectPool::new(PoolConfig::new("mixed", 4, || 0u64).with_prefill(2));
        std::thread::sleep(Duration::from_millis(60));

        let item = pool.acquire().unwrap();
        drop(item);

        assert_eq!(pool.evict_idle(Duration::from_millis(30)), 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.stats().evicted, 1);
    }

    #[test]
    fn test_factory_panic_is_an_error() {
        let pool: ObjectPool<u8> =
            ObjectPool::new(PoolConfig::new("broken", 1, || panic!("no memory")));
        match pool.acquire() {
            Err(PoolError::Factory { message, .. }) => assert_eq!(message, "no memory"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_destroy_refuses_use() {
        let pool = ObjectPool::new(PoolConfig::new("temp", 2, || 1u8).with_prefill(2));
        let held = pool.acquire().unwrap();

        pool.destroy();
        assert!(matches!(pool.acquire(), Err(PoolError::Destroyed(_))));
        assert_eq!(pool.idle_count(), 0);
        drop(held);
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.is_destroyed());
    }

    #[test]
    fn test_managed_pool_downcast() {
        let (pool, _) = counting_pool(1);
        let managed: Arc<dyn ManagedPool> = Arc::new(pool);
        assert_eq!(managed.name(), "buffers");
        assert!(managed.as_any().downcast_ref::<ObjectPool<Vec<u8>>>().is_some());
        assert!(managed.as_any().downcast_ref::<ObjectPool<String>>().is_none());
    }
}
