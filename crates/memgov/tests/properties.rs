use memgov::{
    ConfigGovernor, EventBus, EventBusConfig, EventPayload, MemoryConfig, MemoryOrchestrator,
    ObjectPool, PoolConfig, PoolStrategy, PressureLevel,
};
use proptest::prelude::*;
use std::time::Duration;

fn strategy() -> impl Strategy<Value = PoolStrategy> {
    prop_oneof![Just(PoolStrategy::Lru), Just(PoolStrategy::Fifo)]
}

proptest! {
    #[test]
    fn test_valid_ranges_always_validate(
        max_memory in 1i64..=(1i64 << 40),
        gc_threshold in 0.1f64..=1.0,
        gc_interval in 1000i64..=86_400_000,
        cleanup_interval in 1000i64..=86_400_000,
    ) {
        let patch = MemoryConfig::builder()
            .max_memory(max_memory)
            .gc_threshold(gc_threshold)
            .gc_interval_ms(gc_interval)
            .auto_cleanup_interval_ms(cleanup_interval);

        let governor = ConfigGovernor::default();
        prop_assert!(governor.validate(&patch).is_valid);

        let config = patch.build().unwrap();
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_threshold_rejected(
        gc_threshold in prop_oneof![-10.0f64..0.0999, 1.0001f64..10.0],
    ) {
        let governor = ConfigGovernor::default();
        let before = governor.config();
        let patch = MemoryConfig::builder().gc_threshold(gc_threshold);

        prop_assert!(governor.merge_and_apply(&patch).is_err());
        prop_assert_eq!(governor.config(), before);
    }

    #[test]
    fn test_pressure_level_is_monotonic(
        max_memory in 1u64..=(1u64 << 40),
        gc_threshold in 0.5f64..0.95,
        a in 0u64..=(1u64 << 41),
        b in 0u64..=(1u64 << 41),
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let ratio = |usage: u64| usage as f64 / max_memory as f64;

        let low_level = PressureLevel::from_ratio(ratio(low), gc_threshold);
        let high_level = PressureLevel::from_ratio(ratio(high), gc_threshold);
        prop_assert!(low_level <= high_level);
        prop_assert_eq!(low_level, PressureLevel::from_ratio(ratio(low), gc_threshold));
    }

    #[test]
    fn test_should_trigger_gc_independent_triggers(
        usage in 0u64..=(1u64 << 31),
        elapsed_ms in 0u64..=120_000,
    ) {
        let governor = ConfigGovernor::default();
        let config = governor.config();
        let pressure = usage as f64 / config.max_memory as f64;
        let elapsed = Duration::from_millis(elapsed_ms);

        let expected = pressure >= config.gc_threshold || elapsed >= config.gc_interval();
        prop_assert_eq!(governor.should_trigger_gc(usage, elapsed), expected);
        if pressure >= config.gc_threshold {
            prop_assert!(governor.should_trigger_gc(usage, Duration::ZERO));
        }
        prop_assert!(governor.should_trigger_gc(usage, config.gc_interval()));
    }

    #[test]
    fn test_event_history_never_exceeds_bound(
        max_history in 1usize..50,
        emitted in 0usize..200,
    ) {
        let bus = EventBus::new(EventBusConfig { max_history, log_events: false });
        for i in 0..emitted {
            bus.emit(EventPayload::LeakDetected { candidate_ids: vec![i.to_string()] });
        }

        let history = bus.history(None, None);
        prop_assert_eq!(history.len(), emitted.min(max_history));

        // Oldest evicted first: the survivors are the most recent ones
        if let Some(first) = history.first() {
            match &first.payload {
                EventPayload::LeakDetected { candidate_ids } => {
                    let expected = emitted.saturating_sub(max_history).to_string();
                    prop_assert_eq!(&candidate_ids[0], &expected);
                }
                other => prop_assert!(false, "unexpected payload: {:?}", other),
            }
        }
    }

    #[test]
    fn test_pool_idle_never_exceeds_capacity(
        capacity in 0usize..8,
        strategy in strategy(),
        ops in prop::collection::vec(any::<bool>(), 0..64),
    ) {
        let pool =
            ObjectPool::new(PoolConfig::new("prop", capacity, || 0u32).with_strategy(strategy));
        let mut held = Vec::new();

        for acquire in ops {
            if acquire || held.is_empty() {
                held.push(pool.acquire().unwrap());
            } else {
                held.pop();
            }
            prop_assert!(pool.idle_count() <= capacity);
        }
        drop(held);
        prop_assert!(pool.idle_count() <= capacity);
        prop_assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_force_gc_freed_memory_never_negative(
        before in 0u64..=(1u64 << 40),
        after in 0u64..=(1u64 << 40),
    ) {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU64, Ordering};

        let usage = Arc::new(AtomicU64::new(before));
        let probe = usage.clone();
        let orchestrator = MemoryOrchestrator::builder()
            .usage_probe(move || Some(probe.load(Ordering::SeqCst)))
            .reclaimer(move || -> anyhow::Result<()> {
                usage.store(after, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();

        let result = orchestrator.force_gc();
        prop_assert!(result.success);
        prop_assert_eq!(result.freed_memory, before.saturating_sub(after));
    }
}
