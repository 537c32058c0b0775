//! memgov demo
//!
//! Builds a governor with short intervals, registers a pool and some
//! tracked objects, lets the monitors run for a few seconds and prints the
//! memory report.

use anyhow::Result;
use memgov::{EventKind, EventPayload, MemoryConfig, MemoryOrchestrator, PoolConfig, PoolStrategy};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    let governor = MemoryOrchestrator::builder()
        .patch(
            MemoryConfig::builder()
                .max_memory(64 * 1024 * 1024)
                .gc_threshold(0.75)
                .gc_interval_ms(1000)
                .auto_cleanup_interval_ms(2000)
                .max_pool_age_ms(1500),
        )
        .build()?;

    governor.on(EventKind::MemoryPressure, |event| {
        if let EventPayload::MemoryPressure(info) = &event.payload {
            info!(
                "Pressure {} ({:.1}%): {}",
                info.level,
                info.pressure * 100.0,
                info.recommendation
            );
        }
    });
    governor.on(EventKind::GcCompleted, |event| {
        if let EventPayload::GcCompleted(result) = &event.payload {
            info!(
                "Collection pass ({:?}): {} objects, {} bytes freed",
                result.trigger, result.objects_collected, result.freed_memory
            );
        }
    });
    governor.on(EventKind::ErrorOccurred, |event| {
        if let EventPayload::ErrorOccurred { operation, error, .. } = &event.payload {
            warn!("{} failed: {}", operation, error);
        }
    });

    let buffers = governor.create_pool(
        PoolConfig::new("buffers", 8, || vec![0u8; 64 * 1024])
            .with_reset(|buf: &mut Vec<u8>| buf.fill(0))
            .with_strategy(PoolStrategy::Lru)
            .with_prefill(4),
    )?;

    governor.start()?;

    let session = Arc::new(vec![0u8; 256 * 1024]);
    governor.register_object(&session, "session-1");

    for round in 0..5 {
        let scratch: Vec<Arc<Vec<u8>>> =
            (0..16).map(|_| Arc::new(vec![round as u8; 4096])).collect();
        for obj in &scratch {
            governor.track_object(obj, "scratch", 4096);
        }

        let mut buf = buffers.acquire()?;
        buf[0] = round as u8;
        drop(buf);
        drop(scratch);

        thread::sleep(Duration::from_millis(800));
    }

    let result = governor.force_gc();
    info!("Manual pass succeeded: {}", result.success);

    println!("{}", governor.get_memory_report());
    println!("{}", serde_json::to_string_pretty(&governor.get_performance_metrics())?);

    governor.destroy()?;
    Ok(())
}
