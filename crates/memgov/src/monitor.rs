//! Monitor scheduler.
//!
//! One named thread drives the pressure, performance and cleanup monitors.
//! Each monitor has its own `tick` timer and the loop runs whichever fires
//! to completion before selecting again, so ticks never interleave.
//!
//! The thread holds only a weak handle to its target. When the target is
//! dropped the loop exits on the next tick.

use crate::error::panic_message;
use crossbeam_channel::{never, select, tick, unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fixed interval of the performance monitor
pub const PERFORMANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Name of the scheduler thread
pub const MONITOR_THREAD_NAME: &str = "memgov-monitor";

/// Which periodic monitor fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    Pressure,
    Performance,
    Cleanup,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pressure => "pressure",
            Self::Performance => "performance",
            Self::Cleanup => "cleanup",
        }
    }
}

/// Callbacks run by the scheduler thread
pub(crate) trait MonitorTarget: Send + Sync + 'static {
    fn on_tick(&self, kind: MonitorKind);

    /// A tick panicked; the scheduler keeps running
    fn on_tick_panic(&self, kind: MonitorKind, message: String);
}

/// Timer intervals for the three monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSchedule {
    pub gc: Duration,
    pub cleanup: Duration,
    /// `None` disables the performance monitor
    pub performance: Option<Duration>,
}

/// Control messages for the scheduler thread
#[derive(Debug)]
pub(crate) enum MonitorCommand {
    Stop,
    Reschedule(MonitorSchedule),
}

/// Owner-side handle of a running scheduler
pub(crate) struct MonitorHandle {
    control: Sender<MonitorCommand>,
    running: Arc<AtomicBool>,
    thread_id: ThreadId,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Spawn the scheduler thread
    pub fn spawn<T: MonitorTarget>(
        target: Weak<T>,
        schedule: MonitorSchedule,
    ) -> std::io::Result<Self> {
        let (control, commands) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = thread::Builder::new()
            .name(MONITOR_THREAD_NAME.to_string())
            .spawn(move || {
                info!(
                    gc = ?schedule.gc,
                    cleanup = ?schedule.cleanup,
                    performance = ?schedule.performance,
                    "Memory monitors started"
                );
                run_scheduler(target, schedule, commands, flag);
                info!("Memory monitors stopped");
            })?;

        Ok(Self {
            control,
            running,
            thread_id: thread.thread().id(),
            thread: Some(thread),
        })
    }

    /// Apply new intervals. Only timers whose interval changed restart;
    /// the others keep their phase.
    pub fn reschedule(&self, schedule: MonitorSchedule) {
        if self.control.send(MonitorCommand::Reschedule(schedule)).is_err() {
            debug!("Monitor thread already exited, reschedule ignored");
        }
    }

    /// Stop the scheduler. No tick starts after this returns.
    ///
    /// Joins the thread unless called from the scheduler thread itself, in
    /// which case the loop exits once the current tick completes.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.control.send(MonitorCommand::Stop);

        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread::current().id() == self.thread_id {
            debug!("Monitor stopped from its own thread, not joining");
            return;
        }
        if thread.join().is_err() {
            warn!("Monitor thread panicked during shutdown");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Step {
    Tick(MonitorKind),
    Reschedule(MonitorSchedule),
    Stop,
}

fn performance_timer(interval: Option<Duration>) -> Receiver<Instant> {
    interval.map_or_else(never, tick)
}

fn run_scheduler<T: MonitorTarget>(
    target: Weak<T>,
    schedule: MonitorSchedule,
    commands: Receiver<MonitorCommand>,
    running: Arc<AtomicBool>,
) {
    let mut current = schedule;
    let mut gc = tick(current.gc);
    let mut performance = performance_timer(current.performance);
    let mut cleanup = tick(current.cleanup);

    loop {
        let step = select! {
            recv(commands) -> cmd => match cmd {
                Ok(MonitorCommand::Reschedule(schedule)) => Step::Reschedule(schedule),
                Ok(MonitorCommand::Stop) | Err(_) => Step::Stop,
            },
            recv(gc) -> _ => Step::Tick(MonitorKind::Pressure),
            recv(performance) -> _ => Step::Tick(MonitorKind::Performance),
            recv(cleanup) -> _ => Step::Tick(MonitorKind::Cleanup),
        };

        let fired = match step {
            Step::Tick(kind) => kind,
            Step::Stop => break,
            Step::Reschedule(schedule) => {
                if schedule.gc != current.gc {
                    gc = tick(schedule.gc);
                }
                if schedule.performance != current.performance {
                    performance = performance_timer(schedule.performance);
                }
                if schedule.cleanup != current.cleanup {
                    cleanup = tick(schedule.cleanup);
                }
                if schedule != current {
                    debug!(
                        gc = ?schedule.gc,
                        cleanup = ?schedule.cleanup,
                        performance = ?schedule.performance,
                        "Rescheduling monitors"
                    );
                }
                current = schedule;
                continue;
            }
        };

        if !running.load(Ordering::SeqCst) {
            break;
        }
        let Some(target) = target.upgrade() else {
            debug!("Monitor target dropped");
            break;
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| target.on_tick(fired))) {
            let message = panic_message(payload);
            warn!(monitor = fired.as_str(), "Monitor tick panicked: {}", message);
            target.on_tick_panic(fired, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        ticks: Mutex<Vec<MonitorKind>>,
        panics: Mutex<Vec<String>>,
        panic_on_cleanup: bool,
    }

    impl MonitorTarget for Recorder {
        fn on_tick(&self, kind: MonitorKind) {
            self.ticks.lock().unwrap().push(kind);
            if self.panic_on_cleanup && kind == MonitorKind::Cleanup {
                panic!("cleanup failed");
            }
        }

        fn on_tick_panic(&self, _kind: MonitorKind, message: String) {
            self.panics.lock().unwrap().push(message);
        }
    }

    fn fast(performance: Option<Duration>) -> MonitorSchedule {
        MonitorSchedule {
            gc: Duration::from_millis(10),
            cleanup: Duration::from_millis(15),
            performance,
        }
    }

    #[test]
    fn test_ticks_fire_and_stop_halts() {
        let target = Arc::new(Recorder::default());
        let handle = MonitorHandle::spawn(Arc::downgrade(&target), fast(None)).unwrap();
        thread::sleep(Duration::from_millis(80));
        handle.stop();

        let ticks = target.ticks.lock().unwrap().clone();
        assert!(ticks.contains(&MonitorKind::Pressure));
        assert!(ticks.contains(&MonitorKind::Cleanup));
        assert!(!ticks.contains(&MonitorKind::Performance));

        let count = ticks.len();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(target.ticks.lock().unwrap().len(), count);
    }

    #[test]
    fn test_tick_panic_keeps_scheduler_alive() {
        let target = Arc::new(Recorder {
            panic_on_cleanup: true,
            ..Recorder::default()
        });
        let handle = MonitorHandle::spawn(Arc::downgrade(&target), fast(None)).unwrap();
        thread::sleep(Duration::from_millis(80));
        handle.stop();

        let panics = target.panics.lock().unwrap();
        assert!(panics.len() >= 2);
        assert_eq!(panics[0], "cleanup failed");
    }

    #[test]
    fn test_reschedule_enables_performance() {
        let target = Arc::new(Recorder::default());
        let slow = MonitorSchedule {
            gc: Duration::from_secs(60),
            cleanup: Duration::from_secs(60),
            performance: None,
        };
        let handle = MonitorHandle::spawn(Arc::downgrade(&target), slow).unwrap();
        handle.reschedule(MonitorSchedule {
            performance: Some(Duration::from_millis(10)),
            ..slow
        });
        thread::sleep(Duration::from_millis(60));
        handle.stop();

        let ticks = target.ticks.lock().unwrap();
        assert!(ticks.contains(&MonitorKind::Performance));
        assert!(!ticks.contains(&MonitorKind::Pressure));
    }

    #[test]
    fn test_reschedule_keeps_unchanged_timer_phase() {
        let target = Arc::new(Recorder::default());
        let schedule = MonitorSchedule {
            gc: Duration::from_millis(100),
            cleanup: Duration::from_secs(60),
            performance: None,
        };
        let handle = MonitorHandle::spawn(Arc::downgrade(&target), schedule).unwrap();

        // Faster than the gc interval; a full timer restart would starve it
        for step in 0..12u64 {
            handle.reschedule(MonitorSchedule {
                cleanup: Duration::from_secs(60 + step % 2),
                ..schedule
            });
            thread::sleep(Duration::from_millis(30));
        }
        handle.stop();

        let ticks = target.ticks.lock().unwrap();
        let pressure = ticks.iter().filter(|k| **k == MonitorKind::Pressure).count();
        assert!(pressure >= 2, "pressure ticks: {}", pressure);
        assert!(!ticks.contains(&MonitorKind::Cleanup));
    }

    #[test]
    fn test_thread_exits_when_target_dropped() {
        let target = Arc::new(Recorder::default());
        let handle = MonitorHandle::spawn(Arc::downgrade(&target), fast(None)).unwrap();
        drop(target);
        thread::sleep(Duration::from_millis(40));
        handle.stop();
    }
}
