//! Periodic background purge.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A unit of periodic cleanup.
pub trait SweepTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Remove expired records. Returns how many were removed.
    fn sweep(&self) -> usize;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<(&'static str, usize)>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.removed.iter().map(|(_, n)| n).sum()
    }
}

pub struct Sweeper {
    tasks: Vec<Arc<dyn SweepTask>>,
    interval: Duration,
    running: AtomicBool,
}

impl Sweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_task(mut self, task: Arc<dyn SweepTask>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Run every task once. Returns `None` if a sweep is already running.
    pub fn sweep_once(&self) -> Option<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sweep already in progress, skipping");
            return None;
        }
        let _guard = RunningGuard(&self.running);

        let removed = self
            .tasks
            .iter()
            .map(|task| {
                let name = task.name();
                let removed = catch_unwind(AssertUnwindSafe(|| task.sweep())).unwrap_or_else(|_| {
                    error!(task = name, "Sweep task panicked");
                    metrics::counter!("sweeper.task_panics").increment(1);
                    0
                });
                (name, removed)
            })
            .collect();

        let report = SweepReport { removed };
        metrics::counter!("sweeper.runs").increment(1);
        metrics::counter!("sweeper.removed").increment(report.total() as u64);
        Some(report)
    }

    /// Sweep on a fixed interval until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            info!(interval_secs = self.interval.as_secs(), "Sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(report) = self.sweep_once() {
                            if report.total() > 0 {
                                debug!(removed = ?report.removed, "Sweep complete");
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Clears the in-progress flag however the sweep exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTask {
        calls: AtomicUsize,
    }

    impl SweepTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn sweep(&self) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    /// Calls back into the sweeper while a sweep is running.
    struct ReentrantTask {
        sweeper: parking_lot::Mutex<Option<Arc<Sweeper>>>,
        nested: AtomicBool,
    }

    impl SweepTask for ReentrantTask {
        fn name(&self) -> &'static str {
            "reentrant"
        }

        fn sweep(&self) -> usize {
            if let Some(sweeper) = self.sweeper.lock().clone() {
                self.nested
                    .store(sweeper.sweep_once().is_some(), Ordering::SeqCst);
            }
            0
        }
    }

    #[test]
    fn test_sweep_once_runs_all_tasks() {
        let a = Arc::new(CountingTask::default());
        let sweeper = Sweeper::new(Duration::from_secs(60))
            .with_task(a.clone())
            .with_task(a.clone());
        let report = sweeper.sweep_once().unwrap();
        assert_eq!(report.removed, vec![("counting", 1), ("counting", 2)]);
        assert_eq!(report.total(), 3);
    }

    struct PanickingTask;

    impl SweepTask for PanickingTask {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn sweep(&self) -> usize {
            panic!("sweep failed");
        }
    }

    #[test]
    fn test_panicking_task_does_not_stall_later_sweeps() {
        let counting = Arc::new(CountingTask::default());
        let sweeper = Sweeper::new(Duration::from_secs(60))
            .with_task(Arc::new(PanickingTask))
            .with_task(counting.clone());

        let report = sweeper.sweep_once().unwrap();
        assert_eq!(report.removed, vec![("panicking", 0), ("counting", 1)]);
        let report = sweeper.sweep_once().unwrap();
        assert_eq!(report.removed, vec![("panicking", 0), ("counting", 2)]);
    }

    #[test]
    fn test_guard_releases_flag_on_unwind() {
        let sweeper = Sweeper::new(Duration::from_secs(60));
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            sweeper
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .unwrap();
            let _guard = RunningGuard(&sweeper.running);
            panic!("unwinding mid-sweep");
        }));
        assert!(result.is_err());
        assert!(sweeper.sweep_once().is_some());
    }

    #[test]
    fn test_overlapping_sweep_is_skipped() {
        let task = Arc::new(ReentrantTask {
            sweeper: parking_lot::Mutex::new(None),
            nested: AtomicBool::new(true),
        });
        let sweeper = Arc::new(Sweeper::new(Duration::from_secs(60)).with_task(task.clone()));
        *task.sweeper.lock() = Some(sweeper.clone());

        assert!(sweeper.sweep_once().is_some());
        assert!(!task.nested.load(Ordering::SeqCst));
        // Guard released afterwards.
        *task.sweeper.lock() = None;
        assert!(sweeper.sweep_once().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_ticks_and_stops() {
        let task = Arc::new(CountingTask::default());
        let sweeper = Arc::new(Sweeper::new(Duration::from_secs(60)).with_task(task.clone()));
        let (tx, rx) = watch::channel(false);
        let handle = sweeper.spawn(rx);

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(task.calls.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
