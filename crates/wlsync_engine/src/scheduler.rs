//! Debounced, single-flight scheduling of reconciliation passes.
//!
//! State machine:
//!
//! ```text
//! Idle       --trigger-->            Scheduled (deadline = now + debounce)
//! Scheduled  --trigger-->            Scheduled (deadline restarts)
//! Scheduled  --deadline-->           Running
//! Running    --trigger-->            RunPending
//! RunPending --trigger-->            RunPending
//! Running    --pass done-->          Idle
//! RunPending --pass done-->          Scheduled (deadline = now + debounce)
//! ```
//!
//! One driver task owns the transitions out of `Scheduled` and `Running`,
//! so at most one pass is ever in flight.

use crate::error::{EngineError, EngineResult};
use crate::reconcile::{ReconcileReport, Reconciler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// A unit of work the scheduler runs once per pass.
#[async_trait]
pub trait ReconcileTask: Send + Sync {
    /// Runs one reconciliation pass.
    async fn run_pass(&self) -> EngineResult<ReconcileReport>;
}

#[async_trait]
impl ReconcileTask for Reconciler {
    async fn run_pass(&self) -> EngineResult<ReconcileReport> {
        self.reconcile().await
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing to do.
    Idle,
    /// A pass will start at the deadline.
    Scheduled,
    /// A pass is in flight.
    Running,
    /// A pass is in flight and another was requested.
    RunPending,
}

impl SchedulerState {
    /// Returns true if a pass is in flight.
    pub fn is_running(&self) -> bool {
        matches!(self, SchedulerState::Running | SchedulerState::RunPending)
    }
}

/// Completion record published after every pass.
#[derive(Debug, Clone, Default)]
pub struct PassRecord {
    /// Number of passes completed so far.
    pub completed: u64,
    /// Result of the latest pass.
    pub last: Option<Result<ReconcileReport, String>>,
}

#[derive(Debug)]
struct Inner {
    state: SchedulerState,
    deadline: Option<Instant>,
    started: u64,
    stopped: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Notify,
    passes: watch::Sender<PassRecord>,
    debounce: Duration,
}

impl Shared {
    fn stopped(&self) -> bool {
        self.inner.lock().stopped
    }
}

struct Driver(JoinHandle<()>);

impl Drop for Driver {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Coalesces triggers into debounced reconciliation passes.
///
/// Cloning yields another handle to the same scheduler. The driver task
/// stops when the last handle is dropped or [`shutdown`](Self::shutdown)
/// is called.
#[derive(Clone)]
pub struct UpdateScheduler {
    shared: Arc<Shared>,
    _driver: Arc<Driver>,
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("state", &self.state())
            .field("debounce", &self.shared.debounce)
            .finish()
    }
}

impl UpdateScheduler {
    /// Starts the driver task on the current runtime.
    pub fn start(task: Arc<dyn ReconcileTask>, debounce: Duration) -> Self {
        let (passes, _) = watch::channel(PassRecord::default());
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                deadline: None,
                started: 0,
                stopped: false,
            }),
            wake: Notify::new(),
            passes,
            debounce,
        });
        let handle = tokio::spawn(drive(Arc::clone(&shared), task));
        Self {
            shared,
            _driver: Arc::new(Driver(handle)),
        }
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.shared.inner.lock().state
    }

    /// Number of passes completed.
    pub fn passes_completed(&self) -> u64 {
        self.shared.passes.borrow().completed
    }

    /// Requests a pass.
    ///
    /// Returns the number of the first pass that will observe the request.
    pub fn trigger(&self) -> u64 {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            SchedulerState::Idle | SchedulerState::Scheduled => {
                inner.state = SchedulerState::Scheduled;
                inner.deadline = Some(Instant::now() + self.shared.debounce);
            }
            SchedulerState::Running => {
                debug!("pass in flight, deferring trigger");
                inner.state = SchedulerState::RunPending;
            }
            SchedulerState::RunPending => {}
        }
        let target = inner.started + 1;
        drop(inner);
        self.shared.wake.notify_one();
        target
    }

    /// Requests a pass and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns `PassFailed` if the pass could not resolve membership and
    /// `SchedulerStopped` if the scheduler shut down first.
    pub async fn trigger_and_wait(&self) -> EngineResult<ReconcileReport> {
        let mut passes = self.shared.passes.subscribe();
        let target = self.trigger();
        loop {
            {
                let record = passes.borrow_and_update();
                if record.completed >= target {
                    return match &record.last {
                        Some(Ok(report)) => Ok(report.clone()),
                        Some(Err(message)) => Err(EngineError::PassFailed(message.clone())),
                        None => Err(EngineError::SchedulerStopped),
                    };
                }
            }
            if self.shared.stopped() {
                return Err(EngineError::SchedulerStopped);
            }
            passes
                .changed()
                .await
                .map_err(|_| EngineError::SchedulerStopped)?;
        }
    }

    /// Waits until no pass is scheduled or running.
    pub async fn settle(&self) {
        let mut passes = self.shared.passes.subscribe();
        loop {
            if self.state() == SchedulerState::Idle || self.shared.stopped() {
                return;
            }
            if passes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stops the driver once the current pass, if any, has finished.
    pub fn shutdown(&self) {
        self.shared.inner.lock().stopped = true;
        self.shared.wake.notify_one();
        self.shared.passes.send_modify(|_| {});
    }
}

async fn drive(shared: Arc<Shared>, task: Arc<dyn ReconcileTask>) {
    loop {
        let deadline = {
            let inner = shared.inner.lock();
            if inner.stopped {
                break;
            }
            match inner.state {
                SchedulerState::Scheduled => inner.deadline,
                _ => None,
            }
        };

        match deadline {
            None => {
                shared.wake.notified().await;
                continue;
            }
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shared.wake.notified() => continue,
                }
            }
        }

        let number = {
            let mut inner = shared.inner.lock();
            if inner.stopped {
                break;
            }
            let due = matches!(inner.deadline, Some(d) if Instant::now() >= d);
            if inner.state != SchedulerState::Scheduled || !due {
                continue;
            }
            inner.state = SchedulerState::Running;
            inner.deadline = None;
            inner.started += 1;
            inner.started
        };

        debug!(pass = number, "starting reconciliation pass");
        // Own task, so a panicking pass cannot take the driver down with it
        let pass = tokio::spawn({
            let task = Arc::clone(&task);
            async move { task.run_pass().await }
        });
        let result = match pass.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::PassFailed(format!("pass aborted: {e}"))),
        };
        if let Err(e) = &result {
            error!(pass = number, error = %e, "reconciliation pass failed");
        }

        {
            let mut inner = shared.inner.lock();
            if inner.state == SchedulerState::RunPending {
                info!("update requested during pass, rescheduling");
                inner.state = SchedulerState::Scheduled;
                inner.deadline = Some(Instant::now() + shared.debounce);
            } else {
                inner.state = SchedulerState::Idle;
            }
        }
        shared.passes.send_modify(|record| {
            record.completed = number;
            record.last = Some(result.map_err(|e| e.to_string()));
        });
    }
    debug!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts passes and how many overlap.
    #[derive(Default)]
    struct CountingTask {
        passes: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_next: AtomicBool,
        panic_next: AtomicBool,
        duration: Duration,
    }

    impl CountingTask {
        fn taking(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                ..Self::default()
            })
        }

        fn passes(&self) -> usize {
            self.passes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReconcileTask for CountingTask {
        async fn run_pass(&self) -> EngineResult<ReconcileReport> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("reconciler bug");
            }
            self.passes.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(EngineError::Resolution("guild unavailable".into()));
            }
            Ok(ReconcileReport::default())
        }
    }

    const DEBOUNCE: Duration = Duration::from_secs(5);

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_pass() {
        let task = CountingTask::taking(Duration::from_millis(10));
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        scheduler.trigger();
        sleep_ms(1000).await;
        scheduler.trigger();
        assert_eq!(scheduler.state(), SchedulerState::Scheduled);

        // The second trigger restarted the window
        sleep_ms(4500).await;
        assert_eq!(task.passes(), 0);

        sleep_ms(1000).await;
        assert_eq!(task.passes(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        sleep_ms(20_000).await;
        assert_eq!(task.passes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_during_pass_runs_exactly_one_more() {
        let task = CountingTask::taking(Duration::from_secs(2));
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        scheduler.trigger();
        sleep_ms(5500).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.trigger();
        scheduler.trigger();
        assert_eq!(scheduler.state(), SchedulerState::RunPending);

        // First pass ends at ~7s, second starts at ~12s and ends at ~14s
        sleep_ms(2000).await;
        assert_eq!(task.passes(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Scheduled);

        sleep_ms(10_000).await;
        assert_eq!(task.passes(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(task.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_and_wait_returns_report() {
        let task = CountingTask::taking(Duration::from_millis(10));
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        let report = scheduler.trigger_and_wait().await.unwrap();
        assert!(report.servers.is_empty());
        assert_eq!(scheduler.passes_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_during_pass_waits_for_the_next_one() {
        let task = CountingTask::taking(Duration::from_secs(2));
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        scheduler.trigger();
        sleep_ms(5500).await;
        assert!(scheduler.state().is_running());

        scheduler.trigger_and_wait().await.unwrap();
        assert_eq!(task.passes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pass_is_reported_and_scheduler_continues() {
        let task = CountingTask::taking(Duration::from_millis(10));
        task.fail_next.store(true, Ordering::SeqCst);
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        let err = scheduler.trigger_and_wait().await.unwrap_err();
        assert!(matches!(err, EngineError::PassFailed(message) if message.contains("guild")));

        scheduler.trigger_and_wait().await.unwrap();
        assert_eq!(task.passes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_pass_is_reported_and_scheduler_continues() {
        let task = CountingTask::taking(Duration::from_millis(10));
        task.panic_next.store(true, Ordering::SeqCst);
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        let err = scheduler.trigger_and_wait().await.unwrap_err();
        assert!(matches!(err, EngineError::PassFailed(message) if message.contains("aborted")));
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.trigger_and_wait().await.unwrap();
        assert_eq!(task.passes(), 1);
        assert_eq!(scheduler.passes_completed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_waits_for_pending_work() {
        let task = CountingTask::taking(Duration::from_millis(10));
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        scheduler.settle().await;
        assert_eq!(task.passes(), 0);

        scheduler.trigger();
        scheduler.settle().await;
        assert_eq!(task.passes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_scheduler_rejects_waiters() {
        let task = CountingTask::taking(Duration::from_millis(10));
        let scheduler = UpdateScheduler::start(task.clone(), DEBOUNCE);

        scheduler.shutdown();
        let err = scheduler.trigger_and_wait().await.unwrap_err();
        assert!(matches!(err, EngineError::SchedulerStopped));
        sleep_ms(10_000).await;
        assert_eq!(task.passes(), 0);
    }
}
