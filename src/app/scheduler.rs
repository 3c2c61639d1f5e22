// TailSleuth - app/scheduler.rs
//
// Process-wide periodic and deferred task execution.
//
// Architecture:
//   - `PooledScheduler` owns one timer thread and a rayon worker pool.  The
//     timer thread sleeps on a condvar until the next task is due, then hands
//     due tasks to the pool, so ticks of different tasks run in parallel.
//   - Periodic tasks are single-flight: a task is not dispatched again while
//     its previous run is queued or executing.  A tick that would overlap is
//     skipped, not queued.
//   - Every run holds its task's body mutex from the cancelled check until
//     the body returns.  `cancel` sets the flag and then takes the same mutex,
//     so it waits for a run in progress and once it returns no run can start.
//     A task cancelling itself from inside its body skips the wait.
//   - The tracing dispatcher current at scheduling time is re-installed on the
//     worker for every run so background events reach the caller's subscriber.
//   - `ManualScheduler` runs everything on the calling thread when asked.
//     Deterministic; used by tests and single-threaded embedders.
//
// Panics inside a task are caught by the pool's panic handler and logged; the
// task's bookkeeping is released by drop guards so it keeps ticking.

use crate::util::constants::SCHEDULER_IDLE_WAIT_MS;
use crate::util::error::SchedulerError;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::Dispatch;

/// Body of a periodic task.
pub type PeriodicFn = Box<dyn FnMut() + Send + 'static>;

/// Body of a one-off task.
pub type OnceFn = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a periodic task registered with a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// Periodic and deferred execution facility.
pub trait TaskScheduler: Send + Sync {
    /// Run `task` every `interval` until cancelled.  The first run happens
    /// one interval from now.
    fn schedule_periodic(&self, name: &str, interval: Duration, task: PeriodicFn) -> TaskHandle;

    /// Stop a periodic task.  Waits for a run in progress (unless called from
    /// that run), and after it returns no run of the task starts.
    /// Returns `false` if the handle was unknown or already cancelled.
    fn cancel(&self, handle: TaskHandle) -> bool;

    /// Run `task` once in the background.  The returned completion resolves
    /// when the task has finished (or panicked).
    fn run_once(&self, name: &str, task: OnceFn) -> Completion;
}

// =============================================================================
// Completion
// =============================================================================

/// One-shot latch signalling that a piece of background work has finished.
///
/// Cloning shares the latch; any clone may wait on or resolve it.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Completion {
    /// An unresolved completion.
    pub fn new() -> Self {
        Self::default()
    }

    /// A completion that has already resolved.
    pub fn completed() -> Self {
        let completion = Self::new();
        completion.complete();
        completion
    }

    /// Resolve the completion and wake every waiter.  Idempotent.
    pub fn complete(&self) {
        let (done, cvar) = &*self.inner;
        *done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until resolved.
    pub fn wait(&self) {
        let (done, cvar) = &*self.inner;
        let mut guard = done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*guard {
            guard = cvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until resolved or `timeout` elapses.  Returns whether resolved.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (done, cvar) = &*self.inner;
        let guard = done.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Resolves a completion when dropped, including during a panic unwind.
struct CompleteOnDrop(Completion);

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        self.0.complete();
    }
}

// =============================================================================
// Periodic task bookkeeping (shared by both schedulers)
// =============================================================================

std::thread_local! {
    /// Address of the periodic task whose body is executing on this thread.
    /// Handles are only unique per scheduler, so the task itself is the key.
    static RUNNING_TASK: Cell<Option<usize>> = const { Cell::new(None) };
}

struct PeriodicTask {
    handle: TaskHandle,
    name: String,
    interval: Duration,
    /// Set while a run is queued on the pool or executing.
    in_flight: AtomicBool,
    /// `true` once cancelled.  Checked with `body` locked right before each run.
    cancelled: AtomicBool,
    /// Locked for the whole run; doubles as the cancellation gate.
    body: Mutex<PeriodicFn>,
    dispatch: Dispatch,
}

impl PeriodicTask {
    fn new(handle: TaskHandle, name: &str, interval: Duration, body: PeriodicFn) -> Self {
        Self {
            handle,
            name: name.to_string(),
            interval,
            in_flight: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            body: Mutex::new(body),
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }

    /// Claim the single-flight slot.  `false` if a run is already pending.
    fn try_claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Close the gate, then wait for a run in progress to finish.  A task
    /// cancelling itself from its own body does not wait.
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if RUNNING_TASK.with(Cell::get) == Some(self.address()) {
            tracing::trace!(task = %self.name, "Task cancelled itself");
            return;
        }
        drop(self.body.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Execute one run if the task has not been cancelled.  The caller must
    /// have claimed the single-flight slot.
    fn execute(&self) {
        let _release = ReleaseOnDrop(&self.in_flight);

        let mut body = self.body.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancelled.load(Ordering::SeqCst) {
            tracing::trace!(task = %self.name, "Skipping run of cancelled task");
            return;
        }

        let previous = RUNNING_TASK.with(|running| running.replace(Some(self.address())));
        let _restore = RestoreRunningTask(previous);
        let run: &mut PeriodicFn = &mut body;
        tracing::dispatcher::with_default(&self.dispatch, || run());
    }
}

struct RestoreRunningTask(Option<usize>);

impl Drop for RestoreRunningTask {
    fn drop(&mut self) {
        RUNNING_TASK.with(|running| running.set(self.0));
    }
}

struct ReleaseOnDrop<'a>(&'a AtomicBool);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wrap a one-off task so it runs under the scheduling thread's subscriber
/// and always resolves its completion.
fn prepare_once(task: OnceFn) -> (OnceFn, Completion) {
    let completion = Completion::new();
    let guard = CompleteOnDrop(completion.clone());
    let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
    let wrapped: OnceFn = Box::new(move || {
        let _guard = guard;
        tracing::dispatcher::with_default(&dispatch, task);
    });
    (wrapped, completion)
}

// =============================================================================
// PooledScheduler
// =============================================================================

struct ScheduleEntry {
    task: Arc<PeriodicTask>,
    next_due: Instant,
}

#[derive(Default)]
struct TimerState {
    entries: Vec<ScheduleEntry>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
    pool: rayon::ThreadPool,
}

/// Scheduler backed by a timer thread and a rayon worker pool.
pub struct PooledScheduler {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    timer: Option<JoinHandle<()>>,
}

impl PooledScheduler {
    /// Start a scheduler with `worker_threads` pool threads (0 = one per core).
    pub fn new(worker_threads: usize) -> Result<Self, SchedulerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("tailsleuth-worker-{i}"))
            .panic_handler(|_| tracing::error!("Scheduled task panicked"))
            .build()
            .map_err(|source| SchedulerError::Pool { source })?;

        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
            pool,
        });

        let timer_shared = Arc::clone(&shared);
        let timer = std::thread::Builder::new()
            .name("tailsleuth-timer".to_string())
            .spawn(move || run_timer(&timer_shared))
            .map_err(|source| SchedulerError::TimerThread { source })?;

        tracing::debug!(
            workers = shared.pool.current_num_threads(),
            "Scheduler started"
        );

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            timer: Some(timer),
        })
    }

    /// Number of periodic tasks currently scheduled.
    pub fn scheduled_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

impl TaskScheduler for PooledScheduler {
    fn schedule_periodic(&self, name: &str, interval: Duration, task: PeriodicFn) -> TaskHandle {
        let handle = TaskHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = Arc::new(PeriodicTask::new(handle, name, interval, task));

        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.push(ScheduleEntry {
            task,
            next_due: Instant::now() + interval,
        });
        drop(state);
        self.shared.wakeup.notify_all();

        tracing::debug!(task = name, interval_ms = interval.as_millis() as u64, "Task scheduled");
        handle
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = state.entries.iter().position(|e| e.task.handle == handle) else {
            return false;
        };
        let entry = state.entries.swap_remove(pos);
        drop(state);

        entry.task.cancel();
        tracing::debug!(task = %entry.task.name, "Task cancelled");
        true
    }

    fn run_once(&self, name: &str, task: OnceFn) -> Completion {
        let (wrapped, completion) = prepare_once(task);
        tracing::trace!(task = name, "One-off task queued");
        self.shared.pool.spawn(wrapped);
        completion
    }
}

impl Drop for PooledScheduler {
    fn drop(&mut self) {
        let entries: Vec<ScheduleEntry> = {
            let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
            state.entries.drain(..).collect()
        };
        self.shared.wakeup.notify_all();
        for entry in entries {
            entry.task.cancel();
        }
        if let Some(timer) = self.timer.take() {
            if timer.join().is_err() {
                tracing::warn!("Scheduler timer thread panicked");
            }
        }
        tracing::debug!("Scheduler stopped");
    }
}

/// Timer loop: dispatch due tasks, then sleep until the next one is due.
fn run_timer(shared: &Shared) {
    let idle_wait = Duration::from_millis(SCHEDULER_IDLE_WAIT_MS);
    let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);

    while !state.shutdown {
        let now = Instant::now();
        let mut next_wake = now + idle_wait;

        for entry in state.entries.iter_mut() {
            if entry.next_due <= now {
                entry.next_due += entry.task.interval;
                // Fell behind (slow tick or suspended process): don't burst.
                if entry.next_due <= now {
                    entry.next_due = now + entry.task.interval;
                }

                if entry.task.try_claim() {
                    let task = Arc::clone(&entry.task);
                    shared.pool.spawn(move || task.execute());
                } else {
                    tracing::trace!(task = %entry.task.name, "Previous run still in flight; tick skipped");
                }
            }
            next_wake = next_wake.min(entry.next_due);
        }

        let timeout = next_wake.saturating_duration_since(Instant::now());
        state = shared
            .wakeup
            .wait_timeout(state, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

// =============================================================================
// ManualScheduler
// =============================================================================

#[derive(Default)]
struct ManualState {
    periodic: Vec<Arc<PeriodicTask>>,
    pending: Vec<OnceFn>,
}

/// Scheduler that only runs work when `run_pending` is called, on the calling
/// thread.  Intervals are ignored: every periodic task runs once per call.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued one-off task, then every periodic task once.
    pub fn run_pending(&self) {
        let (periodic, pending) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.periodic.clone(), std::mem::take(&mut state.pending))
        };

        for task in pending {
            task();
        }
        for task in periodic {
            if task.try_claim() {
                task.execute();
            }
        }
    }

    /// Call `run_pending` `times` times.
    pub fn run_pending_times(&self, times: usize) {
        for _ in 0..times {
            self.run_pending();
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .periodic
            .len()
    }

    pub fn pending_once_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule_periodic(&self, name: &str, interval: Duration, task: PeriodicFn) -> TaskHandle {
        let handle = TaskHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = Arc::new(PeriodicTask::new(handle, name, interval, task));
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .periodic
            .push(task);
        handle
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = state.periodic.iter().position(|t| t.handle == handle) else {
            return false;
        };
        let task = state.periodic.remove(pos);
        drop(state);
        task.cancel();
        true
    }

    fn run_once(&self, _name: &str, task: OnceFn) -> Completion {
        let (wrapped, completion) = prepare_once(task);
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .push(wrapped);
        completion
    }
}
