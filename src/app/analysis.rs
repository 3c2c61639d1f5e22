// TailSleuth - app/analysis.rs
//
// A live analysis: re-runs every analyser of its template against the
// attached log files on a fixed polling interval and keeps the latest result
// of each analyser.
//
// Concurrency:
//   - Ticks run on scheduler workers and never overlap for one analysis
//     (the scheduler is single-flight per task).
//   - Analysers run outside every lock.  The result map is locked only to
//     insert one result or to copy the whole map for a snapshot, so a
//     snapshot always sees the map as it was at one instant.
//   - `stop` cancels the scheduled task first (no new tick starts), then
//     marks the result map closed so a tick that was already running cannot
//     write into a removed analysis.
//
// Failure handling: an analyser that errors or panics keeps its previous
// result; the failure is logged and counted and the remaining analysers of
// the same tick still run.

use crate::app::change_notifier::{ChangeNotifier, Subscription};
use crate::app::registry::AnalysisHandle;
use crate::app::scheduler::{TaskHandle, TaskScheduler};
use crate::core::analyser::AnalyserEngine;
use crate::core::log_file::LogFile;
use crate::core::model::{
    AnalyserId, AnalyserResult, AnalyserTemplate, AnalysisSnapshot, AnalysisTemplate,
};
use crate::util::constants::DEFAULT_MAX_LINES_PER_BATCH;
use crate::util::error::{error_chain, AnalyserError};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct AttachedLogFile {
    log_file: Arc<dyn LogFile>,
    _subscription: Subscription,
}

#[derive(Default)]
struct ResultMap {
    /// Set once the analysis is stopped; no further writes are accepted.
    closed: bool,
    results: HashMap<AnalyserId, AnalyserResult>,
}

/// State shared between the analysis and its scheduled tick.
struct AnalysisState {
    handle: AnalysisHandle,
    template: AnalysisTemplate,
    engine: Arc<dyn AnalyserEngine>,
    log_files: Mutex<Vec<AttachedLogFile>>,
    changes: Arc<ChangeNotifier>,
    results: Mutex<ResultMap>,
    ticks: AtomicU64,
    failures: AtomicU64,
    observed_changes: AtomicU64,
}

impl AnalysisState {
    fn tick(&self) {
        let log_files: Vec<Arc<dyn LogFile>> = self
            .log_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|f| Arc::clone(&f.log_file))
            .collect();

        let changes = self.changes.drain();
        self.observed_changes
            .fetch_add(changes as u64, Ordering::Relaxed);
        tracing::trace!(
            analysis = %self.handle,
            log_files = log_files.len(),
            changes,
            "Analysis tick"
        );

        for analyser in &self.template.analysers {
            match self.run_analyser(analyser, &log_files) {
                Ok(result) => {
                    let mut map = self.results.lock().unwrap_or_else(PoisonError::into_inner);
                    if map.closed {
                        tracing::debug!(
                            analysis = %self.handle,
                            "Analysis stopped during tick; discarding results"
                        );
                        return;
                    }
                    map.results.insert(
                        analyser.id.clone(),
                        AnalyserResult {
                            analyser_id: analyser.id.clone(),
                            result,
                        },
                    );
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        analysis = %self.handle,
                        analyser = %analyser.id,
                        kind = %analyser.kind,
                        error = %error_chain(&e),
                        "Analyser failed; keeping its previous result"
                    );
                }
            }
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn run_analyser(
        &self,
        analyser: &AnalyserTemplate,
        log_files: &[Arc<dyn LogFile>],
    ) -> Result<serde_json::Value, AnalyserError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.engine.run(analyser, log_files)))
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "analyser panicked".to_string());
                Err(AnalyserError::Failed {
                    kind: analyser.kind.clone(),
                    reason,
                })
            })
    }

    /// Copy of the current results in template order.
    fn current_results(&self) -> Vec<AnalyserResult> {
        let map = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        self.template
            .analysers
            .iter()
            .filter_map(|a| map.results.get(&a.id).cloned())
            .collect()
    }
}

/// An analysis that is currently executing.
///
/// Created and stopped only by `AnalysisRegistry`; everyone else gets shared,
/// read-mostly access through the registry.
pub struct ActiveAnalysis {
    state: Arc<AnalysisState>,
    scheduler: Arc<dyn TaskScheduler>,
    task: Mutex<Option<TaskHandle>>,
    poll_interval: Duration,
}

impl ActiveAnalysis {
    pub(crate) fn new(
        handle: AnalysisHandle,
        template: AnalysisTemplate,
        scheduler: Arc<dyn TaskScheduler>,
        engine: Arc<dyn AnalyserEngine>,
        poll_interval: Duration,
    ) -> Self {
        let state = Arc::new(AnalysisState {
            handle,
            template,
            engine,
            log_files: Mutex::new(Vec::new()),
            changes: Arc::new(ChangeNotifier::new()),
            results: Mutex::new(ResultMap::default()),
            ticks: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            observed_changes: AtomicU64::new(0),
        });

        let tick_state = Arc::clone(&state);
        let task = scheduler.schedule_periodic(
            &format!("analysis-{handle}"),
            poll_interval,
            Box::new(move || tick_state.tick()),
        );

        tracing::info!(
            analysis = %handle,
            name = %state.template.name,
            analysers = state.template.analysers.len(),
            interval_ms = poll_interval.as_millis() as u64,
            "Analysis started"
        );

        Self {
            state,
            scheduler,
            task: Mutex::new(Some(task)),
            poll_interval,
        }
    }

    pub fn handle(&self) -> AnalysisHandle {
        self.state.handle
    }

    /// The analysis' own copy of the template it was created from.
    pub fn template(&self) -> &AnalysisTemplate {
        &self.state.template
    }

    /// Attach a log file; it is visible to analysers from the next tick on.
    pub fn add_log_file(&self, log_file: Arc<dyn LogFile>) {
        let subscription = self.state.changes.register(
            Arc::clone(&log_file),
            self.poll_interval,
            DEFAULT_MAX_LINES_PER_BATCH,
        );
        self.state
            .log_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AttachedLogFile {
                log_file,
                _subscription: subscription,
            });
    }

    /// Detach a log file.  Returns `false` if it was not attached.
    pub fn remove_log_file(&self, log_file: &Arc<dyn LogFile>) -> bool {
        let target = Arc::as_ptr(log_file) as *const ();
        let mut files = self
            .state
            .log_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = files.len();
        files.retain(|f| Arc::as_ptr(&f.log_file) as *const () != target);
        files.len() != before
    }

    pub fn log_file_count(&self) -> usize {
        self.state
            .log_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Copy of the latest results, ordered like the template's analysers.
    pub fn current_results(&self) -> Vec<AnalyserResult> {
        self.state.current_results()
    }

    /// Immutable point-in-time copy of this analysis.
    pub fn create_snapshot(&self) -> AnalysisSnapshot {
        let results = self.state.current_results();
        AnalysisSnapshot::new(self.state.template.clone(), results)
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.state.ticks.load(Ordering::Relaxed)
    }

    /// Number of analyser failures across all ticks.
    pub fn failure_count(&self) -> u64 {
        self.state.failures.load(Ordering::Relaxed)
    }

    /// Number of log file change notifications seen by ticks so far.
    pub fn observed_changes(&self) -> u64 {
        self.state.observed_changes.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop ticking.  Synchronous: once this returns no tick starts, and a
    /// tick already in progress cannot store its results.  Idempotent.
    pub(crate) fn stop(&self) {
        let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        self.scheduler.cancel(task);
        self.state
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.state
            .log_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        tracing::info!(
            analysis = %self.state.handle,
            ticks = self.tick_count(),
            failures = self.failure_count(),
            "Analysis stopped"
        );
    }
}

impl Drop for ActiveAnalysis {
    fn drop(&mut self) {
        self.stop();
    }
}
