// TailSleuth - app/registry.rs
//
// Sole owner of every live `ActiveAnalysis` in the process.
//
// Analyses live in an arena of slots addressed by `AnalysisHandle`
// (slot index + generation).  Removing an analysis frees its slot and bumps
// the slot's generation, so a handle kept after removal can never reach a
// newer analysis that reuses the slot.
//
// One mutex guards the arena.  `create_new_analysis`, `remove` and `active`
// take it; `active` returns a copy so callers iterate without holding it.
// Stopping an analysis and writing snapshots happen after the lock is
// released.

use crate::app::analysis::ActiveAnalysis;
use crate::app::scheduler::{Completion, TaskScheduler};
use crate::app::snapshot_writer::SnapshotWriter;
use crate::core::analyser::AnalyserEngine;
use crate::core::model::{AnalysisSnapshot, AnalysisTemplate};
use crate::platform::fs::Filesystem;
use crate::util::constants;
use crate::util::error::{Result, TailSleuthError};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Stable, generation-checked reference to an analysis in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnalysisHandle {
    slot: u32,
    generation: u32,
}

impl AnalysisHandle {
    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }
}

impl fmt::Display for AnalysisHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot, self.generation)
    }
}

/// Settings the registry applies to every analysis and snapshot it creates.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Interval between two ticks of one analysis.
    pub poll_interval: Duration,
    /// Directory snapshots are written to.
    pub snapshot_dir: PathBuf,
    /// Snapshot file extension (without the dot).
    pub snapshot_extension: String,
}

impl RegistrySettings {
    pub fn new(snapshot_dir: PathBuf) -> Self {
        Self {
            poll_interval: Duration::from_millis(constants::DEFAULT_ANALYSIS_POLL_INTERVAL_MS),
            snapshot_dir,
            snapshot_extension: constants::DEFAULT_SNAPSHOT_EXTENSION.to_string(),
        }
    }
}

struct Slot {
    generation: u32,
    analysis: Option<Arc<ActiveAnalysis>>,
}

/// Thread-safe collection of all live analyses.
pub struct AnalysisRegistry {
    scheduler: Arc<dyn TaskScheduler>,
    engine: Arc<dyn AnalyserEngine>,
    writer: SnapshotWriter,
    poll_interval: Duration,
    slots: Mutex<Vec<Slot>>,
}

impl AnalysisRegistry {
    pub fn new(
        scheduler: Arc<dyn TaskScheduler>,
        filesystem: Arc<dyn Filesystem>,
        engine: Arc<dyn AnalyserEngine>,
        settings: RegistrySettings,
    ) -> Self {
        let writer = SnapshotWriter::new(
            Arc::clone(&scheduler),
            filesystem,
            settings.snapshot_dir,
            settings.snapshot_extension,
        );
        Self {
            scheduler,
            engine,
            writer,
            poll_interval: settings.poll_interval,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Start a new analysis from `template`.
    ///
    /// Fails with `InvalidArgument` when the template is absent or two of its
    /// analysers share an id; nothing is added in that case.
    pub fn create_new_analysis(
        &self,
        template: impl Into<Option<AnalysisTemplate>>,
    ) -> Result<AnalysisHandle> {
        let template = template
            .into()
            .ok_or_else(|| TailSleuthError::invalid_argument("template", "must not be absent"))?;

        let mut seen = HashSet::new();
        if let Some(dup) = template.analysers.iter().find(|a| !seen.insert(&a.id)) {
            return Err(TailSleuthError::invalid_argument(
                "template",
                format!("analyser id '{}' is used more than once", dup.id),
            ));
        }

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let index = match slots.iter().position(|s| s.analysis.is_none()) {
            Some(free) => free,
            None => {
                slots.push(Slot {
                    generation: 0,
                    analysis: None,
                });
                slots.len() - 1
            }
        };
        let slot_id = u32::try_from(index).map_err(|_| {
            TailSleuthError::invalid_argument("template", "too many live analyses")
        })?;

        let handle = AnalysisHandle::new(slot_id, slots[index].generation);
        let analysis = ActiveAnalysis::new(
            handle,
            template,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.engine),
            self.poll_interval,
        );
        slots[index].analysis = Some(Arc::new(analysis));
        Ok(handle)
    }

    /// Point-in-time list of live analyses.
    pub fn active(&self) -> Vec<AnalysisHandle> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|s| s.analysis.as_ref().map(|a| a.handle()))
            .collect()
    }

    /// Shared access to a live analysis (attach log files, read results).
    pub fn get(&self, handle: AnalysisHandle) -> Option<Arc<ActiveAnalysis>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.analysis.clone())
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and forget an analysis.  Returns `false` if `handle` does not
    /// designate a live analysis (e.g. it was already removed).
    pub fn remove(&self, handle: AnalysisHandle) -> bool {
        let removed = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get_mut(handle.slot as usize) {
                Some(slot) if slot.generation == handle.generation => {
                    let analysis = slot.analysis.take();
                    if analysis.is_some() {
                        slot.generation = slot.generation.wrapping_add(1);
                    }
                    analysis
                }
                _ => None,
            }
        };

        match removed {
            Some(analysis) => {
                analysis.stop();
                true
            }
            None => {
                tracing::debug!(analysis = %handle, "Remove ignored: not a live analysis");
                false
            }
        }
    }

    /// Persist the current results of a live analysis together with a copy
    /// of `template`.
    ///
    /// Fails with `InvalidArgument` (and touches no file) unless `handle`
    /// designates a live analysis.  Otherwise the write is queued and the
    /// returned completion resolves once it has finished; write failures are
    /// logged by the snapshot writer and never reported here.
    pub fn save_snapshot(
        &self,
        handle: AnalysisHandle,
        template: &AnalysisTemplate,
    ) -> Result<Completion> {
        let analysis = self.get(handle).ok_or_else(|| {
            TailSleuthError::invalid_argument(
                "analysis",
                format!("{handle} is not a live analysis; snapshots can only be taken from an executing analysis"),
            )
        })?;

        let snapshot = AnalysisSnapshot::new(template.clone(), analysis.current_results());
        tracing::debug!(
            analysis = %handle,
            results = snapshot.results().len(),
            "Snapshot requested"
        );
        Ok(self.writer.save(snapshot))
    }

    pub fn snapshot_writer(&self) -> &SnapshotWriter {
        &self.writer
    }
}

impl Drop for AnalysisRegistry {
    fn drop(&mut self) {
        let analyses: Vec<Arc<ActiveAnalysis>> = self
            .slots
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .filter_map(|s| s.analysis.take())
            .collect();
        for analysis in analyses {
            analysis.stop();
        }
    }
}
