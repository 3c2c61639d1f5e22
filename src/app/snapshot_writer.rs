// TailSleuth - app/snapshot_writer.rs
//
// Background persistence of analysis snapshots.
//
// - Every save targets the same file, `<directory>/Snapshot.<extension>`;
//   the latest save wins.
// - Writes run on the scheduler's pool, never on the caller's thread.
// - The file is written atomically (write temp sibling, rename over target)
//   so a crash mid-write never leaves a truncated snapshot behind.
// - Failures are logged once at ERROR with the full cause chain and counted;
//   they are never propagated.  The returned completion resolves either way.

use crate::app::scheduler::{Completion, TaskScheduler};
use crate::core::model::AnalysisSnapshot;
use crate::core::snapshot_format::{read_snapshot, write_snapshot};
use crate::platform::fs::Filesystem;
use crate::util::constants::SNAPSHOT_FILE_STEM;
use crate::util::error::{error_chain, PersistenceError};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct WriteCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

pub struct SnapshotWriter {
    scheduler: Arc<dyn TaskScheduler>,
    filesystem: Arc<dyn Filesystem>,
    directory: PathBuf,
    extension: String,
    counters: Arc<WriteCounters>,
}

impl SnapshotWriter {
    pub fn new(
        scheduler: Arc<dyn TaskScheduler>,
        filesystem: Arc<dyn Filesystem>,
        directory: PathBuf,
        extension: String,
    ) -> Self {
        Self {
            scheduler,
            filesystem,
            directory,
            extension,
            counters: Arc::new(WriteCounters::default()),
        }
    }

    /// The file every save writes to.
    pub fn target_path(&self) -> PathBuf {
        self.directory
            .join(format!("{SNAPSHOT_FILE_STEM}.{}", self.extension))
    }

    /// Queue `snapshot` for writing.  The completion resolves once the write
    /// has succeeded or its failure has been logged.
    pub fn save(&self, snapshot: AnalysisSnapshot) -> Completion {
        let path = self.target_path();
        let filesystem = Arc::clone(&self.filesystem);
        let counters = Arc::clone(&self.counters);

        self.scheduler.run_once(
            "snapshot-write",
            Box::new(move || match write_atomically(filesystem.as_ref(), &snapshot, &path) {
                Ok(()) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        path = %path.display(),
                        results = snapshot.results().len(),
                        "Snapshot saved"
                    );
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        path = %path.display(),
                        error = %error_chain(&e),
                        "Failed to write snapshot"
                    );
                }
            }),
        )
    }

    /// Read a snapshot file back.  Unlike saving, failures are returned.
    pub fn load(&self, path: &Path) -> Result<AnalysisSnapshot, PersistenceError> {
        let reader = self
            .filesystem
            .open_read(path)
            .map_err(|e| PersistenceError::Io {
                path: path.to_path_buf(),
                operation: "open",
                source: e,
            })?;
        read_snapshot(std::io::BufReader::new(reader), path)
    }

    pub fn successful_writes(&self) -> u64 {
        self.counters.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed_writes(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

fn write_atomically(
    filesystem: &dyn Filesystem,
    snapshot: &AnalysisSnapshot,
    path: &Path,
) -> Result<(), PersistenceError> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let writer = filesystem
        .open_write(&tmp)
        .map_err(|e| PersistenceError::Io {
            path: tmp.clone(),
            operation: "create",
            source: e,
        })?;

    if let Err(e) = write_snapshot(snapshot, BufWriter::new(writer), &tmp) {
        let _ = filesystem.remove_file(&tmp);
        return Err(e);
    }

    filesystem.rename(&tmp, path).map_err(|e| {
        let _ = filesystem.remove_file(&tmp);
        PersistenceError::Io {
            path: path.to_path_buf(),
            operation: "rename",
            source: e,
        }
    })
}
