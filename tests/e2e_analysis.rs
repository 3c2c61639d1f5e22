// TailSleuth - tests/e2e_analysis.rs
//
// End-to-end tests: registry + pooled scheduler + snapshot writer against a
// real temporary directory.

use serde_json::json;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};
use tailsleuth::app::registry::{AnalysisHandle, AnalysisRegistry, RegistrySettings};
use tailsleuth::app::scheduler::PooledScheduler;
use tailsleuth::core::analyser::{AnalyserEngine, LineCountEngine};
use tailsleuth::core::log_file::{InMemoryLogFile, LogFile};
use tailsleuth::core::model::{AnalyserId, AnalyserTemplate, AnalysisTemplate};
use tailsleuth::platform::fs::{Filesystem, RealFilesystem};
use tailsleuth::util::error::AnalyserError;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

/// Returns `{ "a": 1 }` on the first call and `{ "a": 2 }` afterwards.
#[derive(Default)]
struct TwoStepEngine {
    calls: AtomicU64,
}

impl AnalyserEngine for TwoStepEngine {
    fn run(
        &self,
        _analyser: &AnalyserTemplate,
        _log_files: &[Arc<dyn LogFile>],
    ) -> Result<serde_json::Value, AnalyserError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "a": if n == 0 { 1 } else { 2 } }))
    }
}

fn settings(dir: &Path) -> RegistrySettings {
    RegistrySettings {
        poll_interval: Duration::from_millis(10),
        ..RegistrySettings::new(dir.join("Snapshots"))
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn e2e_snapshot_holds_one_complete_tick_result() {
    let dir = TempDir::new().unwrap();
    let scheduler = Arc::new(PooledScheduler::new(2).unwrap());
    let registry = AnalysisRegistry::new(
        scheduler,
        Arc::new(RealFilesystem),
        Arc::new(TwoStepEngine::default()),
        settings(dir.path()),
    );

    let template = AnalysisTemplate::new("two-step")
        .with_analyser(AnalyserTemplate::new("a", "scripted"));
    let handle = registry.create_new_analysis(template.clone()).unwrap();
    let analysis = registry.get(handle).unwrap();
    assert!(wait_until(|| analysis.tick_count() >= 2), "analysis never ticked twice");

    let completion = registry.save_snapshot(handle, &template).unwrap();
    assert!(completion.wait_timeout(WAIT), "snapshot write never finished");
    assert_eq!(registry.snapshot_writer().failed_writes(), 0);

    let path = dir.path().join("Snapshots").join("Snapshot.tvas");
    let snapshot = registry.snapshot_writer().load(&path).unwrap();
    assert_eq!(snapshot.template(), &template);
    assert_eq!(snapshot.result(&AnalyserId::new("a")), Some(&json!({ "a": 2 })));

    assert!(registry.remove(handle));
    let ticks = analysis.tick_count();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(analysis.tick_count(), ticks, "ticked after removal");
}

/// Each result carries its own call number twice, so a value stitched
/// together from two runs would not add up.
#[derive(Default)]
struct CallStampEngine {
    calls: AtomicU64,
}

impl AnalyserEngine for CallStampEngine {
    fn run(
        &self,
        analyser: &AnalyserTemplate,
        _log_files: &[Arc<dyn LogFile>],
    ) -> Result<serde_json::Value, AnalyserError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({
            "analyser": analyser.id.as_str(),
            "call": n,
            "double": n * 2,
            "padding": "x".repeat((n % 64) as usize),
        }))
    }
}

#[test]
fn e2e_snapshots_never_see_partial_results_while_ticking() {
    let dir = TempDir::new().unwrap();
    let scheduler = Arc::new(PooledScheduler::new(4).unwrap());
    let registry = AnalysisRegistry::new(
        scheduler,
        Arc::new(RealFilesystem),
        Arc::new(CallStampEngine::default()),
        RegistrySettings {
            poll_interval: Duration::from_millis(1),
            ..RegistrySettings::new(dir.path().join("Snapshots"))
        },
    );

    let template = AnalysisTemplate::new("stamps")
        .with_analyser(AnalyserTemplate::new("x", "stamp"))
        .with_analyser(AnalyserTemplate::new("y", "stamp"))
        .with_analyser(AnalyserTemplate::new("z", "stamp"));
    let handle = registry.create_new_analysis(template.clone()).unwrap();
    let analysis = registry.get(handle).unwrap();
    assert!(wait_until(|| analysis.tick_count() >= 1), "analysis never ticked");

    let start_ticks = analysis.tick_count();
    let mut snapshots = 0;
    while snapshots < 2_000 || analysis.tick_count() < start_ticks + 5 {
        let snapshot = analysis.create_snapshot();
        assert_eq!(snapshot.template(), &template);
        for id in ["x", "y", "z"] {
            let Some(result) = snapshot.result(&AnalyserId::new(id)) else {
                continue;
            };
            assert_eq!(result["analyser"], json!(id), "{result}");
            let call = result["call"].as_u64().unwrap();
            assert_eq!(result["double"].as_u64(), Some(call * 2), "{result}");
            assert_eq!(
                result["padding"].as_str().map(str::len),
                Some((call % 64) as usize),
                "{result}"
            );
        }
        snapshots += 1;
        assert!(snapshots < 10_000_000, "analysis stopped ticking");
    }

    let last = analysis.create_snapshot();
    assert_eq!(last.results().len(), 3);
    assert!(registry.remove(handle));
}

/// Removes its own analysis from inside `run` once a target is set.
#[derive(Default)]
struct SelfRemovingEngine {
    target: OnceLock<(Weak<AnalysisRegistry>, AnalysisHandle)>,
    removed: AtomicU64,
}

impl AnalyserEngine for SelfRemovingEngine {
    fn run(
        &self,
        _analyser: &AnalyserTemplate,
        _log_files: &[Arc<dyn LogFile>],
    ) -> Result<serde_json::Value, AnalyserError> {
        if let Some((registry, handle)) = self.target.get() {
            if let Some(registry) = registry.upgrade() {
                if registry.remove(*handle) {
                    self.removed.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        Ok(json!({ "ran": true }))
    }
}

#[test]
fn e2e_engine_can_remove_its_own_analysis() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(SelfRemovingEngine::default());
    let registry = Arc::new(AnalysisRegistry::new(
        Arc::new(PooledScheduler::new(2).unwrap()),
        Arc::new(RealFilesystem),
        engine.clone(),
        settings(dir.path()),
    ));

    let template = AnalysisTemplate::new("self-removing")
        .with_analyser(AnalyserTemplate::new("a", "self-removing"));
    let handle = registry.create_new_analysis(template).unwrap();
    let analysis = registry.get(handle).unwrap();
    assert!(engine
        .target
        .set((Arc::downgrade(&registry), handle))
        .is_ok());

    assert!(
        wait_until(|| engine.removed.load(Ordering::SeqCst) == 1),
        "self-removal never returned"
    );
    assert!(registry.get(handle).is_none());
    assert!(registry.is_empty());
    assert!(!analysis.is_running());

    let ticks = analysis.tick_count();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(analysis.tick_count(), ticks, "ticked after removing itself");
    assert_eq!(engine.removed.load(Ordering::SeqCst), 1);
}

#[test]
fn e2e_line_count_follows_growing_log_file() {
    let dir = TempDir::new().unwrap();
    let scheduler = Arc::new(PooledScheduler::new(0).unwrap());
    let registry = AnalysisRegistry::new(
        scheduler,
        Arc::new(RealFilesystem),
        Arc::new(LineCountEngine),
        settings(dir.path()),
    );

    let template = AnalysisTemplate::new("lines")
        .with_analyser(AnalyserTemplate::new("count", "line-count"));
    let handle = registry.create_new_analysis(template.clone()).unwrap();
    let analysis = registry.get(handle).unwrap();

    let log_file = Arc::new(InMemoryLogFile::new());
    analysis.add_log_file(log_file.clone());
    log_file.add_lines(["one", "two", "three"]);
    log_file.flush();

    let expected = json!({ "files": 1, "lines": 3, "max_line_width": 5 });
    assert!(wait_until(|| {
        analysis
            .current_results()
            .first()
            .is_some_and(|r| r.result == expected)
    }));
    assert!(wait_until(|| analysis.observed_changes() >= 1));

    let completion = registry.save_snapshot(handle, &template).unwrap();
    assert!(completion.wait_timeout(WAIT));
    let snapshot = registry
        .snapshot_writer()
        .load(&registry.snapshot_writer().target_path())
        .unwrap();
    assert_eq!(snapshot.result(&AnalyserId::new("count")), Some(&expected));
}

/// Filesystem that refuses every write.
struct ReadOnlyFilesystem;

impl Filesystem for ReadOnlyFilesystem {
    fn open_write(&self, _path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"))
    }
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        RealFilesystem.open_read(path)
    }
    fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"))
    }
    fn remove_file(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The failure is logged on a pool worker, yet reaches the caller's subscriber.
#[test]
fn e2e_persistence_failure_resolves_and_logs_once() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .with_max_level(tracing::Level::ERROR)
        .finish();

    let dir = TempDir::new().unwrap();
    let scheduler = Arc::new(PooledScheduler::new(2).unwrap());
    let registry = AnalysisRegistry::new(
        scheduler,
        Arc::new(ReadOnlyFilesystem),
        Arc::new(LineCountEngine),
        settings(dir.path()),
    );
    let template = AnalysisTemplate::new("lines")
        .with_analyser(AnalyserTemplate::new("count", "line-count"));
    let handle = registry.create_new_analysis(template.clone()).unwrap();

    tracing::subscriber::with_default(subscriber, || {
        let completion = registry.save_snapshot(handle, &template).unwrap();
        assert!(completion.wait_timeout(WAIT), "completion must resolve");
    });

    assert_eq!(registry.snapshot_writer().failed_writes(), 1);
    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let errors = output.lines().filter(|l| l.contains("ERROR")).count();
    assert_eq!(errors, 1, "{output}");
    assert!(output.contains("read-only volume"), "{output}");
    assert!(!dir.path().join("Snapshots").exists());
}
