// TailSleuth - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every configurable value has a default plus an inclusive validation range.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "TailSleuth";

/// Application identifier used for config/data/document directories.
pub const APP_ID: &str = "TailSleuth";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Change notification
// =============================================================================

/// How often a polling consumer drains its pending-change counter (ms).
/// Roughly one display frame at 30 Hz.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 33;

/// Minimum user-configurable consumer refresh interval (ms).
pub const MIN_REFRESH_INTERVAL_MS: u64 = 10;

/// Maximum user-configurable consumer refresh interval (ms).
pub const MAX_REFRESH_INTERVAL_MS: u64 = 1_000;

/// Minimum wall-clock gap between two partial-batch flushes to one listener (ms).
pub const DEFAULT_LISTENER_MIN_INTERVAL_MS: u64 = 100;

/// Upper bound for the configurable listener flush gap (ms).
pub const MAX_LISTENER_MIN_INTERVAL_MS: u64 = 10_000;

/// Maximum number of lines described by a single listener flush.
pub const DEFAULT_MAX_LINES_PER_BATCH: usize = 10_000;

/// Upper bound for the configurable batch size.
pub const ABSOLUTE_MAX_LINES_PER_BATCH: usize = 1_000_000;

// =============================================================================
// Analyses
// =============================================================================

/// How often every active analysis re-runs its analysers (ms).
pub const DEFAULT_ANALYSIS_POLL_INTERVAL_MS: u64 = 100;

/// Minimum user-configurable analysis polling interval (ms).
pub const MIN_ANALYSIS_POLL_INTERVAL_MS: u64 = 10;

/// Maximum user-configurable analysis polling interval (ms).
pub const MAX_ANALYSIS_POLL_INTERVAL_MS: u64 = 60_000;

/// Analyser kind understood by the built-in `LineCountEngine`.
pub const LINE_COUNT_ANALYSER_KIND: &str = "line-count";

// =============================================================================
// Scheduler
// =============================================================================

/// Default number of scheduler worker threads.
/// 0 means auto-detect (use available CPU cores).
pub const DEFAULT_WORKER_THREADS: usize = 0;

/// Hard upper bound on scheduler worker threads.
pub const MAX_WORKER_THREADS: usize = 64;

/// Longest the scheduler timer thread sleeps before re-checking its task
/// table when nothing is due (ms).
pub const SCHEDULER_IDLE_WAIT_MS: u64 = 500;

// =============================================================================
// Snapshots
// =============================================================================

/// Name of the snapshot directory below the application's document folder.
pub const SNAPSHOT_DIR_NAME: &str = "Snapshots";

/// Base file name (without extension) of a persisted snapshot.
pub const SNAPSHOT_FILE_STEM: &str = "Snapshot";

/// Default snapshot file extension.
pub const DEFAULT_SNAPSHOT_EXTENSION: &str = "tvas";

/// Maximum length of a configured snapshot file extension.
pub const MAX_SNAPSHOT_EXTENSION_LEN: usize = 16;

/// Version stamp written into every snapshot file.
///
/// Increment whenever `AnalysisSnapshot` changes shape in a breaking way.
/// Files carrying any other version are rejected on load.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";
