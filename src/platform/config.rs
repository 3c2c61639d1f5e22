// TailSleuth - platform/config.rs
//
// Platform directory resolution and config.toml loading with startup
// validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.  Snapshots default to the user's documents
// folder so they are easy to find and share.

use crate::util::constants;
use crate::util::error::ConfigError;
use directories::{ProjectDirs, UserDirs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved platform paths for TailSleuth data and configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/tailsleuth/ or %APPDATA%\TailSleuth\config\)
    pub config_dir: PathBuf,

    /// Data directory for caches etc.
    pub data_dir: PathBuf,

    /// Default snapshot directory (e.g. ~/Documents/TailSleuth/Snapshots/)
    pub snapshot_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to the current directory if platform dirs cannot be
    /// determined.
    pub fn resolve() -> Self {
        let (config_dir, data_dir) = match ProjectDirs::from("", "", constants::APP_ID) {
            Some(proj_dirs) => (
                proj_dirs.config_dir().to_path_buf(),
                proj_dirs.data_dir().to_path_buf(),
            ),
            None => {
                tracing::warn!("Could not determine platform directories, using current directory");
                (PathBuf::from("."), PathBuf::from("."))
            }
        };

        let snapshot_dir = UserDirs::new()
            .and_then(|dirs| dirs.document_dir().map(Path::to_path_buf))
            .map(|docs| docs.join(constants::APP_NAME))
            .unwrap_or_else(|| data_dir.clone())
            .join(constants::SNAPSHOT_DIR_NAME);

        tracing::debug!(
            config = %config_dir.display(),
            data = %data_dir.display(),
            snapshots = %snapshot_dir.display(),
            "Platform paths resolved"
        );

        Self {
            config_dir,
            data_dir,
            snapshot_dir,
        }
    }
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored so a newer config file still works
/// with an older binary.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub analysis: AnalysisSection,
    pub notifier: NotifierSection,
    pub snapshots: SnapshotsSection,
    pub scheduler: SchedulerSection,
    pub logging: LoggingSection,
}

/// `[analysis]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Interval between two ticks of an analysis.
    pub poll_interval_ms: Option<u64>,
}

/// `[notifier]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct NotifierSection {
    /// How often the consumer drains pending changes.
    pub refresh_interval_ms: Option<u64>,
    /// Minimum gap between two partial-batch flushes of one listener.
    pub minimum_interval_ms: Option<u64>,
    /// Maximum lines reported in one section.
    pub max_lines_per_batch: Option<usize>,
}

/// `[snapshots]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SnapshotsSection {
    pub directory: Option<String>,
    pub extension: Option<String>,
}

/// `[scheduler]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Worker pool size (0 = one per CPU).
    pub worker_threads: Option<usize>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

/// Validated application configuration derived from `config.toml`.
///
/// Invalid values produce warnings and fall back to defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub listener_minimum_interval: Duration,
    pub max_lines_per_batch: usize,
    /// Overrides `PlatformPaths::snapshot_dir` when set.
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_extension: String,
    pub worker_threads: usize,
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(constants::DEFAULT_ANALYSIS_POLL_INTERVAL_MS),
            refresh_interval: Duration::from_millis(constants::DEFAULT_REFRESH_INTERVAL_MS),
            listener_minimum_interval: Duration::from_millis(
                constants::DEFAULT_LISTENER_MIN_INTERVAL_MS,
            ),
            max_lines_per_batch: constants::DEFAULT_MAX_LINES_PER_BATCH,
            snapshot_dir: None,
            snapshot_extension: constants::DEFAULT_SNAPSHOT_EXTENSION.to_string(),
            worker_threads: constants::DEFAULT_WORKER_THREADS,
            log_level: None,
        }
    }
}

fn out_of_range(field: &str, value: impl ToString, expected: String) -> ConfigError {
    ConfigError::ValueOutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    }
}

/// Load and validate `config.toml` from `config_dir`.
///
/// Returns the validated config and every non-fatal problem found.  A
/// missing file is a normal first run: defaults, no warnings.  An unreadable
/// or unparseable file yields defaults plus one warning; the application
/// still starts but the user is told.
pub fn load_config(config_dir: &Path) -> (AppConfig, Vec<ConfigError>) {
    let config_path = config_dir.join(constants::CONFIG_FILE_NAME);
    let mut warnings: Vec<ConfigError> = Vec::new();

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), warnings);
    }

    let content = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warnings.push(ConfigError::Io {
                path: config_path,
                source: e,
            });
            return (AppConfig::default(), warnings);
        }
    };

    let raw: RawConfig = match toml::from_str(&content) {
        Ok(r) => r,
        Err(e) => {
            warnings.push(ConfigError::TomlParse {
                path: config_path,
                source: e,
            });
            return (AppConfig::default(), warnings);
        }
    };

    tracing::info!(path = %config_path.display(), "Loaded config.toml");

    let mut config = AppConfig::default();

    if let Some(ms) = raw.analysis.poll_interval_ms {
        let range =
            constants::MIN_ANALYSIS_POLL_INTERVAL_MS..=constants::MAX_ANALYSIS_POLL_INTERVAL_MS;
        if range.contains(&ms) {
            config.poll_interval = Duration::from_millis(ms);
        } else {
            warnings.push(out_of_range(
                "analysis.poll_interval_ms",
                ms,
                format!("{}-{}", range.start(), range.end()),
            ));
        }
    }

    if let Some(ms) = raw.notifier.refresh_interval_ms {
        let range = constants::MIN_REFRESH_INTERVAL_MS..=constants::MAX_REFRESH_INTERVAL_MS;
        if range.contains(&ms) {
            config.refresh_interval = Duration::from_millis(ms);
        } else {
            warnings.push(out_of_range(
                "notifier.refresh_interval_ms",
                ms,
                format!("{}-{}", range.start(), range.end()),
            ));
        }
    }

    if let Some(ms) = raw.notifier.minimum_interval_ms {
        if ms <= constants::MAX_LISTENER_MIN_INTERVAL_MS {
            config.listener_minimum_interval = Duration::from_millis(ms);
        } else {
            warnings.push(out_of_range(
                "notifier.minimum_interval_ms",
                ms,
                format!("0-{}", constants::MAX_LISTENER_MIN_INTERVAL_MS),
            ));
        }
    }

    if let Some(lines) = raw.notifier.max_lines_per_batch {
        if (1..=constants::ABSOLUTE_MAX_LINES_PER_BATCH).contains(&lines) {
            config.max_lines_per_batch = lines;
        } else {
            warnings.push(out_of_range(
                "notifier.max_lines_per_batch",
                lines,
                format!("1-{}", constants::ABSOLUTE_MAX_LINES_PER_BATCH),
            ));
        }
    }

    if let Some(dir) = raw.snapshots.directory.filter(|d| !d.trim().is_empty()) {
        config.snapshot_dir = Some(PathBuf::from(dir));
    }

    if let Some(ext) = raw.snapshots.extension {
        let ext = ext.trim_start_matches('.');
        let valid = !ext.is_empty()
            && ext.len() <= constants::MAX_SNAPSHOT_EXTENSION_LEN
            && ext.chars().all(|c| c.is_ascii_alphanumeric());
        if valid {
            config.snapshot_extension = ext.to_string();
        } else {
            warnings.push(out_of_range(
                "snapshots.extension",
                ext,
                format!(
                    "1-{} ASCII letters or digits",
                    constants::MAX_SNAPSHOT_EXTENSION_LEN
                ),
            ));
        }
    }

    if let Some(threads) = raw.scheduler.worker_threads {
        if threads <= constants::MAX_WORKER_THREADS {
            config.worker_threads = threads;
        } else {
            warnings.push(out_of_range(
                "scheduler.worker_threads",
                threads,
                format!("0-{} (0 = auto)", constants::MAX_WORKER_THREADS),
            ));
        }
    }

    if let Some(level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level);
        } else {
            warnings.push(out_of_range(
                "logging.level",
                level,
                "one of error, warn, info, debug, trace".to_string(),
            ));
        }
    }

    (config, warnings)
}
