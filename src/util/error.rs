// TailSleuth - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation: every variant names the subsystem that
// produced it and keeps its causal chain for diagnostic logging.
//
// Propagation policy:
//   - `InvalidArgument` signals a programming error at the call site and is
//     always returned to the caller.
//   - `Analyser` and `Persistence` errors come from best-effort background
//     work; they are logged and contained by the component that hit them and
//     only surface through explicit, caller-initiated reads (e.g. loading a
//     snapshot file).

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all TailSleuth operations.
#[derive(Debug)]
pub enum TailSleuthError {
    /// The caller passed an absent or unusable argument.
    InvalidArgument {
        argument: &'static str,
        reason: String,
    },

    /// An analyser failed to compute its result.
    Analyser(AnalyserError),

    /// A snapshot could not be written or read.
    Persistence(PersistenceError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// The task scheduler could not be started.
    Scheduler(SchedulerError),
}

impl TailSleuthError {
    /// Shorthand for building an `InvalidArgument` error.
    pub fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }

    /// Returns `true` for the `InvalidArgument` variant.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

impl fmt::Display for TailSleuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { argument, reason } => {
                write!(f, "Invalid argument '{argument}': {reason}")
            }
            Self::Analyser(e) => write!(f, "Analyser error: {e}"),
            Self::Persistence(e) => write!(f, "Persistence error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Scheduler(e) => write!(f, "Scheduler error: {e}"),
        }
    }
}

impl std::error::Error for TailSleuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidArgument { .. } => None,
            Self::Analyser(e) => Some(e),
            Self::Persistence(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Scheduler(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Analyser errors
// ---------------------------------------------------------------------------

/// Errors raised by an analyser engine for a single analyser on a single tick.
#[derive(Debug)]
pub enum AnalyserError {
    /// The engine has no implementation for the requested analyser kind.
    UnknownKind { kind: String },

    /// The analyser's configuration could not be interpreted.
    InvalidConfiguration { kind: String, reason: String },

    /// The computation itself failed.
    Failed { kind: String, reason: String },
}

impl fmt::Display for AnalyserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKind { kind } => write!(f, "no analyser of kind '{kind}' is available"),
            Self::InvalidConfiguration { kind, reason } => {
                write!(f, "analyser '{kind}' has an invalid configuration: {reason}")
            }
            Self::Failed { kind, reason } => write!(f, "analyser '{kind}' failed: {reason}"),
        }
    }
}

impl std::error::Error for AnalyserError {}

impl From<AnalyserError> for TailSleuthError {
    fn from(e: AnalyserError) -> Self {
        Self::Analyser(e)
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Errors related to writing or reading snapshot files.
#[derive(Debug)]
pub enum PersistenceError {
    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// JSON (de)serialisation error.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The file was written by an incompatible snapshot format.
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
            Self::Json { path, source } => {
                write!(f, "snapshot JSON error '{}': {source}", path.display())
            }
            Self::UnsupportedVersion {
                path,
                found,
                expected,
            } => write!(
                f,
                "snapshot '{}' has format version {found}, expected {expected}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::UnsupportedVersion { .. } => None,
        }
    }
}

impl From<PersistenceError> for TailSleuthError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for TailSleuthError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

/// Errors starting the task scheduler.
#[derive(Debug)]
pub enum SchedulerError {
    /// The worker pool could not be built.
    Pool { source: rayon::ThreadPoolBuildError },

    /// The timer thread could not be spawned.
    TimerThread { source: io::Error },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool { source } => write!(f, "cannot build worker pool: {source}"),
            Self::TimerThread { source } => write!(f, "cannot spawn timer thread: {source}"),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pool { source } => Some(source),
            Self::TimerThread { source } => Some(source),
        }
    }
}

impl From<SchedulerError> for TailSleuthError {
    fn from(e: SchedulerError) -> Self {
        Self::Scheduler(e)
    }
}

/// Render an error and its full `source()` chain on one line.
///
/// Used when logging contained failures so the root cause (e.g. the OS error
/// behind a failed rename) is never lost.  Causes whose text is already part
/// of the message (most `Display` impls here embed their source) are skipped.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        current = cause.source();
    }
    out
}

/// Convenience type alias for TailSleuth results.
pub type Result<T> = std::result::Result<T, TailSleuthError>;
