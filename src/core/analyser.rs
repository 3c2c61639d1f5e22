// TailSleuth - core/analyser.rs
//
// The analyser-engine capability.  Engines compute one analyser's result from
// the current state of the log files attached to an analysis; how they do it
// is their business.  The crate ships a single trivial engine so the binary
// and the tests have something real to run.

use crate::core::log_file::LogFile;
use crate::core::model::AnalyserTemplate;
use crate::util::constants::LINE_COUNT_ANALYSER_KIND;
use crate::util::error::AnalyserError;
use std::sync::Arc;

/// Computes analyser results.  Called from scheduler worker threads, possibly
/// for several analyses at once.
///
/// `run` executes inside the analysis' scheduled tick, and stopping an
/// analysis from another thread waits for that tick to finish.  An engine may
/// still remove the analysis it is running for (`AnalysisRegistry::remove`):
/// the scheduler recognises the self-cancel and does not wait, and the
/// result of the running tick is discarded.  Blocking inside `run` on
/// anything that itself waits for this analysis to stop does deadlock.
pub trait AnalyserEngine: Send + Sync {
    /// Run `analyser` once against `log_files` and return its new result.
    fn run(
        &self,
        analyser: &AnalyserTemplate,
        log_files: &[Arc<dyn LogFile>],
    ) -> Result<serde_json::Value, AnalyserError>;
}

/// Engine understanding the `"line-count"` analyser kind.
///
/// Result shape: `{ "files": <n>, "lines": <total>, "max_line_width": <w> }`.
/// Configuration `{ "minimum_lines": <n> }` makes the analyser fail while the
/// attached files hold fewer lines, which is mainly useful for exercising
/// failure handling.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCountEngine;

impl AnalyserEngine for LineCountEngine {
    fn run(
        &self,
        analyser: &AnalyserTemplate,
        log_files: &[Arc<dyn LogFile>],
    ) -> Result<serde_json::Value, AnalyserError> {
        if analyser.kind != LINE_COUNT_ANALYSER_KIND {
            return Err(AnalyserError::UnknownKind {
                kind: analyser.kind.clone(),
            });
        }

        let minimum_lines = match analyser.configuration.get("minimum_lines") {
            None => 0,
            Some(value) => value.as_u64().ok_or_else(|| AnalyserError::InvalidConfiguration {
                kind: analyser.kind.clone(),
                reason: format!("'minimum_lines' must be a non-negative integer, got {value}"),
            })?,
        };

        let lines: usize = log_files.iter().map(|f| f.count()).sum();
        let width = log_files
            .iter()
            .map(|f| f.max_characters_per_line())
            .max()
            .unwrap_or(0);

        if (lines as u64) < minimum_lines {
            return Err(AnalyserError::Failed {
                kind: analyser.kind.clone(),
                reason: format!("only {lines} lines available, {minimum_lines} required"),
            });
        }

        Ok(serde_json::json!({
            "files": log_files.len(),
            "lines": lines,
            "max_line_width": width,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_file::InMemoryLogFile;
    use serde_json::json;

    fn files() -> Vec<Arc<dyn LogFile>> {
        let a = InMemoryLogFile::new();
        a.add_lines(["one", "three"]);
        let b = InMemoryLogFile::new();
        b.add_line("x");
        let a: Arc<dyn LogFile> = Arc::new(a);
        let b: Arc<dyn LogFile> = Arc::new(b);
        vec![a, b]
    }

    #[test]
    fn test_line_count_sums_all_files() {
        let analyser = AnalyserTemplate::new("count", LINE_COUNT_ANALYSER_KIND);
        let result = LineCountEngine.run(&analyser, &files()).unwrap();
        assert_eq!(result, json!({ "files": 2, "lines": 3, "max_line_width": 5 }));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let analyser = AnalyserTemplate::new("q", "quick-filter");
        let err = LineCountEngine.run(&analyser, &files()).unwrap_err();
        assert!(matches!(err, AnalyserError::UnknownKind { .. }), "{err}");
    }

    #[test]
    fn test_minimum_lines_failure() {
        let analyser = AnalyserTemplate::new("count", LINE_COUNT_ANALYSER_KIND)
            .with_configuration(json!({ "minimum_lines": 10 }));
        let err = LineCountEngine.run(&analyser, &files()).unwrap_err();
        assert!(matches!(err, AnalyserError::Failed { .. }), "{err}");

        let bad = AnalyserTemplate::new("count", LINE_COUNT_ANALYSER_KIND)
            .with_configuration(json!({ "minimum_lines": "ten" }));
        let err = LineCountEngine.run(&bad, &files()).unwrap_err();
        assert!(matches!(err, AnalyserError::InvalidConfiguration { .. }), "{err}");
    }
}
