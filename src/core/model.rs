// TailSleuth - core/model.rs
//
// Core data model types. Pure data definitions with no I/O, no threads,
// no platform dependencies.
//
// These types are the shared vocabulary across all layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

// =============================================================================
// Line addressing
// =============================================================================

/// Ordinal of a line within a log file (0-based).
///
/// `LogLineIndex::INVALID` is the distinguished "no line" value and orders
/// before every valid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLineIndex(i64);

impl LogLineIndex {
    /// Sentinel for "no line".
    pub const INVALID: LogLineIndex = LogLineIndex(-1);

    /// Index of the line with the given 0-based ordinal.
    ///
    /// Ordinals beyond `i64::MAX` saturate; no real log file gets there.
    pub fn new(ordinal: usize) -> Self {
        Self(i64::try_from(ordinal).unwrap_or(i64::MAX))
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// The 0-based ordinal, or `None` for `INVALID`.
    pub fn ordinal(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl From<usize> for LogLineIndex {
    fn from(ordinal: usize) -> Self {
        Self::new(ordinal)
    }
}

/// Offsetting an invalid index yields an invalid index.
impl Add<usize> for LogLineIndex {
    type Output = LogLineIndex;

    fn add(self, rhs: usize) -> LogLineIndex {
        match self.ordinal() {
            Some(ordinal) => LogLineIndex::new(ordinal.saturating_add(rhs)),
            None => LogLineIndex::INVALID,
        }
    }
}

impl fmt::Display for LogLineIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ordinal() {
            Some(ordinal) => write!(f, "#{ordinal}"),
            None => f.write_str("#invalid"),
        }
    }
}

/// A contiguous, half-open range of lines `[index, index + count)`.
///
/// The special `RESET` section `(INVALID, 0)` tells listeners that the log
/// file was truncated or replaced and every previously reported line is void.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFileSection {
    /// First line of the section.
    pub index: LogLineIndex,
    /// Number of lines in the section.
    pub count: usize,
}

impl LogFileSection {
    /// "Everything you knew about this file is gone."
    pub const RESET: LogFileSection = LogFileSection {
        index: LogLineIndex::INVALID,
        count: 0,
    };

    /// Section of `count` lines starting at the 0-based ordinal `first`.
    pub fn new(first: usize, count: usize) -> Self {
        Self {
            index: LogLineIndex::new(first),
            count,
        }
    }

    pub fn is_reset(&self) -> bool {
        !self.index.is_valid() && self.count == 0
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Last line covered by this section, `None` when the section is empty.
    pub fn last_index(&self) -> Option<LogLineIndex> {
        if self.count == 0 || !self.index.is_valid() {
            return None;
        }
        Some(self.index + (self.count - 1))
    }

    /// One past the last line of this section.
    pub fn end(&self) -> LogLineIndex {
        self.index + self.count
    }

    pub fn contains(&self, index: LogLineIndex) -> bool {
        index.is_valid() && self.index.is_valid() && index >= self.index && index < self.end()
    }

    /// Iterate over every line index in the section.
    pub fn indices(&self) -> impl Iterator<Item = LogLineIndex> {
        let start = self.index.ordinal();
        let count = if start.is_some() { self.count } else { 0 };
        let first = start.unwrap_or(0);
        (first..first + count).map(LogLineIndex::new)
    }
}

impl fmt::Display for LogFileSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_reset() {
            f.write_str("[reset]")
        } else {
            write!(f, "[{}, {})", self.index, self.end())
        }
    }
}

// =============================================================================
// Analysis templates
// =============================================================================

/// Opaque identifier of one analyser within an analysis template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalyserId(String);

impl AnalyserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalyserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which analyser to run and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyserTemplate {
    /// Identifier of this analyser instance; keys its result.
    pub id: AnalyserId,

    /// Kind of analyser the engine should run (e.g. "line-count").
    pub kind: String,

    /// Analyser-specific parameters, opaque to this crate.
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl AnalyserTemplate {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: AnalyserId::new(id),
            kind: kind.into(),
            configuration: serde_json::Value::Null,
        }
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }
}

/// Immutable description of an analysis: the analysers it runs.
///
/// Owned by whoever creates the analysis.  Analyses and snapshots always hold
/// their own clone, so editing a caller's template never rewrites history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTemplate {
    /// Human-readable name shown by consumers.
    #[serde(default)]
    pub name: String,

    /// Analysers in display order.
    #[serde(default)]
    pub analysers: Vec<AnalyserTemplate>,
}

impl AnalysisTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            analysers: Vec::new(),
        }
    }

    pub fn with_analyser(mut self, analyser: AnalyserTemplate) -> Self {
        self.analysers.push(analyser);
        self
    }
}

// =============================================================================
// Results and snapshots
// =============================================================================

/// Latest result produced by one analyser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyserResult {
    pub analyser_id: AnalyserId,

    /// Analyser-defined payload.
    pub result: serde_json::Value,
}

/// Point-in-time record of an analysis: its template and results.
///
/// A snapshot is a fact about a moment; it has no mutators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    template: AnalysisTemplate,
    results: Vec<AnalyserResult>,
    created: DateTime<Utc>,
}

impl AnalysisSnapshot {
    /// Stamp a snapshot with the current time.
    pub fn new(template: AnalysisTemplate, results: Vec<AnalyserResult>) -> Self {
        Self {
            template,
            results,
            created: Utc::now(),
        }
    }

    pub fn template(&self) -> &AnalysisTemplate {
        &self.template
    }

    /// Results ordered by the analyser order of the template.
    pub fn results(&self) -> &[AnalyserResult] {
        &self.results
    }

    /// When the snapshot was taken (UTC).
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// The result recorded for `id`, if that analyser had produced one.
    pub fn result(&self, id: &AnalyserId) -> Option<&serde_json::Value> {
        self.results
            .iter()
            .find(|r| &r.analyser_id == id)
            .map(|r| &r.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalid_index_orders_before_valid() {
        assert!(LogLineIndex::INVALID < LogLineIndex::new(0));
        assert!(LogLineIndex::new(3) < LogLineIndex::new(4));
        assert!(!LogLineIndex::INVALID.is_valid());
        assert_eq!(LogLineIndex::INVALID.ordinal(), None);
        assert_eq!(LogLineIndex::INVALID + 5, LogLineIndex::INVALID);
    }

    #[test]
    fn test_section_bounds() {
        let section = LogFileSection::new(10, 5);
        assert_eq!(section.last_index(), Some(LogLineIndex::new(14)));
        assert_eq!(section.end(), LogLineIndex::new(15));
        assert!(section.contains(LogLineIndex::new(10)));
        assert!(section.contains(LogLineIndex::new(14)));
        assert!(!section.contains(LogLineIndex::new(15)));
        assert!(!section.contains(LogLineIndex::INVALID));

        let indices: Vec<_> = section.indices().filter_map(|i| i.ordinal()).collect();
        assert_eq!(indices, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_reset_section() {
        assert!(LogFileSection::RESET.is_reset());
        assert!(!LogFileSection::new(0, 0).is_reset());
        assert_eq!(LogFileSection::RESET.last_index(), None);
        assert_eq!(LogFileSection::RESET.indices().count(), 0);
        assert_eq!(LogFileSection::RESET.to_string(), "[reset]");
    }

    #[test]
    fn test_snapshot_result_lookup() {
        let template = AnalysisTemplate::new("errors")
            .with_analyser(AnalyserTemplate::new("a", "line-count"));
        let snapshot = AnalysisSnapshot::new(
            template,
            vec![AnalyserResult {
                analyser_id: AnalyserId::new("a"),
                result: json!(42),
            }],
        );
        assert_eq!(snapshot.result(&AnalyserId::new("a")), Some(&json!(42)));
        assert_eq!(snapshot.result(&AnalyserId::new("b")), None);
        assert_eq!(snapshot.template().analysers.len(), 1);
    }
}
