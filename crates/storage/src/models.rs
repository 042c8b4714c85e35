use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

/// Category name reported when no rule matches.
pub const UNCLASSIFIED: &str = "unclassified";
/// Category name reported for files that could not be processed.
pub const ERROR_CATEGORY: &str = "error";
/// How many recent per-file errors a run keeps for the final report.
pub const RECENT_ERRORS_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Verdict {
    Categorized(String),
    Unclassified,
    Error(String),
}

impl Verdict {
    pub fn category(&self) -> &str {
        match self {
            Verdict::Categorized(name) => name,
            Verdict::Unclassified => UNCLASSIFIED,
            Verdict::Error(_) => ERROR_CATEGORY,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Error(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Verdict::Error(_))
    }
}

/// Result of processing one file, produced exactly once per task by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub verdict: Verdict,
    pub destination: Option<PathBuf>,
    /// The document opened but held no text.
    #[serde(default)]
    pub empty_content: bool,
    pub finished_at: DateTime<Utc>,
}

impl FileOutcome {
    pub fn new(path: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            path: path.into(),
            verdict,
            destination: None,
            empty_content: false,
            finished_at: Utc::now(),
        }
    }

    pub fn error(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(path, Verdict::Error(reason.into()))
    }

    pub fn with_destination(mut self, destination: PathBuf) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_empty_content(mut self, empty: bool) -> Self {
        self.empty_content = empty;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorRecord {
    pub path: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Resumable state of a batch run.
///
/// Only the coordinator mutates this; workers hand back [`FileOutcome`]s.
/// Applying an outcome for a path that is already done is a no-op, so the
/// counters always satisfy `Σ category_counts + error_count == done.len()`.
/// `empty_content` is a subset of the categorized files, not a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunProgress {
    pub done: BTreeSet<String>,
    pub category_counts: BTreeMap<String, u64>,
    pub error_count: u64,
    #[serde(default)]
    pub empty_content: u64,
    pub total: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub recent_errors: VecDeque<ErrorRecord>,
}

impl RunProgress {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            done: BTreeSet::new(),
            category_counts: BTreeMap::new(),
            error_count: 0,
            empty_content: 0,
            total: 0,
            started_at,
            updated_at: started_at,
            recent_errors: VecDeque::new(),
        }
    }

    pub fn is_done(&self, path: &str) -> bool {
        self.done.contains(path)
    }

    /// Records one outcome. Returns `false` when the path was already done.
    pub fn apply(&mut self, outcome: &FileOutcome) -> bool {
        if !self.done.insert(outcome.path.clone()) {
            return false;
        }
        match &outcome.verdict {
            Verdict::Error(reason) => {
                self.error_count += 1;
                if self.recent_errors.len() >= RECENT_ERRORS_CAP {
                    self.recent_errors.pop_front();
                }
                self.recent_errors.push_back(ErrorRecord {
                    path: outcome.path.clone(),
                    reason: reason.clone(),
                    at: outcome.finished_at,
                });
            }
            verdict => {
                *self
                    .category_counts
                    .entry(verdict.category().to_string())
                    .or_insert(0) += 1;
                if outcome.empty_content {
                    self.empty_content += 1;
                }
            }
        }
        // max() keeps the field independent of arrival order
        if outcome.finished_at > self.updated_at {
            self.updated_at = outcome.finished_at;
        }
        true
    }

    /// Applies a batch, returning how many outcomes were new.
    pub fn apply_all<'a>(&mut self, outcomes: impl IntoIterator<Item = &'a FileOutcome>) -> usize {
        outcomes.into_iter().filter(|o| self.apply(o)).count()
    }

    pub fn processed(&self) -> u64 {
        self.done.len() as u64
    }

    pub fn pending(&self) -> u64 {
        self.total.saturating_sub(self.processed())
    }

    pub fn categorized(&self) -> u64 {
        self.category_counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(path: &str, verdict: Verdict) -> FileOutcome {
        FileOutcome::new(path, verdict)
    }

    #[test]
    fn reapplying_a_done_path_is_a_noop() {
        let mut progress = RunProgress::new(Utc::now());
        progress.total = 2;
        assert!(progress.apply(&outcome("a.doc", Verdict::Categorized("Invoice".into()))));
        assert!(!progress.apply(&outcome("a.doc", Verdict::Error("late".into()))));

        assert_eq!(progress.processed(), 1);
        assert_eq!(progress.category_counts.get("Invoice"), Some(&1));
        assert_eq!(progress.error_count, 0);
        assert_eq!(progress.pending(), 1);
    }

    #[test]
    fn counts_stay_balanced_with_total() {
        let mut progress = RunProgress::new(Utc::now());
        progress.total = 5;
        progress.apply(&outcome("a", Verdict::Categorized("X".into())));
        progress.apply(&outcome("b", Verdict::Unclassified));
        progress.apply(&outcome("c", Verdict::Error("unreadable".into())));

        assert_eq!(
            progress.categorized() + progress.error_count + progress.pending(),
            progress.total
        );
        assert_eq!(progress.category_counts.get(UNCLASSIFIED), Some(&1));
        assert_eq!(progress.recent_errors.len(), 1);
    }

    #[test]
    fn empty_documents_are_counted_within_their_category() {
        let mut progress = RunProgress::new(Utc::now());
        progress.apply(&outcome("a", Verdict::Unclassified).with_empty_content(true));
        progress.apply(&outcome("a", Verdict::Unclassified).with_empty_content(true));
        progress.apply(&outcome("b", Verdict::Unclassified));

        assert_eq!(progress.empty_content, 1);
        assert_eq!(progress.category_counts.get(UNCLASSIFIED), Some(&2));
        assert_eq!(progress.categorized() + progress.error_count, progress.processed());
    }

    #[test]
    fn recent_errors_are_bounded() {
        let mut progress = RunProgress::new(Utc::now());
        for i in 0..(RECENT_ERRORS_CAP + 10) {
            progress.apply(&FileOutcome::error(format!("f{i}"), "boom"));
        }
        assert_eq!(progress.recent_errors.len(), RECENT_ERRORS_CAP);
        assert_eq!(progress.recent_errors.front().map(|e| e.path.as_str()), Some("f10"));
        assert_eq!(progress.error_count as usize, RECENT_ERRORS_CAP + 10);
    }
}
