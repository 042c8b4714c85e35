use crate::models::{ErrorRecord, RunProgress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Summary written once when a run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Since the first session started, across resumes.
    pub elapsed_secs: f64,
    /// This session only.
    pub session_secs: f64,
    pub total_files: u64,
    pub processed_this_run: u64,
    pub skipped: u64,
    pub category_counts: BTreeMap<String, u64>,
    pub error_count: u64,
    /// Documents that opened but held no text. Also counted in their category.
    pub empty_content: u64,
    /// Percentage of processed files that did not end in an error.
    pub success_rate: f64,
    pub files_per_second: f64,
    pub recent_errors: Vec<ErrorRecord>,
}

impl RunStats {
    pub fn from_progress(
        progress: &RunProgress,
        session_started: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        processed_this_run: u64,
        skipped: u64,
    ) -> Self {
        let elapsed_secs = seconds_between(progress.started_at, finished_at);
        let session_secs = seconds_between(session_started, finished_at);
        let processed = progress.processed();
        let success_rate = if processed == 0 {
            0.0
        } else {
            (processed - progress.error_count.min(processed)) as f64 * 100.0 / processed as f64
        };
        let files_per_second = if session_secs > 0.0 {
            processed_this_run as f64 / session_secs
        } else {
            0.0
        };
        Self {
            started_at: progress.started_at,
            finished_at,
            elapsed_secs,
            session_secs,
            total_files: progress.total,
            processed_this_run,
            skipped,
            category_counts: progress.category_counts.clone(),
            error_count: progress.error_count,
            empty_content: progress.empty_content,
            success_rate,
            files_per_second,
            recent_errors: progress.recent_errors.iter().cloned().collect(),
        }
    }

    /// Writes pretty JSON, replacing `path` atomically.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), self)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        Ok(())
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}
