//! Log and statistics file naming plus subscriber setup for the binary.

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_PREFIX: &str = "doc_classification_";
const STATS_PREFIX: &str = "stats_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub log_file: PathBuf,
    pub stats_file: PathBuf,
}

/// Picks the log and stats file names for a run. A resumed run keeps writing
/// to the newest existing log so one batch ends up in one file.
pub fn log_target(logs_dir: &Path, resume: bool, now: DateTime<Local>) -> LogTarget {
    let stamp = resume
        .then(|| newest_log_stamp(logs_dir))
        .flatten()
        .unwrap_or_else(|| now.format("%Y%m%d_%H%M%S").to_string());
    LogTarget {
        log_file: logs_dir.join(format!("{LOG_PREFIX}{stamp}.log")),
        stats_file: logs_dir.join(format!("{STATS_PREFIX}{stamp}.json")),
    }
}

fn newest_log_stamp(logs_dir: &Path) -> Option<String> {
    fs::read_dir(logs_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let stamp = name.strip_prefix(LOG_PREFIX)?.strip_suffix(".log")?;
            Some(stamp.to_string())
        })
        .max()
}

/// Installs the global subscriber: human-readable events on stderr and,
/// when `log_file` is given, the same events appended to that file.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}
