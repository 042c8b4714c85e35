//! Per-file work done inside a worker: extract, classify, place.

use crate::classifier;
use crate::extractor::{ExtractionError, Extractor};
use crate::models::{FileOutcome, FileTask, Verdict};
use crate::rules::RuleSet;
use crate::writer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, warn};

/// Everything a worker needs, shared read-only between workers.
#[derive(Debug)]
pub struct WorkerContext {
    pub rules: RuleSet,
    pub extractor: Extractor,
    pub dest_base: PathBuf,
}

/// Runs one file through the pipeline. Never fails: every problem becomes an
/// error outcome carrying the reason. A document with no text is still
/// classified (as unclassified) and copied, and flagged as empty.
pub async fn process_file(task: &FileTask, ctx: &WorkerContext) -> FileOutcome {
    let key = task.key();
    let text = match ctx.extractor.extract(task).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %key, error = %e, "file failed");
            return FileOutcome::error(key, e.to_string());
        }
    };

    let empty = text.trim().is_empty();
    let verdict = classifier::verdict(&text, &ctx.rules);
    let source = task.path.clone();
    let slot = task.copy_slot;
    let dir = ctx.dest_base.join(verdict.category());
    match task::spawn_blocking(move || writer::place(&source, &dir, slot)).await {
        Ok(Ok(placement)) => {
            debug!(path = %key, category = verdict.category(), to = %placement.path().display(), "file processed");
            FileOutcome::new(key, verdict)
                .with_destination(placement.path().to_path_buf())
                .with_empty_content(empty)
        }
        Ok(Err(e)) => {
            warn!(path = %key, error = %e, "file failed");
            FileOutcome::error(key, e.to_string())
        }
        Err(e) => {
            warn!(path = %key, error = %e, "file failed");
            FileOutcome::error(key, format!("copy task failed: {e}"))
        }
    }
}

/// Processes a shard in order, sending each outcome to the coordinator.
/// Stops early if the coordinator has gone away. Returns the number of
/// outcomes delivered.
pub async fn run_worker(
    id: usize,
    shard: Vec<FileTask>,
    ctx: Arc<WorkerContext>,
    tx: mpsc::Sender<FileOutcome>,
) -> usize {
    debug!(worker = id, files = shard.len(), "worker started");
    let mut sent = 0;
    for task in &shard {
        let outcome = process_file(task, &ctx).await;
        if tx.send(outcome).await.is_err() {
            debug!(worker = id, "outcome channel closed, stopping");
            break;
        }
        sent += 1;
    }
    debug!(worker = id, sent, "worker finished");
    sent
}

/// Result of a dry-run classification of one file.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub verdict: Verdict,
    pub chars: usize,
    pub preview: String,
}

/// Extracts and classifies without copying anything.
pub async fn inspect(
    task: &FileTask,
    extractor: &Extractor,
    rules: &RuleSet,
) -> Result<Inspection, ExtractionError> {
    let text = extractor.extract(task).await?;
    let preview: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(Inspection {
        verdict: classifier::verdict(&text, rules),
        chars: text.chars().count(),
        preview: preview.chars().take(200).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::extractor::StrategyKind;
    use crate::rules::CategoryRule;
    use std::fs;
    use std::time::Duration;

    fn context(dest: PathBuf) -> WorkerContext {
        let mut config = ExtractionConfig::default();
        config.strategies.insert("txt".into(), vec![StrategyKind::PlainText]);
        let rules = RuleSet::new(vec![CategoryRule::new("Invoice", ["invoice", "total"], ["draft"])]).unwrap();
        writer::create_category_folders(&dest, &rules).unwrap();
        WorkerContext {
            rules,
            extractor: Extractor::new(&config, Duration::from_secs(5)),
            dest_base: dest,
        }
    }

    #[tokio::test]
    async fn matching_file_is_copied_into_its_category() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("out"));
        let src = dir.path().join("a.txt");
        fs::write(&src, "Invoice total due now").unwrap();

        let outcome = process_file(&FileTask::from_path(&src).unwrap(), &ctx).await;
        assert_eq!(outcome.verdict, Verdict::Categorized("Invoice".into()));
        let dest = outcome.destination.unwrap();
        assert_eq!(dest, dir.path().join("out/Invoice/a.txt"));
        assert!(src.exists(), "source must be left in place");
    }

    #[tokio::test]
    async fn excluded_file_lands_in_unclassified() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("out"));
        let src = dir.path().join("b.txt");
        fs::write(&src, "Invoice total draft").unwrap();

        let outcome = process_file(&FileTask::from_path(&src).unwrap(), &ctx).await;
        assert_eq!(outcome.verdict, Verdict::Unclassified);
        assert!(dir.path().join("out/unclassified/b.txt").is_file());
    }

    #[tokio::test]
    async fn empty_document_is_copied_and_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("out"));
        let src = dir.path().join("blank.txt");
        fs::write(&src, "   ").unwrap();

        let outcome = process_file(&FileTask::from_path(&src).unwrap(), &ctx).await;
        assert_eq!(outcome.verdict, Verdict::Unclassified);
        assert!(outcome.empty_content);
        assert!(dir.path().join("out/unclassified/blank.txt").is_file());
    }

    #[tokio::test]
    async fn unreadable_file_becomes_an_error_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("out"));
        let task = FileTask::from_path(dir.path().join("missing.txt")).unwrap();

        let outcome = process_file(&task, &ctx).await;
        let reason = outcome.verdict.reason().unwrap();
        assert!(!reason.is_empty());
        assert!(outcome.destination.is_none());
    }

    #[tokio::test]
    async fn worker_sends_outcomes_in_shard_order() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(context(dir.path().join("out")));
        let shard: Vec<_> = (0..3)
            .map(|i| {
                let p = dir.path().join(format!("f{i}.txt"));
                fs::write(&p, format!("file {i}")).unwrap();
                FileTask::from_path(p).unwrap()
            })
            .collect();

        let (tx, mut rx) = mpsc::channel(8);
        let sent = run_worker(0, shard.clone(), ctx, tx).await;
        assert_eq!(sent, 3);
        for task in &shard {
            assert_eq!(rx.recv().await.unwrap().path, task.key());
        }
        assert!(rx.recv().await.is_none());
    }
}
