//! Drives a batch run: partitions pending files across a fixed worker pool,
//! folds their outcomes into the run progress and checkpoints it.
//!
//! The coordinator is the only owner of [`RunProgress`]. Workers send
//! [`FileOutcome`]s over a bounded channel and never touch shared state.

use crate::config::{AppConfig, CorruptStatePolicy, ProcessingConfig};
use crate::error::RunError;
use crate::extractor::Extractor;
use crate::models::{FileOutcome, FileTask, RunProgress};
use crate::partition;
use crate::pipeline::{self, WorkerContext};
use crate::rules::RuleSet;
use crate::scanner;
use crate::stats::RunStats;
use crate::writer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{ProgressStore, StoreError};
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Dispatching,
    Draining,
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Done => 0,
            RunStatus::Failed => 1,
            RunStatus::Interrupted => 130,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub progress: RunProgress,
    /// Only present once a run reaches `Done`.
    pub stats: Option<RunStats>,
    pub stats_path: Option<PathBuf>,
    pub processed_this_run: u64,
    pub skipped: u64,
}

enum Dispatch {
    Completed(usize),
    Interrupted(usize),
}

pub struct Coordinator {
    config: AppConfig,
    rules: RuleSet,
    store: ProgressStore,
    state: RunState,
    fresh: bool,
    stats_path: Option<PathBuf>,
}

impl Coordinator {
    pub fn new(config: AppConfig) -> Result<Self, RunError> {
        let rules = RuleSet::from_config(&config.categories)?;
        let store = ProgressStore::in_dir(&config.directories.logs());
        Ok(Self {
            config,
            rules,
            store,
            state: RunState::Idle,
            fresh: false,
            stats_path: None,
        })
    }

    /// Discard any saved progress before starting.
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    /// Where to write the final statistics. Defaults to a timestamped file
    /// in the logs directory.
    pub fn stats_path(mut self, path: PathBuf) -> Self {
        self.stats_path = Some(path);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Runs the batch until it is done, fails, or `shutdown` resolves.
    ///
    /// `shutdown` is watched while scanning and dispatching. Once every file
    /// has been committed the run finishes regardless.
    ///
    /// On `Err` the state is `Failed` and the last good checkpoint is left on
    /// disk for a later resume.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunReport, RunError>
    where
        F: Future<Output = ()>,
    {
        self.run_with(shutdown, pipeline::run_worker).await
    }

    async fn run_with<F, W, Fut>(&mut self, shutdown: F, worker: W) -> Result<RunReport, RunError>
    where
        F: Future<Output = ()>,
        W: Fn(usize, Vec<FileTask>, Arc<WorkerContext>, mpsc::Sender<FileOutcome>) -> Fut,
        Fut: Future<Output = usize> + Send + 'static,
    {
        match self.execute(shutdown, worker).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "run failed");
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn execute<F, W, Fut>(&mut self, shutdown: F, worker: W) -> Result<RunReport, RunError>
    where
        F: Future<Output = ()>,
        W: Fn(usize, Vec<FileTask>, Arc<WorkerContext>, mpsc::Sender<FileOutcome>) -> Fut,
        Fut: Future<Output = usize> + Send + 'static,
    {
        tokio::pin!(shutdown);
        let session_started = Utc::now();
        let workers = resolve_worker_count(&self.config.processing)?;
        let dest = self.config.directories.dest();
        let logs = self.config.directories.logs();

        writer::probe_writable(&dest)
            .and_then(|_| writer::create_category_folders(&dest, &self.rules))
            .map_err(|source| RunError::DestinationUnwritable {
                path: dest.clone(),
                source,
            })?;

        if self.fresh {
            self.store.clear().map_err(RunError::Store)?;
            info!(path = %self.store.path().display(), "discarded saved progress");
        }
        let mut progress = self.load_progress(session_started)?;

        let source = self.config.directories.source();
        let scan = self.config.scan.clone();
        let skip = vec![dest.clone(), logs.clone()];
        let scanning = task::spawn_blocking(move || scanner::discover(&source, &scan, &skip));
        let discovery = tokio::select! {
            biased;
            _ = &mut shutdown => {
                warn!("run interrupted while scanning");
                return Ok(RunReport {
                    status: RunStatus::Interrupted,
                    progress,
                    stats: None,
                    stats_path: None,
                    processed_this_run: 0,
                    skipped: 0,
                });
            }
            scanned = scanning => scanned
                .map_err(|e| RunError::Scan(anyhow::anyhow!("scanner task failed: {e}")))?
                .map_err(RunError::Scan)?,
        };
        if discovery.unreadable > 0 {
            warn!(entries = discovery.unreadable, "some source entries could not be read");
        }

        let plan = partition::plan(discovery.files, &progress.done, workers);
        progress.total = plan.total;
        info!(
            total = plan.total,
            pending = plan.pending,
            skipped = plan.skipped,
            workers = plan.shards.len(),
            "work planned"
        );

        let mut batch = Vec::new();
        let received = if plan.is_empty() {
            0
        } else {
            self.checkpoint(&mut batch, &mut progress).await?;
            self.transition(RunState::Dispatching);
            match self
                .dispatch(plan.shards, &mut progress, shutdown.as_mut(), worker)
                .await?
            {
                Dispatch::Completed(received) => received,
                Dispatch::Interrupted(received) => {
                    warn!(
                        done = progress.processed(),
                        total = progress.total,
                        snapshot = %self.store.path().display(),
                        "run interrupted, progress saved"
                    );
                    return Ok(RunReport {
                        status: RunStatus::Interrupted,
                        progress,
                        stats: None,
                        stats_path: None,
                        processed_this_run: received as u64,
                        skipped: plan.skipped as u64,
                    });
                }
            }
        };

        self.transition(RunState::Finalizing);
        self.checkpoint(&mut batch, &mut progress).await?;
        let finished = Utc::now();
        let stats = RunStats::from_progress(
            &progress,
            session_started,
            finished,
            received as u64,
            plan.skipped as u64,
        );
        let stats_path = self.stats_path.clone().unwrap_or_else(|| default_stats_path(&logs, finished));
        let stats_path = match stats.write_json(&stats_path) {
            Ok(()) => Some(stats_path),
            Err(e) => {
                warn!(path = %stats_path.display(), error = %e, "could not write statistics");
                None
            }
        };
        self.store.clear().map_err(RunError::Store)?;
        self.transition(RunState::Done);
        info!(
            total = progress.total,
            categorized = progress.categorized(),
            errors = progress.error_count,
            elapsed_secs = stats.elapsed_secs,
            "run completed"
        );

        Ok(RunReport {
            status: RunStatus::Done,
            progress,
            stats: Some(stats),
            stats_path,
            processed_this_run: received as u64,
            skipped: plan.skipped as u64,
        })
    }

    async fn dispatch<F, W, Fut>(
        &mut self,
        shards: Vec<Vec<FileTask>>,
        progress: &mut RunProgress,
        shutdown: F,
        worker: W,
    ) -> Result<Dispatch, RunError>
    where
        F: Future<Output = ()>,
        W: Fn(usize, Vec<FileTask>, Arc<WorkerContext>, mpsc::Sender<FileOutcome>) -> Fut,
        Fut: Future<Output = usize> + Send + 'static,
    {
        let processing = self.config.processing.clone();
        let expected: usize = shards.iter().map(Vec::len).sum();
        let ctx = Arc::new(WorkerContext {
            rules: self.rules.clone(),
            extractor: Extractor::new(
                &self.config.extraction,
                Duration::from_secs(processing.extraction_timeout_secs),
            ),
            dest_base: self.config.directories.dest(),
        });

        let (tx, mut rx) = mpsc::channel::<FileOutcome>((shards.len() * 4).max(16));
        let mut workers = JoinSet::new();
        for (id, shard) in shards.into_iter().enumerate() {
            workers.spawn(worker(id, shard, ctx.clone(), tx.clone()));
        }
        drop(tx);

        let every = processing.checkpoint_every.max(1);
        let period = Duration::from_secs(processing.checkpoint_interval_secs.max(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut batch: Vec<FileOutcome> = Vec::with_capacity(every.min(1024));
        let mut received = 0usize;
        let mut errors = 0usize;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    workers.abort_all();
                    while let Ok(outcome) = rx.try_recv() {
                        received += 1;
                        batch.push(outcome);
                    }
                    self.checkpoint(&mut batch, progress).await?;
                    return Ok(Dispatch::Interrupted(received));
                }
                joined = workers.join_next(), if !workers.is_empty() => {
                    match joined {
                        Some(Err(e)) => {
                            workers.abort_all();
                            while let Ok(outcome) = rx.try_recv() {
                                batch.push(outcome);
                            }
                            if let Err(persist) = self.checkpoint(&mut batch, progress).await {
                                warn!(error = %persist, "could not save progress after worker crash");
                            }
                            return Err(RunError::WorkerCrashed(e.to_string()));
                        }
                        Some(Ok(_)) if workers.is_empty() => self.transition(RunState::Draining),
                        _ => {}
                    }
                }
                next = rx.recv() => {
                    let Some(outcome) = next else {
                        if received < expected {
                            if let Err(persist) = self.checkpoint(&mut batch, progress).await {
                                warn!(error = %persist, "could not save progress after channel closed");
                            }
                            // a panicking worker drops its sender before its join result is ready
                            while let Some(joined) = workers.join_next().await {
                                if let Err(e) = joined {
                                    return Err(RunError::WorkerCrashed(e.to_string()));
                                }
                            }
                            return Err(RunError::ChannelClosed { received, expected });
                        }
                        break;
                    };
                    received += 1;
                    if outcome.verdict.is_error() {
                        errors += 1;
                    }
                    batch.push(outcome);
                    if received % processing.progress_interval.max(1) as usize == 0 {
                        log_progress(received, expected, errors, started);
                    }
                    if batch.len() >= every {
                        self.checkpoint(&mut batch, progress).await?;
                    }
                    if received == expected {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.checkpoint(&mut batch, progress).await?;
                    }
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                self.checkpoint(&mut batch, progress).await?;
                return Err(RunError::WorkerCrashed(e.to_string()));
            }
        }
        if self.state == RunState::Dispatching {
            self.transition(RunState::Draining);
        }
        self.checkpoint(&mut batch, progress).await?;
        Ok(Dispatch::Completed(received))
    }

    /// Commits `batch` and clears it, retrying with a linear backoff.
    async fn checkpoint(
        &self,
        batch: &mut Vec<FileOutcome>,
        progress: &mut RunProgress,
    ) -> Result<(), RunError> {
        let retries = self.config.processing.persist_retries;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.commit_blocking(batch, progress).await {
                Ok(added) => {
                    info!(
                        added,
                        done = progress.processed(),
                        total = progress.total,
                        "checkpoint written"
                    );
                    batch.clear();
                    return Ok(());
                }
                Err(e) if attempt <= retries => {
                    warn!(attempt, error = %e, "checkpoint failed, retrying");
                    time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(source) => {
                    return Err(RunError::Persist {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    /// Runs [`ProgressStore::commit`] on the blocking pool so the snapshot's
    /// `sync_all` does not hold up outcome intake.
    async fn commit_blocking(
        &self,
        batch: &mut Vec<FileOutcome>,
        progress: &mut RunProgress,
    ) -> Result<usize, StoreError> {
        let store = self.store.clone();
        let outcomes = std::mem::take(batch);
        let started_at = progress.started_at;
        let mut owned = std::mem::replace(progress, RunProgress::new(started_at));
        let (owned, outcomes, committed) = task::spawn_blocking(move || {
            let committed = store.commit(&outcomes, &mut owned);
            (owned, outcomes, committed)
        })
        .await
        .map_err(|e| StoreError::Io {
            path: self.store.path().to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, e),
        })?;
        *progress = owned;
        *batch = outcomes;
        committed
    }

    fn load_progress(&self, now: DateTime<Utc>) -> Result<RunProgress, RunError> {
        match self.store.load() {
            Ok(progress) if progress.done.is_empty() => Ok(RunProgress::new(now)),
            Ok(progress) => {
                info!(
                    done = progress.processed(),
                    total = progress.total,
                    started_at = %progress.started_at,
                    "resuming previous run"
                );
                Ok(progress)
            }
            Err(e) if e.is_corrupt() => match self.config.processing.on_corrupt_state {
                CorruptStatePolicy::Restart => {
                    warn!(error = %e, "discarding corrupt progress snapshot, starting fresh");
                    self.store.clear().map_err(RunError::Store)?;
                    Ok(RunProgress::new(now))
                }
                CorruptStatePolicy::Abort => Err(RunError::CorruptState(e)),
            },
            Err(e) => Err(RunError::Store(e)),
        }
    }

    fn transition(&mut self, next: RunState) {
        info!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }
}

/// CPU count clamped to the configured bounds, unless a fixed count is set.
pub fn resolve_worker_count(processing: &ProcessingConfig) -> Result<usize, RunError> {
    let (min, max) = (processing.min_workers, processing.max_workers);
    if min == 0 || min > max {
        return Err(RunError::InvalidWorkerBounds { min, max });
    }
    Ok(match processing.workers {
        Some(n) => n.max(1),
        None => num_cpus::get().clamp(min, max),
    })
}

fn default_stats_path(logs: &std::path::Path, at: DateTime<Utc>) -> PathBuf {
    logs.join(format!("stats_{}.json", at.format("%Y%m%d_%H%M%S")))
}

fn log_progress(received: usize, expected: usize, errors: usize, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let rate = received as f64 / elapsed.max(f64::EPSILON);
    let eta_secs = (expected - received) as f64 / rate.max(f64::EPSILON);
    info!(
        done = received,
        total = expected,
        errors,
        files_per_sec = (rate * 10.0).round() / 10.0,
        eta_secs = eta_secs.round() as u64,
        "progress"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing(min: usize, max: usize, workers: Option<usize>) -> ProcessingConfig {
        ProcessingConfig {
            min_workers: min,
            max_workers: max,
            workers,
            ..ProcessingConfig::default()
        }
    }

    #[test]
    fn worker_count_is_clamped_to_bounds() {
        let n = resolve_worker_count(&processing(2, 8, None)).unwrap();
        assert!((2..=8).contains(&n));
        assert_eq!(resolve_worker_count(&processing(3, 3, None)).unwrap(), 3);
    }

    #[test]
    fn explicit_worker_count_wins_but_is_at_least_one() {
        assert_eq!(resolve_worker_count(&processing(2, 8, Some(12))).unwrap(), 12);
        assert_eq!(resolve_worker_count(&processing(2, 8, Some(0))).unwrap(), 1);
    }

    #[test]
    fn invalid_bounds_are_fatal() {
        assert!(matches!(
            resolve_worker_count(&processing(0, 8, None)),
            Err(RunError::InvalidWorkerBounds { min: 0, max: 8 })
        ));
        assert!(matches!(
            resolve_worker_count(&processing(9, 8, Some(4))),
            Err(RunError::InvalidWorkerBounds { .. })
        ));
    }

    #[tokio::test]
    async fn crashed_worker_fails_the_run_and_keeps_the_snapshot() {
        use crate::config::{CategoryConfig, DirectoryConfig, ExtractionConfig, ScanConfig};
        use crate::extractor::StrategyKind;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        for i in 0..4 {
            std::fs::write(src.join(format!("f{i}.txt")), "Invoice total").unwrap();
        }
        let mut extraction = ExtractionConfig::default();
        extraction
            .strategies
            .insert("txt".into(), vec![StrategyKind::PlainText]);
        let config = AppConfig {
            directories: DirectoryConfig {
                source_dir: src.to_string_lossy().into_owned(),
                dest_base_dir: dir.path().join("out").to_string_lossy().into_owned(),
                logs_dir: "logs".into(),
            },
            categories: vec![CategoryConfig {
                name: "Invoice".into(),
                include: vec!["invoice".into()],
                exclude: vec![],
            }],
            scan: ScanConfig {
                extensions: vec!["txt".into()],
                exclude: vec![],
            },
            processing: ProcessingConfig {
                workers: Some(2),
                ..ProcessingConfig::default()
            },
            extraction,
        };

        let mut coordinator = Coordinator::new(config).unwrap();
        let result = coordinator
            .run_with(std::future::pending(), |id, shard, ctx, tx| async move {
                if id == 1 {
                    panic!("worker {id} crashed");
                }
                pipeline::run_worker(id, shard, ctx, tx).await
            })
            .await;

        assert!(matches!(result, Err(RunError::WorkerCrashed(_))), "{result:?}");
        assert_eq!(coordinator.state(), RunState::Failed);
        let saved = coordinator.store().load().unwrap();
        assert_eq!(saved.total, 4);
        assert!(saved.processed() <= 2);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunStatus::Done.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::Interrupted.exit_code(), 130);
    }
}
