//! Per-track analysis state machine on top of the worker pool.
//!
//! `pending -> analyzing -> completed | failed`. Completed records are never
//! re-analyzed; failed ones wait for an explicit retry.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::TrackId;
use crate::analyzer::FeatureBackend;
use crate::camelot::{CamelotKey, canonical_key_name};
use crate::db::{Database, DbError};
use crate::db::models::{AnalysisStatus, FeatureUpdate, TrackFeatures};
use crate::worker::{Hints, PoolError, RawFeatures, WorkerPool};

/// Plausible tempo range; anything outside is stored as unknown (0).
pub const MIN_BPM: f64 = 30.0;
pub const MAX_BPM: f64 = 300.0;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Persistence operations the orchestrator relies on.
pub trait AnalysisStore: Send + Sync {
    fn find_by_track_id(&self, track_id: TrackId) -> Result<Option<TrackFeatures>, DbError>;
    fn create(&self, track_id: TrackId) -> Result<TrackFeatures, DbError>;
    fn update(
        &self,
        track_id: TrackId,
        status: AnalysisStatus,
        fields: &FeatureUpdate,
    ) -> Result<(), DbError>;
    fn find_by_status(&self, status: AnalysisStatus) -> Result<Vec<TrackFeatures>, DbError>;
    fn find_by_track_ids(&self, track_ids: &[TrackId]) -> Result<Vec<TrackFeatures>, DbError>;
    fn count_pending(&self) -> Result<i64, DbError>;
    fn count_by_status(&self, status: AnalysisStatus) -> Result<i64, DbError>;
}

/// One unit of batch work.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    pub track_id: TrackId,
    pub file_path: PathBuf,
    pub hints: Hints,
}

/// Turn DJ tags into analysis hints, dropping values that would not survive
/// validation anyway.
pub fn hints_from_tags(bpm: Option<f64>, key: Option<String>) -> Hints {
    Hints {
        bpm: bpm.filter(|b| (MIN_BPM..=MAX_BPM).contains(b)),
        key: key
            .as_deref()
            .and_then(CamelotKey::from_key_name)
            .map(|k| k.key_name().to_string()),
    }
}

/// Validate backend output before it is persisted.
pub fn sanitize(raw: &RawFeatures, analyzed_at: String) -> FeatureUpdate {
    let bpm = if raw.bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&raw.bpm) {
        raw.bpm
    } else {
        0.0
    };
    FeatureUpdate {
        bpm: Some(bpm),
        key: Some(canonical_key_name(&raw.key).to_string()),
        energy: unit(raw.energy),
        danceability: raw.danceability.and_then(unit),
        analysis_error: None,
        analyzed_at: Some(analyzed_at),
    }
}

fn unit(v: f64) -> Option<f64> {
    v.is_finite().then(|| v.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Completed through the coarse fallback because no worker was available.
    Degraded,
    Failed,
    /// Already completed; nothing done.
    Skipped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub analyzed: u64,
    pub degraded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl BatchResult {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.analyzed += 1,
            JobOutcome::Degraded => self.degraded += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub analyzing: i64,
    pub completed: i64,
    pub failed: i64,
    /// Analyses in flight in this process.
    pub running: usize,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct AnalysisOrchestrator<S> {
    store: Arc<S>,
    pool: WorkerPool,
    fallback: Option<Arc<dyn FeatureBackend>>,
    running: Arc<AtomicUsize>,
}

impl<S> Clone for AnalysisOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            pool: self.pool.clone(),
            fallback: self.fallback.clone(),
            running: Arc::clone(&self.running),
        }
    }
}

impl<S: AnalysisStore + 'static> AnalysisOrchestrator<S> {
    pub fn new(store: Arc<S>, pool: WorkerPool) -> Self {
        Self {
            store,
            pool,
            fallback: None,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Backend used in-process when the pool reports `BackendUnavailable`.
    pub fn with_fallback(mut self, backend: Arc<dyn FeatureBackend>) -> Self {
        self.fallback = Some(backend);
        self
    }

    /// Analyze one track and persist the outcome.
    ///
    /// Analysis failures are recorded on the track and reported as
    /// [`JobOutcome::Failed`]; only persistence errors are returned as `Err`.
    pub async fn analyze_track(&self, job: &AnalysisJob) -> Result<JobOutcome, JobError> {
        match self.store.find_by_track_id(job.track_id)? {
            Some(record) if record.status == AnalysisStatus::Completed => {
                log::debug!("Track {} already analyzed, skipping", job.track_id);
                return Ok(JobOutcome::Skipped);
            }
            Some(_) => {}
            None => {
                self.store.create(job.track_id)?;
            }
        }

        self.store
            .update(job.track_id, AnalysisStatus::Analyzing, &FeatureUpdate::default())?;

        let (result, degraded) = {
            let _running = RunningGuard::new(&self.running);
            match self.pool.analyze(&job.file_path, job.hints.clone()).await {
                Err(PoolError::BackendUnavailable) if self.fallback.is_some() => {
                    (self.analyze_degraded(job).await, true)
                }
                other => (other, false),
            }
        };

        match result {
            Ok(raw) => {
                let update = sanitize(&raw, chrono::Utc::now().to_rfc3339());
                self.store
                    .update(job.track_id, AnalysisStatus::Completed, &update)?;
                if degraded {
                    log::info!(
                        "Coarse analysis for {} (no workers available)",
                        job.file_path.display()
                    );
                    Ok(JobOutcome::Degraded)
                } else {
                    Ok(JobOutcome::Completed)
                }
            }
            Err(e) => {
                log::warn!("Analysis failed for {}: {}", job.file_path.display(), e);
                let update = FeatureUpdate {
                    analysis_error: Some(e.to_string()),
                    ..FeatureUpdate::default()
                };
                self.store.update(job.track_id, AnalysisStatus::Failed, &update)?;
                Ok(JobOutcome::Failed)
            }
        }
    }

    async fn analyze_degraded(&self, job: &AnalysisJob) -> Result<RawFeatures, PoolError> {
        let Some(backend) = self.fallback.clone() else {
            return Err(PoolError::BackendUnavailable);
        };
        let path = job.file_path.clone();
        let hints = job.hints.clone();
        match tokio::task::spawn_blocking(move || backend.analyze(&path, &hints)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(PoolError::DecodeFailed(e.to_string())),
            Err(e) => Err(PoolError::DecodeFailed(format!("fallback analysis panicked: {}", e))),
        }
    }

    /// Analyze a batch, never running more tracks at once than there are
    /// ready workers. A failing track never aborts the batch.
    pub async fn analyze_batch(&self, jobs: Vec<AnalysisJob>, pb: &ProgressBar) -> BatchResult {
        let mut result = BatchResult::default();
        let mut remaining = jobs.into_iter().peekable();

        while remaining.peek().is_some() {
            let width = self.pool.ready_workers().max(1);
            let mut set = JoinSet::new();
            for job in remaining.by_ref().take(width) {
                let this = self.clone();
                set.spawn(async move {
                    let outcome = this.analyze_track(&job).await;
                    (job, outcome)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(outcome))) => result.record(outcome),
                    Ok((job, Err(e))) => {
                        log::error!("Could not record analysis of {}: {}", job.file_path.display(), e);
                        result.failed += 1;
                    }
                    Err(e) => {
                        log::error!("Analysis task aborted: {}", e);
                        result.failed += 1;
                    }
                }
                pb.inc(1);
            }

            pb.set_message(format!(
                "{} analyzed, {} coarse, {} failed",
                result.analyzed, result.degraded, result.failed
            ));
        }

        result
    }

    pub fn stats(&self) -> Result<JobStats, JobError> {
        Ok(JobStats {
            pending: self.store.count_pending()?,
            analyzing: self.store.count_by_status(AnalysisStatus::Analyzing)?,
            completed: self.store.count_by_status(AnalysisStatus::Completed)?,
            failed: self.store.count_by_status(AnalysisStatus::Failed)?,
            running: self.running.load(Ordering::SeqCst),
        })
    }
}

impl AnalysisOrchestrator<Mutex<Database>> {
    /// Run every `pending` track (and `failed` ones when retrying) through
    /// the pool. Records left in `analyzing` by an interrupted run are
    /// re-queued first.
    pub async fn analyze_pending(&self, retry_failed: bool) -> Result<BatchResult, JobError> {
        let jobs = {
            let db = self.store.lock().map_err(|_| DbError::LockPoisoned)?;
            let reset = db.reset_interrupted()?;
            if reset > 0 {
                log::info!("Re-queued {} tracks from an interrupted run", reset);
            }
            db.pending_jobs(retry_failed)?
        };

        if jobs.is_empty() {
            log::info!("No tracks to analyze");
            return Ok(BatchResult::default());
        }

        log::info!(
            "Analyzing {} tracks with {} workers",
            jobs.len(),
            self.pool.ready_workers()
        );

        let pb = ProgressBar::new(jobs.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );

        let result = self.analyze_batch(jobs, &pb).await;
        pb.finish_with_message(format!(
            "Done: {} analyzed, {} coarse, {} failed, {} skipped",
            result.analyzed, result.degraded, result.failed, result.skipped
        ));
        Ok(result)
    }
}
