// Job engine.
// Each job runs as one sequential tokio task (see `runner`). The engine keeps
// only the handles needed to stop or shut those tasks down; job state lives in
// the store and is owned by the task while it runs.

pub mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::{CreateJob, Job, JobStatus, JobSummary};
use crate::source::extractor::RecordExtractor;
use crate::source::fetcher::UnitFetcher;
use crate::source::profile::VerificationMode;
use crate::source::session::SessionManager;
use crate::source::{SourceProfile, Transport};
use crate::store::JobStore;

use runner::JobRunner;

/// Collaborators shared by every job task.
pub(crate) struct EngineContext {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) sessions: SessionManager,
    pub(crate) fetcher: UnitFetcher,
    pub(crate) extractor: RecordExtractor,
    pub(crate) verification_mode: VerificationMode,
}

struct LiveJob {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

pub struct JobEngine {
    ctx: Arc<EngineContext>,
    live: Mutex<HashMap<Uuid, LiveJob>>,
    shutdown: CancellationToken,
}

impl JobEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        transport: Arc<dyn Transport>,
        profile: SourceProfile,
    ) -> Result<Self, AppError> {
        let extractor = RecordExtractor::new(&profile)?;
        let verification_mode = profile.verification_mode;
        let profile = Arc::new(profile);

        Ok(Self {
            ctx: Arc::new(EngineContext {
                store,
                sessions: SessionManager::new(transport.clone(), profile.clone()),
                fetcher: UnitFetcher::new(transport, profile),
                extractor,
                verification_mode,
            }),
            live: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Create, persist and launch a job. The first cycle starts immediately.
    pub async fn start(&self, input: CreateJob) -> Result<Uuid, AppError> {
        let job = Job::new(input.into_config()?);
        let id = job.id;
        let mut live = self.live.lock().await;
        self.ctx.store.put(&job).await?;
        tracing::info!(
            job_id = %id,
            units = job.config.unit_keys.len(),
            queries = job.config.queries.len(),
            "Job created"
        );
        self.spawn(&mut live, job)?;
        Ok(id)
    }

    /// Latest committed snapshot of a job.
    pub async fn status_of(&self, id: Uuid) -> Result<Job, AppError> {
        self.ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::job_not_found(id))
    }

    /// Stop a job. A live task finishes its in-flight request, then neither
    /// its retry pass nor its next cycle runs; the session is dropped with it.
    ///
    /// The live map stays locked until the stop is persisted, so a concurrent
    /// `resume` either sees the task or sees `stopped`.
    pub async fn stop(&self, id: Uuid) -> Result<(), AppError> {
        let mut live = self.live.lock().await;
        if let Some(job) = live.remove(&id) {
            job.stop.cancel();
            if let Err(e) = job.task.await {
                tracing::warn!(job_id = %id, "Job task ended abnormally: {e}");
            }
        }

        let mut job = self.status_of(id).await?;
        if !job.status.is_terminal() {
            job.status = JobStatus::Stopped;
            job.next_cycle_at = None;
            job.retrying = false;
            job.cursor = None;
            job.pending_retry.clear();
            job.touch();
            self.ctx.store.put(&job).await?;
        }
        drop(live);
        tracing::info!(job_id = %id, status = job.status.as_str(), "Stop acknowledged");
        Ok(())
    }

    /// Relaunch a persisted job from where it left off.
    pub async fn resume(&self, id: Uuid) -> Result<(), AppError> {
        let mut live = self.live.lock().await;
        if Self::is_live(&live, id) {
            return Err(AppError::AlreadyRunning(id));
        }
        let job = self.status_of(id).await?;
        if job.status.is_terminal() {
            return Err(AppError::BadRequest(format!(
                "Job {id} is {} and cannot be resumed",
                job.status.as_str()
            )));
        }
        self.spawn(&mut live, job)
    }

    /// Resume every persisted job that is not terminal. Returns the ids
    /// launched; jobs already live are skipped.
    pub async fn resume_all(&self) -> Result<Vec<Uuid>, AppError> {
        let mut resumed = Vec::new();
        for id in self.ctx.store.ids().await? {
            match self.resume(id).await {
                Ok(()) => resumed.push(id),
                Err(AppError::AlreadyRunning(_) | AppError::BadRequest(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(resumed)
    }

    pub async fn list(&self) -> Result<Vec<JobSummary>, AppError> {
        let mut summaries = Vec::new();
        for id in self.ctx.store.ids().await? {
            if let Some(job) = self.ctx.store.get(id).await? {
                summaries.push(job.summary());
            }
        }
        Ok(summaries)
    }

    /// Stop (if needed) and forget a job entirely.
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.stop(id).await?;
        self.ctx.store.delete(id).await?;
        tracing::info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Whether a task for this job is alive (running or waiting for its next cycle).
    pub async fn is_scheduled(&self, id: Uuid) -> bool {
        Self::is_live(&*self.live.lock().await, id)
    }

    /// Halt every live task without marking jobs stopped, so they resume on
    /// the next start.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut live = self.live.lock().await;
        for (id, job) in live.drain() {
            if let Err(e) = job.task.await {
                tracing::warn!(job_id = %id, "Job task ended abnormally: {e}");
            }
        }
    }

    fn is_live(live: &HashMap<Uuid, LiveJob>, id: Uuid) -> bool {
        live.get(&id).is_some_and(|job| !job.task.is_finished())
    }

    /// Launch a runner. Callers hold the live map lock across their status
    /// check and this call.
    fn spawn(&self, live: &mut HashMap<Uuid, LiveJob>, job: Job) -> Result<(), AppError> {
        if Self::is_live(live, job.id) {
            return Err(AppError::AlreadyRunning(job.id));
        }

        let id = job.id;
        let stop = CancellationToken::new();
        let runner = JobRunner::new(job, self.ctx.clone(), stop.clone(), self.shutdown.clone());
        let task = tokio::spawn(runner.run());
        live.insert(id, LiveJob { stop, task });
        Ok(())
    }
}
