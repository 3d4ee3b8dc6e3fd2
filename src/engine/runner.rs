use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::engine::EngineContext;
use crate::error::SessionError;
use crate::matching::aggregator::{RAW_BUFFER_CAP, append_raw, merge_unit};
use crate::matching::{Matcher, Thresholds};
use crate::models::job::{Job, JobStatus};
use crate::models::record::{MatchedEntry, RawEntry};
use crate::source::fetcher::FetchFailure;
use crate::source::profile::VerificationMode;
use crate::source::session::SessionState;

/// Pause between consecutive unit requests, retries included.
pub const UNIT_DELAY: Duration = Duration::from_millis(1500);

/// Pause before the end-of-cycle retry pass.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halted,
    /// The job moved to `error` and must not run again.
    Failed,
}

/// Owns one job for the lifetime of its task: its record, its session and
/// its cancellation tokens. Nothing else mutates the job while this runs.
pub(crate) struct JobRunner {
    job: Job,
    session: SessionState,
    /// The held verification code has not been spent on a request yet.
    code_fresh: bool,
    matcher: Matcher,
    ctx: Arc<EngineContext>,
    stop: CancellationToken,
    shutdown: CancellationToken,
}

impl JobRunner {
    pub(crate) fn new(
        job: Job,
        ctx: Arc<EngineContext>,
        stop: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        let matcher = Matcher::new(Thresholds::for_mode(job.config.match_mode));
        Self {
            job,
            session: SessionState::default(),
            code_fresh: false,
            matcher,
            ctx,
            stop,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let job_id = self.job.id;
        if let Err(e) = self.drive().await {
            tracing::error!(job_id = %job_id, error = %e, "Job task ended with an error");
        }
        self.session.clear();
    }

    async fn drive(&mut self) -> Result<(), crate::error::AppError> {
        if !self.bootstrap().await {
            return Ok(());
        }

        loop {
            if let Some(at) = self.job.next_cycle_at {
                let wait = (at - Utc::now()).to_std().unwrap_or_default();
                tracing::debug!(job_id = %self.job.id, wait_secs = wait.as_secs(), "Waiting for next cycle");
                if !self.pause(wait).await {
                    self.halt().await;
                    return Ok(());
                }

                // A stop written by another process is honoured on wake.
                let persisted = self.ctx.store.get(self.job.id).await?;
                if persisted.is_none_or(|j| j.status == JobStatus::Stopped) {
                    tracing::info!(job_id = %self.job.id, "Job stopped externally, not starting next cycle");
                    return Ok(());
                }
            }

            match self.run_cycle().await {
                Flow::Continue => {}
                Flow::Halted => {
                    self.halt().await;
                    return Ok(());
                }
                Flow::Failed => return Ok(()),
            }
        }
    }

    /// `initializing → running`, or `→ error` when no session can be had.
    async fn bootstrap(&mut self) -> bool {
        self.job.status = JobStatus::Initializing;
        self.commit().await;

        if let Err(e) = self.refresh_session().await {
            self.fail("Job initialization failed", e.to_string()).await;
            return false;
        }

        if self.halted() {
            self.halt().await;
            return false;
        }

        self.job.status = if self.job.cursor.is_some() && self.job.retrying {
            JobStatus::RetryingErrors
        } else {
            JobStatus::Running
        };
        self.commit().await;
        tracing::info!(job_id = %self.job.id, units = self.job.config.unit_keys.len(), "Job running");
        true
    }

    async fn run_cycle(&mut self) -> Flow {
        let units = self.job.config.unit_keys.clone();
        let start = match self.job.cursor {
            Some(idx) => idx.min(units.len()),
            None => {
                self.job.pending_retry.clear();
                self.job.last_cycle_started_at = Some(Utc::now());
                0
            }
        };

        self.job.cursor = Some(start);
        self.job.next_cycle_at = None;
        if !self.job.retrying {
            self.job.status = JobStatus::Running;
        }
        self.commit().await;
        tracing::info!(
            job_id = %self.job.id,
            cycle = self.job.cycles_completed + 1,
            from = start,
            "Cycle started"
        );

        for (idx, unit) in units.iter().enumerate().skip(start) {
            if self.halted() {
                return Flow::Halted;
            }
            if idx > start && !self.pause(UNIT_DELAY).await {
                return Flow::Halted;
            }

            if self.process_unit(*unit, true).await == Flow::Halted {
                return Flow::Halted;
            }
            self.job.cursor = Some(idx + 1);
            self.commit().await;
        }

        if !self.job.pending_retry.is_empty() && self.retry_pass().await == Flow::Halted {
            return Flow::Halted;
        }

        if self.halted() {
            return Flow::Halted;
        }

        self.job.cursor = None;
        self.job.cycles_completed += 1;
        let interval_secs = self.job.config.interval_secs;
        let Some(next) = next_cycle_after(Utc::now(), interval_secs) else {
            self.fail(
                "Cannot schedule next cycle",
                format!("next cycle {interval_secs}s ahead is out of range"),
            )
            .await;
            return Flow::Failed;
        };
        self.job.next_cycle_at = Some(next);
        self.commit().await;
        tracing::info!(
            job_id = %self.job.id,
            cycle = self.job.cycles_completed,
            matches = self.job.match_count(),
            raw = self.job.raw_records.len(),
            errors = self.job.errors.len(),
            "Cycle finished"
        );
        Flow::Continue
    }

    /// Re-attempt every unit that failed in the main pass, once.
    async fn retry_pass(&mut self) -> Flow {
        if self.halted() {
            return Flow::Halted;
        }

        self.job.status = JobStatus::RetryingErrors;
        self.job.retrying = true;
        self.commit().await;
        tracing::info!(
            job_id = %self.job.id,
            units = self.job.pending_retry.len(),
            "Retrying failed units"
        );

        if !self.pause(RETRY_DELAY).await {
            return Flow::Halted;
        }

        let pending = self.job.pending_retry.clone();
        for (idx, unit) in pending.into_iter().enumerate() {
            if self.halted() {
                return Flow::Halted;
            }
            if idx > 0 && !self.pause(UNIT_DELAY).await {
                return Flow::Halted;
            }

            if self.process_unit(unit, false).await == Flow::Halted {
                return Flow::Halted;
            }
            self.job.pending_retry.retain(|k| *k != unit);
            self.commit().await;
        }

        self.job.retrying = false;
        self.job.status = JobStatus::Running;
        Flow::Continue
    }

    /// Fetch, extract, match and fold one unit into the job. Failures are
    /// recorded on the job; a main-pass failure that is not a session expiry
    /// is queued for the retry pass. A failure while halting is dropped so the
    /// unit is redone on resume.
    async fn process_unit(&mut self, unit: NaiveDate, main_pass: bool) -> Flow {
        match self.fetch_with_refresh(unit).await {
            Ok(payload) => {
                self.absorb(unit, &payload);
                self.job.clear_error(unit);
            }
            Err(_) if self.halted() => return Flow::Halted,
            Err(failure) => {
                tracing::warn!(
                    job_id = %self.job.id,
                    unit = %unit,
                    session_expired = failure.session_expired,
                    "Unit failed: {}",
                    failure.reason
                );
                self.job.record_error(unit, failure.reason);
                if main_pass && !failure.session_expired && !self.job.pending_retry.contains(&unit)
                {
                    self.job.pending_retry.push(unit);
                }
            }
        }
        Flow::Continue
    }

    /// One request, plus exactly one session refresh and one repeat if the
    /// token turns out to be expired.
    async fn fetch_with_refresh(&mut self, unit: NaiveDate) -> Result<String, FetchFailure> {
        if self.ctx.verification_mode == VerificationMode::PerUnit && !self.code_fresh {
            self.refresh_session()
                .await
                .map_err(|e| refresh_failure("verification code refresh failed", e, false))?;
        }

        match self.fetch(unit).await {
            Err(failure) if failure.session_expired => {
                tracing::warn!(job_id = %self.job.id, unit = %unit, "Session expired, re-acquiring");
                self.refresh_session()
                    .await
                    .map_err(|e| refresh_failure("session refresh failed", e, true))?;
                if !self.pause(UNIT_DELAY).await {
                    return Err(FetchFailure {
                        reason: "halted before re-fetch".to_string(),
                        session_expired: true,
                    });
                }
                self.fetch(unit).await
            }
            other => other,
        }
    }

    async fn fetch(&mut self, unit: NaiveDate) -> Result<String, FetchFailure> {
        // Without a token the fetcher refuses before sending anything.
        if self.session.is_ready() {
            self.job.total_requests += 1;
        }
        let result = self
            .ctx
            .fetcher
            .fetch(&mut self.session, unit, &self.job.config.category)
            .await;
        self.code_fresh = false;
        result
    }

    async fn refresh_session(&mut self) -> Result<(), SessionError> {
        let grant = self
            .ctx
            .sessions
            .acquire(
                self.job.id,
                &mut self.session,
                self.job.config.verification_code.as_deref(),
            )
            .await?;
        self.code_fresh = true;
        tracing::debug!(
            job_id = %self.job.id,
            verification_code = %grant.verification_code,
            "Session refreshed"
        );
        Ok(())
    }

    fn absorb(&mut self, unit: NaiveDate, payload: &str) {
        let records = self.ctx.extractor.extract(payload);
        let raw_count = records.len();

        if self.job.config.queries.is_empty() {
            append_raw(
                &mut self.job.raw_records,
                records.into_iter().map(|record| RawEntry {
                    unit_key: unit,
                    record,
                }),
                RAW_BUFFER_CAP,
            );
            tracing::info!(job_id = %self.job.id, unit = %unit, rows = raw_count, "Unit collected");
            return;
        }

        let matches: Vec<MatchedEntry> = records
            .into_iter()
            .filter_map(|record| {
                let best = self.matcher.best_match(&self.job.config.queries, &record)?;
                Some(MatchedEntry {
                    record,
                    score: best.score.score,
                    field: best.field,
                    matched_text: best.score.matched_text,
                    unit_key: unit,
                    query: Some(best.query),
                })
            })
            .collect();
        let matched = matches.len();

        let existing = self.job.found_unit(unit).cloned();
        if matched > 0 || existing.is_some() {
            self.job
                .commit_found(merge_unit(existing, matches, unit, raw_count));
        }
        tracing::info!(job_id = %self.job.id, unit = %unit, rows = raw_count, matched, "Unit processed");
    }

    fn halted(&self) -> bool {
        self.stop.is_cancelled() || self.shutdown.is_cancelled()
    }

    /// Sleep unless cancelled first. Returns false when cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Persist the final state of a cancelled task. A stop is terminal; a
    /// shutdown leaves the job resumable where it was.
    async fn halt(&mut self) {
        if self.stop.is_cancelled() {
            self.job.status = JobStatus::Stopped;
            self.job.next_cycle_at = None;
            self.job.retrying = false;
            self.job.cursor = None;
            self.job.pending_retry.clear();
            tracing::info!(job_id = %self.job.id, "Job stopped");
        } else {
            tracing::info!(job_id = %self.job.id, "Job suspended for shutdown");
        }
        self.commit().await;
    }

    /// Move the job to `error`. Nothing restarts it automatically.
    async fn fail(&mut self, context: &str, message: String) {
        tracing::error!(job_id = %self.job.id, error = %message, "{context}");
        self.job.status = JobStatus::Error;
        self.job.fatal_error = Some(message);
        self.job.next_cycle_at = None;
        self.job.retrying = false;
        self.commit().await;
    }

    /// Publish the whole record; readers only ever see unit-granular state.
    async fn commit(&mut self) {
        self.job.touch();
        if let Err(e) = self.ctx.store.put(&self.job).await {
            tracing::error!(job_id = %self.job.id, error = %e, "Failed to persist job state");
        }
    }
}

/// `session_expired` only when the refresh answered an expired token; a
/// failed fresh-code fetch is an ordinary transient failure.
fn refresh_failure(context: &str, e: SessionError, session_expired: bool) -> FetchFailure {
    FetchFailure {
        reason: format!("{context}: {e}"),
        session_expired,
    }
}

fn next_cycle_after(from: DateTime<Utc>, interval_secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(interval_secs).ok()?;
    from.checked_add_signed(TimeDelta::try_seconds(secs)?)
}
