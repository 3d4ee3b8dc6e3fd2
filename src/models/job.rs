use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::record::{FoundUnit, RawEntry};

/// Longest accepted pause between cycles (30 days).
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Initializing,
    Running,
    RetryingErrors,
    Stopped,
    Error,
}

impl JobStatus {
    /// Terminal jobs never run again on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Initializing => "initializing",
            JobStatus::Running => "running",
            JobStatus::RetryingErrors => "retrying_errors",
            JobStatus::Stopped => "stopped",
            JobStatus::Error => "error",
        }
    }
}

/// Acceptance floors used by the approximate matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Strict,
    Broad,
}

/// Immutable job configuration, fixed at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub unit_keys: Vec<NaiveDate>,
    pub category: String,
    /// Empty means "collect everything".
    #[serde(default)]
    pub queries: Vec<String>,
    pub interval_secs: u64,
    /// Caller-supplied code, always preferred over an extracted one.
    #[serde(default)]
    pub verification_code: Option<String>,
    #[serde(default)]
    pub match_mode: MatchMode,
}

#[derive(Debug, Deserialize)]
pub struct CreateJob {
    pub unit_keys: Vec<NaiveDate>,
    pub category: String,
    pub queries: Vec<String>,
    pub interval_secs: u64,
    pub verification_code: Option<String>,
    pub match_mode: MatchMode,
}

impl CreateJob {
    /// Validate caller input into a job configuration.
    pub fn into_config(self) -> Result<JobConfig, AppError> {
        if self.unit_keys.is_empty() {
            return Err(AppError::BadRequest("At least one date is required".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(AppError::BadRequest(
                "Poll interval must be at least one second".to_string(),
            ));
        }
        if self.interval_secs > MAX_INTERVAL_SECS {
            return Err(AppError::BadRequest(format!(
                "Poll interval must be at most {MAX_INTERVAL_SECS} seconds"
            )));
        }

        let queries = self
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        let verification_code = self
            .verification_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(JobConfig {
            unit_keys: self.unit_keys,
            category: self.category,
            queries,
            interval_secs: self.interval_secs,
            verification_code,
            match_mode: self.match_mode,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub unit_key: NaiveDate,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub config: JobConfig,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_requests: u64,
    pub found: Vec<FoundUnit>,
    pub raw_records: VecDeque<RawEntry>,
    pub errors: Vec<ErrorRecord>,
    pub errored_units: BTreeSet<NaiveDate>,
    pub retrying: bool,
    /// Index of the next unit of the cycle in progress.
    pub cursor: Option<usize>,
    /// Units waiting for the end-of-cycle retry pass.
    pub pending_retry: Vec<NaiveDate>,
    pub next_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub fatal_error: Option<String>,
}

impl Job {
    pub fn new(config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            config,
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
            total_requests: 0,
            found: Vec::new(),
            raw_records: VecDeque::new(),
            errors: Vec::new(),
            errored_units: BTreeSet::new(),
            retrying: false,
            cursor: None,
            pending_retry: Vec::new(),
            next_cycle_at: None,
            last_cycle_started_at: None,
            cycles_completed: 0,
            fatal_error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record (or refresh) the error entry for a unit and flag it.
    pub fn record_error(&mut self, unit_key: NaiveDate, message: impl Into<String>) {
        let entry = ErrorRecord {
            unit_key,
            message: message.into(),
            at: Utc::now(),
        };
        match self.errors.iter_mut().find(|e| e.unit_key == unit_key) {
            Some(existing) => *existing = entry,
            None => self.errors.push(entry),
        }
        self.errored_units.insert(unit_key);
    }

    pub fn clear_error(&mut self, unit_key: NaiveDate) {
        self.errors.retain(|e| e.unit_key != unit_key);
        self.errored_units.remove(&unit_key);
    }

    pub fn found_unit(&self, unit_key: NaiveDate) -> Option<&FoundUnit> {
        self.found.iter().find(|f| f.unit_key == unit_key)
    }

    /// Replace the found unit for its date, or append it in first-seen order.
    pub fn commit_found(&mut self, unit: FoundUnit) {
        match self.found.iter_mut().find(|f| f.unit_key == unit.unit_key) {
            Some(existing) => *existing = unit,
            None => self.found.push(unit),
        }
    }

    pub fn match_count(&self) -> usize {
        self.found.iter().map(|f| f.entries.len()).sum()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            units: self.config.unit_keys.len(),
            matches: self.match_count(),
            raw_records: self.raw_records.len(),
            errors: self.errors.len(),
            cycles_completed: self.cycles_completed,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub status: JobStatus,
    pub units: usize,
    pub matches: usize,
    pub raw_records: usize,
    pub errors: usize,
    pub cycles_completed: u64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn create(queries: Vec<&str>) -> CreateJob {
        CreateJob {
            unit_keys: vec![date(1), date(2)],
            category: "female".to_string(),
            queries: queries.into_iter().map(String::from).collect(),
            interval_secs: 60,
            verification_code: Some("  ".to_string()),
            match_mode: MatchMode::Strict,
        }
    }

    #[test]
    fn test_into_config_drops_blank_queries_and_code() {
        let config = create(vec![" asha ", "", "   "]).into_config().unwrap();
        assert_eq!(config.queries, vec!["asha".to_string()]);
        assert_eq!(config.verification_code, None);
    }

    #[test]
    fn test_into_config_rejects_empty_dates() {
        let mut input = create(vec![]);
        input.unit_keys.clear();
        assert!(matches!(input.into_config(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_into_config_rejects_zero_interval() {
        let mut input = create(vec![]);
        input.interval_secs = 0;
        assert!(matches!(input.into_config(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_into_config_bounds_interval() {
        let mut input = create(vec![]);
        input.interval_secs = MAX_INTERVAL_SECS;
        assert!(input.into_config().is_ok());

        for interval_secs in [MAX_INTERVAL_SECS + 1, 10_000_000_000_000, u64::MAX] {
            let mut input = create(vec![]);
            input.interval_secs = interval_secs;
            assert!(matches!(input.into_config(), Err(AppError::BadRequest(_))));
        }
    }

    #[test]
    fn test_record_error_keeps_one_entry_per_unit() {
        let mut job = Job::new(create(vec![]).into_config().unwrap());
        job.record_error(date(1), "timeout");
        job.record_error(date(1), "status 503");
        job.record_error(date(2), "timeout");

        assert_eq!(job.errors.len(), 2);
        assert_eq!(job.errors[0].message, "status 503");
        assert!(job.errored_units.contains(&date(1)));

        job.clear_error(date(1));
        assert_eq!(job.errors.len(), 1);
        assert!(!job.errored_units.contains(&date(1)));
    }

    #[test]
    fn test_status_round_trips_as_snake_case() {
        let json = serde_json::to_string(&JobStatus::RetryingErrors).unwrap();
        assert_eq!(json, "\"retrying_errors\"");
        assert_eq!(JobStatus::RetryingErrors.as_str(), "retrying_errors");
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
