use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

use crate::error::AppError;
use crate::models::job::{CreateJob, MatchMode};

#[derive(Parser, Debug, Clone)]
#[command(name = "rollwatch", about = "Watch a date-keyed public roll for names")]
pub struct Config {
    /// Database connection URL; jobs are kept in memory when unset
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true", global = true)]
    pub run_migrations: bool,

    /// Base URL of the watched site (overrides the profile)
    #[arg(long, env = "SOURCE_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub request_timeout: u64,

    /// JSON file describing the site's markup and form fields
    #[arg(long, env = "SOURCE_PROFILE", global = true)]
    pub profile: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start a new watch job and run it until interrupted
    Watch(WatchArgs),
    /// Resume every persisted job that is not stopped or failed
    Resume,
    /// Print a job snapshot as JSON
    Status { id: uuid::Uuid },
    /// List all jobs
    List,
    /// Mark a job stopped
    Stop { id: uuid::Uuid },
    /// Stop a job and remove its record
    Delete { id: uuid::Uuid },
}

#[derive(clap::Args, Debug, Clone)]
pub struct WatchArgs {
    /// Date to poll (YYYY-MM-DD), repeatable
    #[arg(long = "date")]
    pub dates: Vec<NaiveDate>,

    /// First date of an inclusive range
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Last date of an inclusive range
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Category sent with every request
    #[arg(long, default_value = "female")]
    pub category: String,

    /// Name to look for, repeatable; without any, raw rows are collected
    #[arg(long = "query")]
    pub queries: Vec<String>,

    /// Seconds between the end of one cycle and the start of the next
    #[arg(long, default_value = "300")]
    pub interval: u64,

    /// Verification code to send instead of the one shown on the page
    #[arg(long, env = "VERIFICATION_CODE")]
    pub verification_code: Option<String>,

    /// The site issues one-time codes; fetch a new one before every request
    #[arg(long)]
    pub per_unit_code: bool,

    /// Use the permissive acceptance floors
    #[arg(long)]
    pub broad: bool,
}

impl WatchArgs {
    /// Explicit dates first, then the range, without repeats.
    pub fn unit_keys(&self) -> Result<Vec<NaiveDate>, AppError> {
        let mut keys = self.dates.clone();
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AppError::BadRequest(format!(
                    "Range start {from} is after its end {to}"
                )));
            }
            keys.extend(from.iter_days().take_while(|d| *d <= to));
        }

        let mut seen = std::collections::HashSet::new();
        keys.retain(|d| seen.insert(*d));
        Ok(keys)
    }

    pub fn to_create_job(&self) -> Result<CreateJob, AppError> {
        Ok(CreateJob {
            unit_keys: self.unit_keys()?,
            category: self.category.clone(),
            queries: self.queries.clone(),
            interval_secs: self.interval,
            verification_code: self.verification_code.clone(),
            match_mode: if self.broad {
                MatchMode::Broad
            } else {
                MatchMode::Strict
            },
        })
    }
}
