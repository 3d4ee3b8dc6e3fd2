mod config;
mod db;
mod engine;
mod error;
mod matching;
mod models;
mod source;
mod store;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{Command, Config};
use crate::engine::JobEngine;
use crate::source::SourceProfile;
use crate::source::profile::VerificationMode;
use crate::source::transport::ReqwestTransport;
use crate::store::{JobStore, MemoryJobStore, PgJobStore};

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rollwatch=info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, jobs are kept in memory for this process only");
        return Ok(Arc::new(MemoryJobStore::new()));
    };

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    Ok(Arc::new(PgJobStore::new(pool)))
}

fn load_profile(config: &Config, per_unit_code: bool) -> anyhow::Result<SourceProfile> {
    let mut profile = match &config.profile {
        Some(path) => SourceProfile::load(path)?,
        None => SourceProfile::default(),
    };
    if let Some(base_url) = &config.base_url {
        profile.base_url = base_url.clone();
    }
    if per_unit_code {
        profile.verification_mode = VerificationMode::PerUnit;
    }
    Ok(profile)
}

/// Run live jobs until Ctrl-C, then suspend them so `resume` can pick them up.
async fn run_until_interrupted(engine: &JobEngine) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, suspending jobs");
    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    let per_unit_code = matches!(&config.command, Command::Watch(args) if args.per_unit_code);
    let store = open_store(&config).await?;
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(
        config.request_timeout,
    ))?);
    let engine = JobEngine::new(store, transport, load_profile(&config, per_unit_code)?)?;

    match &config.command {
        Command::Watch(args) => {
            let id = engine.start(args.to_create_job()?).await?;
            tracing::info!(job_id = %id, "Watching; press Ctrl-C to suspend");
            println!("{id}");
            run_until_interrupted(&engine).await?;
        }
        Command::Resume => {
            let resumed = engine.resume_all().await?;
            if resumed.is_empty() {
                tracing::info!("No resumable jobs");
                return Ok(());
            }
            tracing::info!(jobs = resumed.len(), "Resumed jobs");
            run_until_interrupted(&engine).await?;
        }
        Command::Status { id } => {
            let job = engine.status_of(*id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::List => {
            for summary in engine.list().await? {
                println!("{}", serde_json::to_string(&summary)?);
            }
        }
        Command::Stop { id } => {
            engine.stop(*id).await?;
            println!("stopped {id}");
        }
        Command::Delete { id } => {
            engine.delete(*id).await?;
            println!("deleted {id}");
        }
    }

    Ok(())
}
