use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use sheetsync::model::{SubmissionStatus, SyncOutcome};
use sheetsync::schedule::Selection;
use sheetsync::sheets::SheetsClient;
use sheetsync::sync::{Orchestrator, SyncSettings};
use sheetsync::{alert, config, db, mailer};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sync every eligible submission regardless of working hours, then exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Stop after this many passes even if submissions remain
    #[arg(long, default_value = "1000")]
    max_passes: u32,
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: u32,
    attempted: u32,
    failed: u32,
    lost: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let lease = cfg.app.claim_lease_seconds as i64;
    let eligible = db::count_eligible(&pool, Utc::now(), lease).await?;
    info!(eligible, "initial sync state");
    if eligible == 0 {
        info!("nothing to sync, exiting");
        return Ok(());
    }

    let store = Arc::new(SheetsClient::from_config(&cfg)?);
    let alerter: Arc<dyn alert::Alerter> = Arc::from(alert::from_config(&cfg));
    let mailer: Arc<dyn mailer::Mailer> = Arc::from(mailer::from_config(&cfg)?);
    let settings = SyncSettings::from_config(&cfg)?;
    let orchestrator = Orchestrator::new(pool.clone(), store, alerter, mailer, settings);

    let mut tally = Tally::default();
    for pass in 1..=args.max_passes {
        match orchestrator.execute_with(Selection::Fifo, Utc::now()).await? {
            SyncOutcome::Idle => break,
            SyncOutcome::Busy => continue,
            SyncOutcome::Succeeded(_) => tally.succeeded += 1,
            SyncOutcome::Attempted(_) => tally.attempted += 1,
            SyncOutcome::PermanentlyUnsupported(_) => tally.failed += 1,
            SyncOutcome::ClaimLost(_) => tally.lost += 1,
        }
        if pass % 10 == 0 {
            info!(pass, ?tally, "sync progress");
        }
        if pass == args.max_passes {
            warn!(max_passes = args.max_passes, "pass limit reached");
        }
    }

    let retrying = db::count_by_status(&pool, SubmissionStatus::Attempted).await?;
    let pending = db::count_by_status(&pool, SubmissionStatus::Pending).await?;
    info!(?tally, retrying, pending, "sync run finished");
    Ok(())
}
