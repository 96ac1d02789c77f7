use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use sheetsync::model::SyncOutcome;
use sheetsync::sheets::SheetsClient;
use sheetsync::sync::{Orchestrator, SyncSettings};
use sheetsync::{alert, config, db, mailer};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let store = Arc::new(SheetsClient::from_config(&cfg)?);
    let alerter: Arc<dyn alert::Alerter> = Arc::from(alert::from_config(&cfg));
    let mailer: Arc<dyn mailer::Mailer> = Arc::from(mailer::from_config(&cfg)?);
    let settings = SyncSettings::from_config(&cfg)?;
    let orchestrator = Orchestrator::new(pool, store, alerter, mailer, settings);

    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    info!(worker_id = orchestrator.worker_id(), "starting sync worker");
    loop {
        let pause = match orchestrator.execute().await {
            Ok(SyncOutcome::Idle) | Ok(SyncOutcome::Busy) => poll_sleep,
            Ok(_) => Duration::ZERO,
            Err(err) => {
                error!(?err, "sync worker error");
                Duration::from_secs(1)
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
    Ok(())
}
