use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use donation_ledger::receipt::HttpReceiptService;
use donation_ledger::{config, db, outbox};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print the example configuration and exit
    #[arg(long)]
    print_example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    if cfg.gateway.assume_received_on_create {
        info!("degraded mode: cash donations are marked received at creation");
    }

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/donations.db?mode=rwc", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let receipts = HttpReceiptService::from_config(&cfg)?;
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let max_backoff = cfg.app.max_backoff_seconds as i64;

    info!("starting receipt dispatch worker");
    loop {
        match outbox::process_next_task(&pool, &receipts, max_backoff).await {
            Ok(processed) => {
                if !processed {
                    tokio::time::sleep(poll_sleep).await;
                }
            }
            Err(err) => {
                error!(?err, "outbox worker error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
