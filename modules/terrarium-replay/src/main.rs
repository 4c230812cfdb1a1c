//! Replay CLI — rebuild the projections from the event log and verify
//! the result matches what was there before.

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use terrarium_common::Config;
use terrarium_events::EventStore;
use terrarium_projector::{run_replay, snapshot, Materializer, ReplayOptions};

#[derive(Parser)]
#[command(name = "replay", about = "Projection replay harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Truncate the projections, reprocess the full log, and compare.
    Run {
        /// Projection tables to leave untouched.
        #[arg(long)]
        preserve: Vec<String>,
        /// Give up if the rebuild has not caught up within this many seconds.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// Print current per-table counts and checksums without touching anything.
    Snapshot,
    /// Print how many envelopes the projector has not yet consumed.
    Lag,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("terrarium=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let pool = PgPool::connect(&config.database_url).await?;

    terrarium_events::ensure_schema(&pool).await?;
    terrarium_projector::ensure_schema(&pool).await?;

    let store = EventStore::new(pool.clone());
    let materializer = Materializer::new(pool.clone(), store.clone(), config.session_gap_secs);

    match cli.command {
        Command::Run {
            preserve,
            timeout_secs,
        } => {
            info!(?preserve, timeout_secs, "Replay starting");
            let report = run_replay(
                &pool,
                &store,
                &materializer,
                ReplayOptions {
                    preserve,
                    timeout: Duration::from_secs(timeout_secs),
                },
            )
            .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.converged() {
                anyhow::bail!("replay diverged in {} table(s)", report.divergences.len());
            }
        }
        Command::Snapshot => {
            let snap = snapshot(&pool).await?;
            println!("{}", serde_json::to_string_pretty(&snap)?);
        }
        Command::Lag => {
            println!("{}", materializer.lag().await?);
        }
    }

    Ok(())
}
