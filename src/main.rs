//! Biblion circulation daemon
//!
//! Runs the circulation batch jobs, either as a long-lived scheduler or as
//! one-shot console commands (handy for cron and for dry runs).

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biblion_circulation::{
    clock::SystemClock,
    config::AppConfig,
    jobs::Scheduler,
    repository::Repository,
    services::{notifier::EmailNotifier, Services},
};

#[derive(Parser)]
#[command(name = "biblion-circd", about = "Biblion circulation jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all periodic circulation jobs until interrupted
    Serve,
    /// Assess overdue fines once and exit
    AssessFines {
        /// Only print what would change
        #[arg(long)]
        dry_run: bool,
    },
    /// Expire uncollected READY reservations once and exit
    ExpireReservations {
        /// Only print what would change
        #[arg(long)]
        dry_run: bool,
    },
    /// Block delinquent accounts once and exit
    BlockDelinquent {
        /// Only print what would change
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load().expect("Failed to load configuration");

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("biblion_circulation={}", config.logging.level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting biblion-circd v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    let repository = Repository::new(pool);
    let notifier = Arc::new(EmailNotifier::new(config.email.clone()));
    let services = Arc::new(Services::new(
        repository,
        config.circulation.clone(),
        notifier,
        Arc::new(SystemClock),
    ));

    match cli.command {
        Command::Serve => {
            let scheduler = Scheduler::new(services, config.jobs.clone());
            let handles = scheduler.spawn();
            tracing::info!("Scheduler running; press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            for handle in handles {
                handle.abort();
            }
        }
        Command::AssessFines { dry_run } => {
            let summary = services.fines.assess_overdue(dry_run).await?;
            println!(
                "Processed {} loan(s): {} fine(s) created, {} updated, {} failed.",
                summary.processed, summary.created, summary.updated, summary.failed
            );
        }
        Command::ExpireReservations { dry_run } => {
            let summary = services.reservations.expire_sweep(dry_run).await?;
            println!(
                "Expired {} reservation(s); reassigned {} copy(ies) to the next readers; {} failed.",
                summary.expired, summary.promoted, summary.failed
            );
        }
        Command::BlockDelinquent { dry_run } => {
            let summary = services.delinquency.enforce(dry_run).await?;
            println!(
                "Examined {} account(s): {} blocked, {} failed.",
                summary.examined, summary.blocked, summary.failed
            );
        }
    }

    Ok(())
}
