use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use krc_core::Category;
use krc_storage::PgStore;
use krc_sync::{RunOutcome, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "krc")]
#[command(about = "Cafe article crawler: change detection and sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape and sync once (all enabled categories, or just one).
    Sync {
        #[arg(long)]
        category: Option<Category>,
    },
    /// Apply database migrations.
    Migrate,
    /// Serve the article API (and the scheduler when enabled).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { category: None }) {
        Commands::Sync { category } => {
            let config = SyncConfig::from_env()?;
            let service = krc_sync::build_service(&config).await?;
            let summary = match category {
                Some(category) => service.run_categories(&[category]).await,
                None => service.run_once().await,
            };
            for report in &summary.categories {
                println!(
                    "{}: {:?} inserted={} updated={} skipped={} excluded={} failed={}",
                    report.category,
                    report.outcome,
                    report.inserted,
                    report.updated,
                    report.skipped,
                    report.excluded,
                    report.failures.len()
                );
            }
            for failure in &summary.failures {
                eprintln!("{}: failed: {}", failure.category, failure.error);
            }
            let outcome = summary.outcome();
            println!("sync complete: run_id={} outcome={:?}", summary.run_id, outcome);
            if matches!(outcome, RunOutcome::PartiallyFailed | RunOutcome::Failed) {
                anyhow::bail!("sync run {} had failures", summary.run_id);
            }
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env()?;
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to article database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            krc_web::serve_from_env().await?;
        }
    }

    Ok(())
}
