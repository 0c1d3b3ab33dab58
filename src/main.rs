mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

use chatexport::config::Config;
use chatexport::ledger::ExportLedger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => chatexport::api::run(args.address).await?,
        Commands::Prune => {
            let config = Config::load()?;
            let ledger = ExportLedger::open(&config.server.ledger_path)?;
            let stats = ledger.prune_expired(config.retention.batch_ttl_days)?;
            println!(
                "pruned {} batches and {} job records",
                stats.batches_pruned, stats.jobs_pruned
            );
        }
    }

    Ok(())
}
