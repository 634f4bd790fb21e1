mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use evalbox::api;
use evalbox::config::Config;
use evalbox::ledger::FjallLedger;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve(args) => {
            let mut config = config;
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(api::run(config))?;
        }
        Commands::Prune => {
            let ledger = FjallLedger::open(&config.ledger.path)?;
            let stats = ledger.prune_expired(config.retention.window())?;
            println!(
                "pruned: {} jobs, {} results, {} uploads, {} idempotency keys",
                stats.jobs_pruned,
                stats.results_pruned,
                stats.uploads_pruned,
                stats.idempotency_pruned
            );
        }
    }

    Ok(())
}
