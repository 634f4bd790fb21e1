use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "evalbox")]
#[command(about = "EvalBox CLI", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the EvalBox service (API, workers and maintenance loops)
    Serve(ServeArgs),

    /// Run one retention pass and exit
    Prune,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Override the configured bind address
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
