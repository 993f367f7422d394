//! netsage - network operations assistant

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ask_command, init_command, status_command, tools_command};

/// netsage - ask questions about your network devices
#[derive(Parser)]
#[command(name = "netsage")]
#[command(about = "◆ Network operations assistant over telemetry, inventory and ticketing")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file (defaults to ~/.netsage/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the config file
    Init,
    /// Ask a question about the network
    Ask {
        /// Question to run; interactive mode when omitted
        #[arg(short, long)]
        message: Option<String>,
        /// Print the whole outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the registered tools
    Tools,
    /// Show configured backends
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init => init_command(config).await,
        Commands::Ask { message, json } => ask_command(config, message, json).await,
        Commands::Tools => tools_command(config).await,
        Commands::Status => status_command(config).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("◆ ERROR: {:#}", e);
        std::process::exit(1);
    }
}
