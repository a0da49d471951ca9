use anyhow::Result;
use clap::{Parser, Subcommand};
use conduit_runtime::init_tracing;

mod commands;

/// Conduit workflow network command line
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[clap(long, global = true, default_value = "warn")]
    log_level: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a node configuration file and print its summary
    #[clap(name = "check-config")]
    CheckConfig {
        /// Path to the TOML configuration
        #[clap(long)]
        config: String,
    },

    /// Run a two-step workflow across two in-process nodes
    Demo {
        /// Run time of each component in milliseconds
        #[clap(long, default_value_t = 100)]
        duration_ms: u64,

        /// Make the second component fail
        #[clap(long)]
        fail: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::CheckConfig { config } => commands::config::check_config(&config).await,
        Commands::Demo { duration_ms, fail } => commands::demo::run_demo(duration_ms, fail).await,
    }
}
