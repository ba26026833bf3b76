mod cli;
mod commands;
mod mcp;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let is_serve = matches!(cli.command, Command::Serve);
    let default_level = if is_serve { "info" } else { "warn" };

    // Logs go to stderr so stdout stays clean for CLI output and the MCP protocol.
    // RUST_LOG=debug shows every cache hit and store query.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Init => commands::cmd_init(&cli.db),
        Command::Seed => commands::cmd_seed(&cli.db, cli.json),
        Command::List { dataset, latest } => {
            commands::cmd_list(&cli.db, dataset.into(), latest, cli.json)
        }
        Command::Stats => commands::cmd_stats(&cli.db, cli.json),
        Command::Serve => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(mcp::run_server(&cli.db))
        }
    }
}
