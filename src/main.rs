//! mcp-cli - capability-negotiated MCP client/server demo
//!
#![doc = "Main entry point for the mcp-cli application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_cli::cli::{Cli, Commands};
use mcp_cli::commands;
use mcp_cli::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command; no subcommand runs the demo
    let args = match cli.command {
        Some(Commands::Demo(args)) => args,
        None => Default::default(),
    };
    tracing::info!("Starting sampling delegation demo");
    if args.deny_sampling {
        tracing::debug!("Sampling will be denied by policy");
    }
    if let Some(url) = &args.backend_url {
        tracing::debug!("Using backend URL override: {}", url);
    }

    commands::run_demo(config, args).await?;
    Ok(())
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so stdout carries only the demo's output.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "mcp_cli=debug" } else { "mcp_cli=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
