//! Command-line interface definition for mcp-cli
//!
//! This module defines the CLI structure using clap's derive API. Running
//! the binary without a subcommand runs the demo.

use clap::{Args, Parser, Subcommand};

/// mcp-cli - capability-negotiated MCP client/server demo
///
/// Pairs an MCP client and server in one process, negotiates
/// capabilities, and performs one delegated sampling round trip.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute (defaults to `demo`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for mcp-cli
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the client/server handshake and a delegated sampling round trip
    Demo(DemoArgs),
}

/// Options of the `demo` command
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct DemoArgs {
    /// Server instructions returned with the handshake
    #[arg(long)]
    pub instructions: Option<String>,

    /// Deny every sampling request (the round trip ends in a refusal)
    #[arg(long)]
    pub deny_sampling: bool,

    /// Base URL of an OpenAI-compatible server to answer sampling requests
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Prompt the server delegates to the client's model
    #[arg(long)]
    pub prompt: Option<String>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Options of the demo, whether or not it was named explicitly.
    pub fn demo_args(&self) -> DemoArgs {
        match &self.command {
            Some(Commands::Demo(args)) => args.clone(),
            None => DemoArgs::default(),
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: None,
            verbose: false,
            command: None,
        }
    }
}
