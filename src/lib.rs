//! mcp-cli - capability-negotiated MCP client/server library
//!
//! This library implements both roles of the Model Context Protocol over
//! JSON-RPC 2.0, including delegation of LLM sampling from a server back to
//! its client under a consent policy.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: Codec, transports, sessions, negotiation, and the two roles
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: Command handlers used by the binary
//!
//! # Example
//!
//! ```no_run
//! use mcp_cli::mcp::client::{ClientOptions, ClientRole};
//! use mcp_cli::mcp::server::{DelegatingTool, ServerRole};
//! use mcp_cli::mcp::transport::memory::MemoryTransport;
//! use mcp_cli::mcp::types::{CapabilitySet, Implementation};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (client_side, server_side) = MemoryTransport::pair();
//!     let caps = CapabilitySet::new()
//!         .with("tools", json!({}))
//!         .with("sampling", json!({}));
//!
//!     let _server = ServerRole::builder(Implementation::new("server", "1.0"), caps.clone())
//!         .tool(DelegatingTool::new("ask"))
//!         .serve(server_side);
//!     let client = ClientRole::connect(
//!         client_side,
//!         ClientOptions::new(Implementation::new("client", "1.0"), caps),
//!     );
//!
//!     let handshake = client.initialize().await?;
//!     println!("negotiated {}", handshake.protocol_version);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{McpError, Result};
pub use mcp::client::{ClientOptions, ClientRole};
pub use mcp::server::{ServerBuilder, ServerRole};
pub use mcp::session::{Session, SessionConfig};
