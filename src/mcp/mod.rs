//! MCP (Model Context Protocol) engine
//!
//! Both sides of a capability-negotiated JSON-RPC 2.0 exchange, including
//! delegation of LLM sampling from the server back to the client.
//!
//! The implementation targets protocol revision **2025-06-18** with
//! **2025-03-26** accepted as a fallback.
//!
//! # Module Layout
//!
//! - `types`       -- Protocol types, method names and error codes
//! - `codec`       -- JSON-RPC envelope encoding and classification
//! - `transport`   -- `Transport` trait with in-memory and stdio implementations
//! - `session`     -- Correlated requests, inbound dispatch, cancellation
//! - `negotiation` -- Handshake state machine and capability gating
//! - `server`      -- Server role: tools, resources, prompts, sampling requests
//! - `client`      -- Client role: typed operations, consent-gated sampling
//! - `consent`     -- Policies ruling on delegated sampling
//! - `backend`     -- Inference backends answering allowed sampling requests
//! - `telemetry`   -- Protocol event sinks

pub mod backend;
pub mod client;
pub mod codec;
pub mod consent;
pub mod negotiation;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod types;
