/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `demo` -- Pair a client and a server in-process, negotiate, and perform
  one delegated sampling round trip
*/

pub mod demo;

pub use demo::{run_demo, DemoOutcome, DemoReply};
