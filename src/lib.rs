//! # text2sql
//!
//! Turns a batch of natural-language subqueries into verified SQL. Each task
//! goes through a bounded generate → verify → adjust loop: a completion model
//! writes the statement, a tool-calling verifier runs it against the live
//! database through an MCP tool provider, and the verifier's feedback drives
//! revisions until the result matches or the attempts run out. A single
//! question can also be split into such a batch first.
//!
//! ## Modules
//! - `agents`: decomposer, generator, verifier, verdict parsing and the orchestrator
//! - `llm`: OpenAI-compatible completion client
//! - `mcp`: stdio tool sessions speaking JSON-RPC
//! - `task`: tasks, batches, context and snapshots
//! - `config`: environment configuration

pub mod agents;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod task;

pub use config::Config;
