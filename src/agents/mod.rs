//! Agents module - the generate → verify → adjust pipeline.
//!
//! # Components
//! - **QueryDecomposer**: splits a question into an ordered task batch
//! - **SqlGenerator**: writes and revises SQL from plain completions
//! - **SqlVerifier**: runs SQL through database tools and returns a verdict
//! - **verdict**: parses the verifier's labeled reply
//! - **TaskOrchestrator**: walks a batch, bounding attempts per task
//!
//! Generator and verifier are traits so the orchestrator can be driven by
//! scripted fakes in tests.

mod decomposer;
mod generator;
mod orchestrator;
mod types;
pub mod verdict;
mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use decomposer::QueryDecomposer;
pub use generator::{LlmGenerator, SqlGenerator};
pub use orchestrator::{OrchestratorError, TaskOrchestrator, DEFAULT_MAX_ATTEMPTS};
pub use types::{AgentError, BatchReport, TaskFailure, TaskOutcome, UnresolvedReason};
pub use verdict::{ParsedVerdict, Verdict, VerdictField};
pub use verifier::{LlmVerifier, SqlVerifier, DEFAULT_MAX_TOOL_ROUNDS};
