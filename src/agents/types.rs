//! Core types for the agents module.

use crate::mcp::SessionError;
use crate::task::TaskBatch;

/// Errors that can occur in agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Tool round limit reached: {0}")]
    ToolRoundLimit(usize),

    #[error("Model returned an empty completion")]
    EmptyCompletion,

    #[error("Invalid task plan: {0}")]
    InvalidDecomposition(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        Self::Llm(format!("{e:#}"))
    }
}

/// Why a task stopped without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The verifier gave no adjustment to try.
    NoAdjustment,
    /// Every verification attempt was used.
    AttemptsExhausted,
}

/// How a task that ran to completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Matched {
        attempts: usize,
    },
    Unresolved {
        attempts: usize,
        reason: UnresolvedReason,
    },
}

impl TaskOutcome {
    pub fn attempts(&self) -> usize {
        match self {
            TaskOutcome::Matched { attempts } | TaskOutcome::Unresolved { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, TaskOutcome::Matched { .. })
    }
}

/// A task that faulted. Holds the text written to the task's `result`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TaskFailure(pub String);

impl TaskFailure {
    pub fn from_error(err: &AgentError) -> Self {
        Self(format!("Error: {err}"))
    }
}

/// Everything a batch run produced.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// SQL of the last task in the batch
    pub final_sql: String,
    /// Result of the last task in the batch
    pub final_result: String,
    /// The batch with every task's last attempt recorded
    pub batch: TaskBatch,
    /// Per-task outcome keyed by task id, in batch order
    pub outcomes: Vec<(String, Result<TaskOutcome, TaskFailure>)>,
}

impl BatchReport {
    pub fn outcome(&self, id: &str) -> Option<&Result<TaskOutcome, TaskFailure>> {
        self.outcomes
            .iter()
            .find(|(task_id, _)| task_id == id)
            .map(|(_, outcome)| outcome)
    }

    /// Number of tasks that faulted.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_err()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn failure_text_carries_cause() {
        let err = AgentError::Session(SessionError::Timeout {
            method: "tools/call".to_string(),
            after: Duration::from_secs(60),
        });
        let failure = TaskFailure::from_error(&err);
        assert!(failure.0.starts_with("Error: "));
        assert!(failure.0.contains("tools/call"));
    }

    #[test]
    fn llm_errors_keep_their_context_chain() {
        let err: AgentError = anyhow::anyhow!("HTTP 503").context("completion failed").into();
        assert_eq!(err.to_string(), "LLM error: completion failed: HTTP 503");
    }
}
