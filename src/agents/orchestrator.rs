//! Task orchestrator: drives a batch through generate → verify → adjust.
//!
//! # Execution model
//! Tasks run strictly one after another in batch order. Each task gets a
//! bounded number of verification attempts; between attempts the generator
//! revises the statement using the verifier's adjustment. A task that faults
//! is recorded as `"Error: <cause>"` and the batch moves on.
//!
//! # Invariants
//! - Adjust is called at most `max_attempts - 1` times per task
//! - A task's `sql` is always the statement most recently attempted
//! - Every session that was connected is released, whatever the outcome
//! - The snapshot is rewritten after every task

use std::sync::Arc;

use super::generator::SqlGenerator;
use super::types::{AgentError, BatchReport, TaskFailure, TaskOutcome, UnresolvedReason};
use super::verifier::SqlVerifier;
use crate::config::SessionScope;
use crate::mcp::{SessionConnector, ToolSession};
use crate::task::{BatchContext, StoreError, Task, TaskBatch, TaskStore};

/// Default verification attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Recorded when the verifier's final reply carries no text at all.
const EMPTY_REPLY: &str = "Error: verifier returned an empty reply";

/// Errors that abort a whole batch. Per-task faults never end up here.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Task batch is empty")]
    EmptyBatch,

    #[error("Failed to persist tasks: {0}")]
    Store(#[from] StoreError),
}

/// Runs task batches.
pub struct TaskOrchestrator {
    generator: Arc<dyn SqlGenerator>,
    verifier: Arc<dyn SqlVerifier>,
    connector: Arc<dyn SessionConnector>,
    store: Option<TaskStore>,
    max_attempts: usize,
    scope: SessionScope,
}

impl TaskOrchestrator {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        verifier: Arc<dyn SqlVerifier>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        Self {
            generator,
            verifier,
            connector,
            store: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scope: SessionScope::default(),
        }
    }

    /// Persist the batch to `store` after every task.
    pub fn with_store(mut self, store: TaskStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Verification attempts per task. At least one.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_session_scope(mut self, scope: SessionScope) -> Self {
        self.scope = scope;
        self
    }

    /// Execute every task in `batch`, in order.
    ///
    /// Each finished task's SQL is appended to `context`, so later tasks see
    /// earlier ones when they are generated.
    ///
    /// # Errors
    /// `EmptyBatch` for an empty batch, `Store` if a snapshot cannot be
    /// written. Task-level failures are reported in the returned outcomes.
    pub async fn execute_tasks(
        &self,
        mut batch: TaskBatch,
        context: &mut BatchContext,
    ) -> Result<BatchReport, OrchestratorError> {
        if batch.is_empty() {
            return Err(OrchestratorError::EmptyBatch);
        }

        let ids: Vec<String> = batch.iter().map(|t| t.id().to_string()).collect();
        let total = ids.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut shared: Option<Box<dyn ToolSession>> = None;

        for (index, id) in ids.into_iter().enumerate() {
            let Some(task) = batch.get_mut(&id) else {
                continue;
            };
            tracing::info!("Task {}/{} [{}]: {}", index + 1, total, id, task.description());

            let outcome = match self.run_task(task, context, &mut shared).await {
                Ok(outcome) => {
                    match outcome {
                        TaskOutcome::Matched { attempts } => {
                            tracing::info!("Task {} matched after {} attempt(s)", id, attempts)
                        }
                        TaskOutcome::Unresolved { attempts, reason } => tracing::warn!(
                            "Task {} unresolved after {} attempt(s): {:?}",
                            id,
                            attempts,
                            reason
                        ),
                    }
                    Ok(outcome)
                }
                Err(e) => {
                    tracing::error!("Task {} failed: {}", id, e);
                    let failure = TaskFailure::from_error(&e);
                    task.record_result(failure.0.clone());
                    Err(failure)
                }
            };

            context.push_prior(task.description(), task.sql());
            outcomes.push((id, outcome));

            if let Err(e) = self.persist(&batch).await {
                release_shared(&mut shared).await;
                return Err(e.into());
            }
        }

        release_shared(&mut shared).await;

        let (final_sql, final_result) = batch
            .last()
            .map(|t| (t.sql().to_string(), t.result().to_string()))
            .ok_or(OrchestratorError::EmptyBatch)?;

        Ok(BatchReport {
            final_sql,
            final_result,
            batch,
            outcomes,
        })
    }

    async fn persist(&self, batch: &TaskBatch) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.save(batch).await,
            None => Ok(()),
        }
    }

    /// Generate, then verify with a session acquired per the configured scope.
    async fn run_task(
        &self,
        task: &mut Task,
        context: &BatchContext,
        shared: &mut Option<Box<dyn ToolSession>>,
    ) -> Result<TaskOutcome, AgentError> {
        let rendered = context.render();
        let sql = self
            .generator
            .generate(task.description(), rendered.as_deref())
            .await?;
        task.record_sql(sql.clone());

        match self.scope {
            SessionScope::PerTask => {
                let mut session = self.connector.connect().await?;
                let outcome = self.refine(task, sql, session.as_mut()).await;
                session.release().await;
                outcome
            }
            SessionScope::PerBatch => {
                let mut session = match shared.take() {
                    Some(session) => session,
                    None => self.connector.connect().await?,
                };
                let outcome = self.refine(task, sql, session.as_mut()).await;
                if outcome.is_ok() {
                    *shared = Some(session);
                } else {
                    // A faulted session may be wedged; the next task reconnects.
                    session.release().await;
                }
                outcome
            }
        }
    }

    /// The bounded verify/adjust loop for one task.
    async fn refine(
        &self,
        task: &mut Task,
        mut sql: String,
        session: &mut dyn ToolSession,
    ) -> Result<TaskOutcome, AgentError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!("Verifying task {} (attempt {}/{})", task.id(), attempt, self.max_attempts);

            let parsed = self
                .verifier
                .run(task.description(), &sql, session)
                .await?;
            let result = match parsed.result_text() {
                "" if parsed.is_degraded() => EMPTY_REPLY.to_string(),
                text => text.to_string(),
            };
            task.record_result(result);
            let verdict = parsed.into_verdict();

            if verdict.is_match {
                return Ok(TaskOutcome::Matched { attempts: attempt });
            }

            let feedback = verdict.adjustment.trim();
            if feedback.is_empty() {
                return Ok(TaskOutcome::Unresolved {
                    attempts: attempt,
                    reason: UnresolvedReason::NoAdjustment,
                });
            }
            if attempt >= self.max_attempts {
                return Ok(TaskOutcome::Unresolved {
                    attempts: attempt,
                    reason: UnresolvedReason::AttemptsExhausted,
                });
            }

            tracing::debug!("Adjusting task {}: {}", task.id(), feedback);
            sql = self.generator.adjust(&sql, feedback).await?;
            task.record_sql(sql.clone());
        }
    }
}

async fn release_shared(shared: &mut Option<Box<dyn ToolSession>>) {
    if let Some(mut session) = shared.take() {
        session.release().await;
    }
}
