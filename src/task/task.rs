//! Core Task record.
//!
//! # Invariants
//! - `id` and `description` are non-empty and never change after construction
//! - `sql` and `result` are overwritten on every attempt; they only ever
//!   reflect the most recent attempt

use serde::{Deserialize, Serialize};

/// One atomic `(description, sql, result)` unit of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Stable key within the batch (e.g. `"task1"`)
    id: String,

    /// Natural-language description of the subquery
    description: String,

    /// Most recently attempted SQL statement
    sql: String,

    /// Verifier result text or a literal error string
    result: String,
}

impl Task {
    /// Create a pending task.
    ///
    /// # Errors
    /// Returns `Err` if `id` or `description` is empty.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Result<Self, TaskError> {
        let id = id.into();
        let description = description.into();
        if id.trim().is_empty() {
            return Err(TaskError::EmptyId);
        }
        if description.trim().is_empty() {
            return Err(TaskError::EmptyDescription(id));
        }
        Ok(Self {
            id,
            description,
            sql: String::new(),
            result: String::new(),
        })
    }

    pub(crate) fn from_record(id: String, record: TaskRecord) -> Result<Self, TaskError> {
        let mut task = Self::new(id, record.description)?;
        task.sql = record.sql;
        task.result = record.result;
        Ok(task)
    }

    pub(crate) fn to_record(&self) -> TaskRecord {
        TaskRecord {
            description: self.description.clone(),
            sql: self.sql.clone(),
            result: self.result.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    /// Whether no attempt has touched this task yet.
    pub fn is_pending(&self) -> bool {
        self.sql.is_empty() && self.result.is_empty()
    }

    /// Record the statement just generated or adjusted.
    pub fn record_sql(&mut self, sql: impl Into<String>) {
        self.sql = sql.into();
    }

    /// Record verifier output or an error string.
    pub fn record_result(&mut self, result: impl Into<String>) {
        self.result = result.into();
    }
}

/// On-disk value of one task in the snapshot object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TaskRecord {
    pub description: String,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub result: String,
}

/// Errors that can occur while building tasks and batches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task id cannot be empty")]
    EmptyId,

    #[error("Task {0} has an empty description")]
    EmptyDescription(String),

    #[error("Duplicate task id: {0}")]
    DuplicateId(String),
}
