//! Batch context: what later generation calls know about the batch so far.

use serde::{Deserialize, Serialize};

/// A finished task as seen by later tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorTask {
    pub description: String,
    pub sql: String,
}

/// Retrieved context for the whole question plus the append-only list of
/// prior tasks with their finalized SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContext {
    /// Schema notes / retrieved documentation supplied by the caller
    pub retrieved: Option<String>,
    /// Earlier tasks of this batch, in order
    prior: Vec<PriorTask>,
}

impl BatchContext {
    pub fn new(retrieved: Option<String>) -> Self {
        Self {
            retrieved: retrieved.filter(|r| !r.trim().is_empty()),
            prior: Vec::new(),
        }
    }

    pub fn prior(&self) -> &[PriorTask] {
        &self.prior
    }

    /// Record a finished task. Tasks without SQL are skipped.
    pub fn push_prior(&mut self, description: impl Into<String>, sql: impl Into<String>) {
        let sql = sql.into();
        if sql.trim().is_empty() {
            return;
        }
        self.prior.push(PriorTask {
            description: description.into(),
            sql,
        });
    }

    /// Render the context text handed to the generator.
    ///
    /// Returns `None` when there is nothing to say.
    pub fn render(&self) -> Option<String> {
        let mut sections = Vec::new();

        if let Some(retrieved) = &self.retrieved {
            sections.push(format!("Retrieved context:\n{}", retrieved.trim()));
        }

        if !self.prior.is_empty() {
            let prior = self
                .prior
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{}. {}\n   SQL: {}", i + 1, p.description, p.sql))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("Earlier tasks in this batch:\n{}", prior));
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}
