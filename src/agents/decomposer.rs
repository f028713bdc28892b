//! Query decomposition: split one natural-language question into an ordered
//! batch of subquery tasks.
//!
//! The model answers with a JSON object keyed `task1`, `task2`, ... in
//! dependency order. Each entry carries a description; any `sql` or `result`
//! the model fills in is discarded so every task starts pending.

use std::sync::Arc;

use super::types::AgentError;
use crate::config::Language;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::task::{Task, TaskBatch};

const DECOMPOSE_SYSTEM_EN: &str = r#"You plan database work. Read the user's question and the retrieved information, then split the question into the smallest number of subquery tasks that answer it. Use a single task when one SQL statement is enough.

Order the tasks so that every task only depends on tasks before it. The last task must produce the final answer.

Reply with a JSON object and nothing else:
{
  "task1": {"description": "<what the first subquery must find>", "sql": "", "result": ""},
  "task2": {"description": "<what the next subquery must find>", "sql": "", "result": ""}
}

Example question: total sales of the Electronics category, and the five customers who spent the most in it.
{
  "task1": {"description": "Compute the total sales amount of the Electronics category", "sql": "", "result": ""},
  "task2": {"description": "Find the five customers with the highest spending in the Electronics category", "sql": "", "result": ""}
}"#;

const DECOMPOSE_SYSTEM_ZH: &str = r#"你负责规划数据库查询。阅读用户的问题和检索到的信息，把问题拆分成尽可能少的子查询任务；一条 SQL 能完成时只输出一个任务。

任务按依赖顺序排列，每个任务只依赖它之前的任务，最后一个任务给出最终答案。

只输出如下 JSON 对象：
{
  "task1": {"description": "<第一个子查询要查什么>", "sql": "", "result": ""},
  "task2": {"description": "<下一个子查询要查什么>", "sql": "", "result": ""}
}"#;

fn decompose_prompt(question: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.trim().is_empty() => format!(
            "Question: {}\n\nRetrieved information:\n{}",
            question, context
        ),
        _ => format!("Question: {}", question),
    }
}

/// Splits a question into a [`TaskBatch`] with one completion call.
pub struct QueryDecomposer {
    llm: Arc<dyn LlmClient>,
    model: String,
    language: Language,
}

impl QueryDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, language: Language) -> Self {
        Self {
            llm,
            model: model.into(),
            language,
        }
    }

    /// Ask the model for a plan and parse it.
    ///
    /// # Errors
    /// `AgentError::Llm` when the completion fails, `EmptyCompletion` on a
    /// blank reply and `InvalidDecomposition` when the reply is not a
    /// non-empty task object.
    pub async fn decompose(
        &self,
        question: &str,
        context: Option<&str>,
    ) -> Result<TaskBatch, AgentError> {
        let system = match self.language {
            Language::En => DECOMPOSE_SYSTEM_EN,
            Language::Zh => DECOMPOSE_SYSTEM_ZH,
        };
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(decompose_prompt(question, context)),
        ];
        let response = self
            .llm
            .chat_completion_with_options(
                &self.model,
                &messages,
                None,
                ChatOptions::deterministic(),
            )
            .await?;

        let reply = response.content.as_deref().unwrap_or_default().trim();
        if reply.is_empty() {
            return Err(AgentError::EmptyCompletion);
        }

        let planned = TaskBatch::from_json_str(reply)
            .map_err(|e| AgentError::InvalidDecomposition(e.to_string()))?;
        if planned.is_empty() {
            return Err(AgentError::InvalidDecomposition("no tasks".to_string()));
        }

        let mut batch = TaskBatch::new();
        for task in &planned {
            let fresh = Task::new(task.id(), task.description())
                .map_err(|e| AgentError::InvalidDecomposition(e.to_string()))?;
            batch
                .push(fresh)
                .map_err(|e| AgentError::InvalidDecomposition(e.to_string()))?;
        }

        tracing::info!("Question split into {} tasks", batch.len());
        Ok(batch)
    }
}
