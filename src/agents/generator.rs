//! SQL generation and adjustment.
//!
//! Both operations are a single completion round-trip with no tools. The
//! reply is trimmed and returned as-is; whether it is valid SQL is decided
//! by the verifier, not here.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::AgentError;
use crate::config::Language;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};

/// Produces and revises SQL statements.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Write one statement for `description`, given optional retrieved and
    /// prior-task context.
    async fn generate(&self, description: &str, context: Option<&str>)
        -> Result<String, AgentError>;

    /// Revise `sql` according to `feedback`.
    async fn adjust(&self, sql: &str, feedback: &str) -> Result<String, AgentError>;
}

const GENERATE_SYSTEM_EN: &str = "You write SQL for a text-to-SQL pipeline. \
Given a task description and supporting context, answer with exactly one SQL statement \
that fulfils the task. Reply with the statement only: no comments, no explanation, \
no markdown code fences, no second statement. Your reply is executed verbatim.";

const GENERATE_SYSTEM_ZH: &str = "你负责为 Text-to-SQL 流水线编写 SQL。\
根据任务描述和补充上下文，只输出一条能完成任务的 SQL 语句。\
回复中只能包含这条语句：不要注释、不要解释、不要 Markdown 代码块、不要第二条语句。\
你的回复会被原样执行。";

const ADJUST_SYSTEM_EN: &str = "You revise SQL for a text-to-SQL pipeline. \
You are given one SQL statement and reviewer feedback about it. Change the statement \
only as far as the feedback requires and answer with the revised statement alone: \
no comments, no explanation, no markdown code fences, no second statement.";

const ADJUST_SYSTEM_ZH: &str = "你负责为 Text-to-SQL 流水线修改 SQL。\
你会收到一条 SQL 语句和针对它的审查意见。只按意见所需修改这条语句，\
并且只回复修改后的语句：不要注释、不要解释、不要 Markdown 代码块、不要第二条语句。";

fn generate_prompt(language: Language, description: &str, context: Option<&str>) -> String {
    match language {
        Language::En => format!(
            "Task description: {}\nContext: {}\nReturn only the SQL statement.",
            description,
            context.unwrap_or("(none)")
        ),
        Language::Zh => format!(
            "任务描述：{}\n上下文：{}\n只返回 SQL 语句。",
            description,
            context.unwrap_or("（无）")
        ),
    }
}

fn adjust_prompt(language: Language, sql: &str, feedback: &str) -> String {
    match language {
        Language::En => format!(
            "SQL: {}\nFeedback: {}\nReturn only the revised SQL statement.",
            sql, feedback
        ),
        Language::Zh => format!(
            "SQL：{}\n修改意见：{}\n只返回修改后的 SQL 语句。",
            sql, feedback
        ),
    }
}

/// Generator backed by a chat completion model.
pub struct LlmGenerator {
    llm: Arc<dyn LlmClient>,
    model: String,
    language: Language,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, language: Language) -> Self {
        Self {
            llm,
            model: model.into(),
            language,
        }
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, AgentError> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let response = self
            .llm
            .chat_completion_with_options(
                &self.model,
                &messages,
                None,
                ChatOptions::deterministic(),
            )
            .await?;

        let sql = response.content.as_deref().unwrap_or_default().trim();
        if sql.is_empty() {
            return Err(AgentError::EmptyCompletion);
        }
        Ok(sql.to_string())
    }
}

#[async_trait]
impl SqlGenerator for LlmGenerator {
    async fn generate(
        &self,
        description: &str,
        context: Option<&str>,
    ) -> Result<String, AgentError> {
        let system = match self.language {
            Language::En => GENERATE_SYSTEM_EN,
            Language::Zh => GENERATE_SYSTEM_ZH,
        };
        let sql = self
            .complete(system, generate_prompt(self.language, description, context))
            .await?;
        tracing::debug!("Generated SQL: {}", sql);
        Ok(sql)
    }

    async fn adjust(&self, sql: &str, feedback: &str) -> Result<String, AgentError> {
        let system = match self.language {
            Language::En => ADJUST_SYSTEM_EN,
            Language::Zh => ADJUST_SYSTEM_ZH,
        };
        let revised = self
            .complete(system, adjust_prompt(self.language, sql, feedback))
            .await?;
        tracing::debug!("Adjusted SQL: {}", revised);
        Ok(revised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{text_reply, ScriptedLlm};
    use crate::llm::Role;

    #[tokio::test]
    async fn generate_trims_reply_and_sends_context() {
        let llm = ScriptedLlm::new(vec![text_reply(
            "  SELECT email FROM user WHERE username = 'yqxv2'\n",
        )]);
        let generator = LlmGenerator::new(llm.clone(), "test-model", Language::En);

        let sql = generator
            .generate("Find the email of yqxv2", Some("table user(id, username, email)"))
            .await
            .unwrap();
        assert_eq!(sql, "SELECT email FROM user WHERE username = 'yqxv2'");

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_none());
        assert_eq!(requests[0].temperature, Some(0.0));
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        let user = messages[1].text_content().unwrap();
        assert!(user.contains("Find the email of yqxv2"));
        assert!(user.contains("table user(id, username, email)"));
    }

    #[tokio::test]
    async fn adjust_sends_sql_and_feedback_in_chinese() {
        let llm = ScriptedLlm::new(vec![text_reply("SELECT COUNT(*) FROM user")]);
        let generator = LlmGenerator::new(llm.clone(), "test-model", Language::Zh);

        let sql = generator
            .adjust("SELECT COUNT(*) FROM users", "表名应为 user")
            .await
            .unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM user");

        let requests = llm.requests();
        assert_eq!(requests[0].temperature, Some(0.0));
        let messages = &requests[0].messages;
        assert_eq!(messages[0].text_content(), Some(ADJUST_SYSTEM_ZH));
        let user = messages[1].text_content().unwrap();
        assert!(user.contains("SELECT COUNT(*) FROM users"));
        assert!(user.contains("表名应为 user"));
    }

    #[tokio::test]
    async fn blank_reply_is_an_error() {
        let llm = ScriptedLlm::new(vec![text_reply("   \n")]);
        let generator = LlmGenerator::new(llm, "test-model", Language::En);
        let err = generator.generate("count users", None).await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyCompletion));
    }

    #[tokio::test]
    async fn completion_failure_is_llm_error() {
        let llm = ScriptedLlm::new(vec![Err(anyhow::anyhow!("connection refused"))]);
        let generator = LlmGenerator::new(llm, "test-model", Language::En);
        let err = generator.adjust("SELECT 1", "nothing").await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(ref m) if m.contains("connection refused")));
    }
}
