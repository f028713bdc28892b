//! SQL verification through database tools.
//!
//! The verifier runs the candidate statement against the live database via
//! the tool session, lets the model inspect tables and schemas as it sees
//! fit, and reads the model's final reply as a [`ParsedVerdict`].
//!
//! # Conversation protocol
//! Each tool-call turn is answered with one assistant message echoing every
//! requested call, followed by one `tool` message per call keyed by its id.
//! Only then is the conversation resubmitted.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::AgentError;
use super::verdict::{self, ParsedVerdict};
use crate::llm::{ChatMessage, ChatResponse, LlmClient, ToolCall, ToolDefinition};
use crate::mcp::ToolSession;

/// Default cap on tool-call rounds per verification.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;

/// Checks a statement against its task description.
#[async_trait]
pub trait SqlVerifier: Send + Sync {
    async fn run(
        &self,
        description: &str,
        sql: &str,
        session: &mut dyn ToolSession,
    ) -> Result<ParsedVerdict, AgentError>;
}

const SYSTEM_PROMPT: &str = r#"You are a SQL inspector. Decide whether a SQL statement correctly answers a task description by running it against the database.

You have four database tools:
- all_table_names: list every table in the database
- filter_table_names: list the tables whose names contain a keyword
- schema_definitions: show the schema of the named tables
- execute_query: execute a SQL statement and return its rows

Rules:
1. Execute the given statement. If execution fails, the statement does not match: report the error as the result and base the adjustment on the error message (for example a misspelled table or column name).
2. Never propose or execute a statement other than the one you were given. Use the other tools only to understand the schema.
3. Check that the statement returns only the fields the task asks for.
4. Check that the rows reflect the intent of the task. An empty result only matches when the task allows that nothing is found.

When you are done, answer in exactly this format:
Result: <the query result or the error>
Match: <True or False>
Check completed: <True or False>
Adjustment: <how to change the statement when Match is False, otherwise leave empty>"#;

fn user_prompt(description: &str, sql: &str) -> String {
    format!("Task description: {}\nSQL statement: {}", description, sql)
}

/// Verification loop state.
///
/// `AwaitingModel -> (ToolCallsRequested -> ExecutingTools -> AwaitingModel) | Done`
#[derive(Debug)]
enum VerifierState {
    AwaitingModel,
    ToolCallsRequested(ChatResponse),
    ExecutingTools(Vec<ToolCall>),
    Done(String),
}

/// Verifier backed by a tool-calling chat completion model.
pub struct LlmVerifier {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_tool_rounds: usize,
}

impl LlmVerifier {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds.max(1);
        self
    }
}

/// Execute one requested call and return the text for its `tool` message.
///
/// Bad arguments and session failures are reported to the model as content.
async fn execute_call(session: &mut dyn ToolSession, call: &ToolCall) -> String {
    let raw = call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        serde_json::json!({})
    } else {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Invalid arguments for {}: {}", call.function.name, e);
                return format!(
                    "Error: invalid JSON arguments for {}: {}",
                    call.function.name, e
                );
            }
        }
    };

    tracing::debug!("Calling tool {} with {}", call.function.name, arguments);
    match session.call(&call.function.name, arguments).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Tool {} failed: {}", call.function.name, e);
            format!("Error: {}", e)
        }
    }
}

#[async_trait]
impl SqlVerifier for LlmVerifier {
    async fn run(
        &self,
        description: &str,
        sql: &str,
        session: &mut dyn ToolSession,
    ) -> Result<ParsedVerdict, AgentError> {
        let tools: Vec<ToolDefinition> = session.tool_definitions().to_vec();
        let offered = (!tools.is_empty()).then_some(tools.as_slice());

        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(description, sql)),
        ];
        let mut rounds = 0usize;
        let mut state = VerifierState::AwaitingModel;

        let reply = loop {
            state = match state {
                VerifierState::AwaitingModel => {
                    let response = self
                        .llm
                        .chat_completion(&self.model, &messages, offered)
                        .await?;
                    if response.requested_tool_calls().is_some() {
                        VerifierState::ToolCallsRequested(response)
                    } else {
                        VerifierState::Done(response.content.unwrap_or_default())
                    }
                }
                VerifierState::ToolCallsRequested(response) => {
                    rounds += 1;
                    if rounds > self.max_tool_rounds {
                        tracing::warn!(
                            "Verifier still requesting tools after {} rounds",
                            self.max_tool_rounds
                        );
                        return Err(AgentError::ToolRoundLimit(self.max_tool_rounds));
                    }
                    let calls = response.tool_calls.unwrap_or_default();
                    messages.push(ChatMessage::assistant_tool_calls(
                        response.content,
                        calls.clone(),
                    ));
                    VerifierState::ExecutingTools(calls)
                }
                VerifierState::ExecutingTools(calls) => {
                    for call in &calls {
                        let content = execute_call(session, call).await;
                        messages.push(ChatMessage::tool_result(call.id.clone(), content));
                    }
                    VerifierState::AwaitingModel
                }
                VerifierState::Done(reply) => break reply,
            };
        };

        let parsed = verdict::parse(&reply);
        if parsed.is_degraded() {
            tracing::warn!(
                "Verifier reply did not follow the verdict format (missing: {})",
                parsed
                    .missing()
                    .iter()
                    .map(|f| f.label())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        tracing::debug!(
            "Verdict after {} tool rounds: match={}",
            rounds,
            parsed.verdict().is_match
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{text_reply, tool_reply, FakeSession, ScriptedLlm, SessionLog};
    use crate::agents::VerdictField;
    use crate::llm::Role;

    const MATCHED: &str = "Result: yqxv2@example.com\nMatch: True\nCheck completed: True\nAdjustment: ";

    fn session() -> (FakeSession, Arc<SessionLog>) {
        let log = Arc::new(SessionLog::default());
        (FakeSession::new(log.clone()), log)
    }

    #[tokio::test]
    async fn direct_verdict_needs_no_tools() {
        let llm = ScriptedLlm::new(vec![text_reply(MATCHED)]);
        let verifier = LlmVerifier::new(llm.clone(), "test-model");
        let (mut session, log) = session();

        let parsed = verifier
            .run("Find the email of yqxv2", "SELECT email FROM user", &mut session)
            .await
            .unwrap();

        assert!(!parsed.is_degraded());
        assert!(parsed.verdict().is_match);
        assert!(log.calls().is_empty());

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(4));
        let user = requests[0].messages[1].text_content().unwrap();
        assert!(user.contains("Find the email of yqxv2"));
        assert!(user.contains("SELECT email FROM user"));
    }

    #[tokio::test]
    async fn tool_turn_is_echoed_once_and_answered_per_call() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(&[
                ("call_1", "all_table_names", ""),
                ("call_2", "execute_query", r#"{"query": "SELECT email FROM user"}"#),
            ]),
            text_reply(MATCHED),
        ]);
        let verifier = LlmVerifier::new(llm.clone(), "test-model");
        let (mut session, log) = session();

        verifier
            .run("Find the email of yqxv2", "SELECT email FROM user", &mut session)
            .await
            .unwrap();

        let calls = log.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ("all_table_names".to_string(), serde_json::json!({})));
        assert_eq!(calls[1].1["query"], "SELECT email FROM user");

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert_eq!(second.len(), 5);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[2].tool_calls.as_ref().map(Vec::len), Some(2));
        assert_eq!(second[3].role, Role::Tool);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(second[3].text_content(), Some("all_table_names ok"));
        assert_eq!(second[4].tool_call_id.as_deref(), Some("call_2"));
    }

    #[tokio::test]
    async fn bad_arguments_and_failed_calls_become_content() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(&[
                ("call_1", "execute_query", "{not json"),
                ("call_2", "schema_definitions", r#"{"table_names": ["user"]}"#),
            ]),
            text_reply(MATCHED),
        ]);
        let verifier = LlmVerifier::new(llm.clone(), "test-model");
        let log = Arc::new(SessionLog::default());
        let mut session = FakeSession::new(log.clone()).failing("schema_definitions");

        let parsed = verifier.run("d", "SELECT 1", &mut session).await.unwrap();
        assert!(parsed.verdict().is_match);

        // The unparseable call never reaches the session.
        assert_eq!(log.calls().len(), 1);

        let requests = llm.requests();
        let second = &requests[1].messages;
        let bad_args = second[3].text_content().unwrap();
        assert!(bad_args.starts_with("Error: invalid JSON arguments for execute_query"));
        let failed = second[4].text_content().unwrap();
        assert!(failed.starts_with("Error: "));
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_the_round_limit() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(&[("c1", "all_table_names", "{}")]),
            tool_reply(&[("c2", "all_table_names", "{}")]),
            tool_reply(&[("c3", "all_table_names", "{}")]),
        ]);
        let verifier = LlmVerifier::new(llm.clone(), "test-model").with_max_tool_rounds(2);
        let (mut session, log) = session();

        let err = verifier.run("d", "SELECT 1", &mut session).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolRoundLimit(2)));
        assert_eq!(log.calls().len(), 2);
        assert_eq!(llm.requests().len(), 3);
    }

    #[tokio::test]
    async fn completion_failure_propagates() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(&[("c1", "all_table_names", "{}")]),
            Err(anyhow::anyhow!("HTTP 500")),
        ]);
        let verifier = LlmVerifier::new(llm, "test-model");
        let (mut session, _log) = session();

        let err = verifier.run("d", "SELECT 1", &mut session).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(ref m) if m.contains("HTTP 500")));
    }

    #[tokio::test]
    async fn unformatted_reply_is_degraded() {
        let llm = ScriptedLlm::new(vec![text_reply("Looks fine to me.")]);
        let verifier = LlmVerifier::new(llm, "test-model");
        let (mut session, _log) = session();

        let parsed = verifier.run("d", "SELECT 1", &mut session).await.unwrap();
        assert!(parsed.is_degraded());
        assert!(parsed.missing().contains(&VerdictField::Match));
        assert!(!parsed.verdict().is_match);
    }
}
