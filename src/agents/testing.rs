//! Scripted fakes shared by the agent tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{
    ChatMessage, ChatOptions, ChatResponse, FunctionCall, LlmClient, ToolCall, ToolDefinition,
};
use crate::mcp::{SessionConnector, SessionError, ToolSession};

/// One request seen by [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub messages: Vec<ChatMessage>,
    /// Names of the offered tools, `None` when no tools were sent
    pub tools: Option<Vec<String>>,
    /// Temperature requested through [`ChatOptions`]
    pub temperature: Option<f64>,
}

/// Completion client that replays canned responses in order.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<anyhow::Result<ChatResponse>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<anyhow::Result<ChatResponse>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion_with_options(model, messages, tools, ChatOptions::default())
            .await
    }

    async fn chat_completion_with_options(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(Recorded {
            messages: messages.to_vec(),
            tools: tools.map(|t| t.iter().map(|d| d.function.name.clone()).collect()),
            temperature: options.temperature,
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
    }
}

pub fn text_reply(text: &str) -> anyhow::Result<ChatResponse> {
    Ok(ChatResponse {
        content: Some(text.to_string()),
        finish_reason: Some("stop".to_string()),
        ..Default::default()
    })
}

/// A turn requesting `(id, tool name, raw arguments)` calls.
pub fn tool_reply(calls: &[(&str, &str, &str)]) -> anyhow::Result<ChatResponse> {
    Ok(ChatResponse {
        content: None,
        tool_calls: Some(
            calls
                .iter()
                .map(|(id, name, arguments)| ToolCall {
                    id: id.to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                })
                .collect(),
        ),
        finish_reason: Some("tool_calls".to_string()),
        ..Default::default()
    })
}

/// Counters shared between a [`FakeConnector`] and the sessions it opens.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub connects: AtomicUsize,
    pub releases: AtomicUsize,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl SessionLog {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

/// In-memory tool session. Every tool answers `"<name> ok"` except
/// `failing_tool`, which fails with a closed pipe.
pub struct FakeSession {
    tools: Vec<ToolDefinition>,
    failing_tool: Option<String>,
    log: Arc<SessionLog>,
    released: bool,
}

impl FakeSession {
    pub fn new(log: Arc<SessionLog>) -> Self {
        let tools = ["all_table_names", "filter_table_names", "schema_definitions", "execute_query"]
            .into_iter()
            .map(|name| {
                ToolDefinition::function(name, "", serde_json::json!({"type": "object"}))
            })
            .collect();
        Self {
            tools,
            failing_tool: None,
            log,
            released: false,
        }
    }

    pub fn failing(mut self, tool: &str) -> Self {
        self.failing_tool = Some(tool.to_string());
        self
    }
}

#[async_trait]
impl ToolSession for FakeSession {
    fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    async fn call(&mut self, name: &str, arguments: Value) -> Result<String, SessionError> {
        if self.released {
            return Err(SessionError::Released);
        }
        self.log
            .calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        if self.failing_tool.as_deref() == Some(name) {
            return Err(SessionError::Closed);
        }
        Ok(format!("{name} ok"))
    }

    async fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Connector handing out [`FakeSession`]s. Connect attempts listed in
/// `fail_on` (1-based) fail with a connection error.
pub struct FakeConnector {
    pub log: Arc<SessionLog>,
    fail_on: Vec<usize>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Self::failing_on(Vec::new())
    }

    pub fn failing_on(fail_on: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(SessionLog::default()),
            fail_on,
        })
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn ToolSession>, SessionError> {
        let attempt = self.log.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&attempt) {
            return Err(SessionError::Connection("provider exited during handshake".into()));
        }
        Ok(Box::new(FakeSession::new(self.log.clone())))
    }
}
