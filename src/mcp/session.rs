//! Tool session lifecycle: spawn a stdio MCP provider, handshake, cache its
//! tool catalog, call tools, release.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::error::SessionError;
use super::rpc::JsonRpcChannel;
use super::types::{
    InitializeParams, InitializeResult, LaunchSpec, McpCallToolRequest, McpCallToolResponse,
    McpToolDescriptor, McpToolsResponse,
};
use crate::llm::ToolDefinition;

/// Longest tool description forwarded to the completion API.
pub const MAX_TOOL_DESCRIPTION_BYTES: usize = 1024;

/// How long `release` waits for the provider to exit after stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// A live connection to a tool provider.
///
/// # Ownership
/// A session is used by one verification at a time: callers hand it out as
/// `&mut dyn ToolSession`, so two verifications can never interleave calls.
///
/// # Release
/// `release` must be called on every exit path. It is idempotent; transport
/// handles are closed exactly once.
#[async_trait]
pub trait ToolSession: Send {
    /// Cached catalog in completion-API function format.
    fn tool_definitions(&self) -> &[ToolDefinition];

    /// Invoke one tool. The returned text may itself describe a downstream
    /// failure (bad SQL, unknown table); that is not an error here.
    async fn call(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, SessionError>;

    /// Close all transport handles.
    async fn release(&mut self);
}

/// Opens tool sessions. The orchestrator owns one and decides when to connect.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ToolSession>, SessionError>;
}

/// Translate an MCP tool descriptor into a completion-API tool definition.
pub fn tool_definition(descriptor: &McpToolDescriptor) -> ToolDefinition {
    let description = descriptor.description.as_deref().unwrap_or_default();
    let parameters = if descriptor.input_schema.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        descriptor.input_schema.clone()
    };
    ToolDefinition::function(
        descriptor.name.clone(),
        truncate_utf8(description, MAX_TOOL_DESCRIPTION_BYTES),
        parameters,
    )
}

/// Cut `s` to at most `max_bytes`, backing off to a char boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

type StdioChannel = JsonRpcChannel<ChildStdin, BufReader<ChildStdout>>;

/// Session over a child process speaking MCP on stdin/stdout.
pub struct StdioToolSession {
    command: String,
    child: Option<Child>,
    channel: Option<StdioChannel>,
    tools: Vec<ToolDefinition>,
}

impl StdioToolSession {
    /// Spawn the provider, perform the handshake and cache the catalog.
    ///
    /// # Errors
    /// `SessionError::Connection` if the process cannot be spawned or the
    /// handshake or tool listing does not complete. The child is killed
    /// before returning in that case.
    pub async fn connect(spec: &LaunchSpec, timeout: Duration) -> Result<Self, SessionError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!("Spawning tool provider: {} {:?}", spec.command, spec.args);

        let mut child = cmd.spawn().map_err(|e| {
            SessionError::connection(&format!("failed to spawn '{}'", spec.command), e)
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Connection("failed to capture provider stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Connection("failed to capture provider stdout".into()))?;

        // Drain stderr so the provider never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let command = spec.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        tracing::debug!("{} stderr: {}", command, line);
                    }
                }
            });
        }

        let mut session = Self {
            command: spec.command.clone(),
            child: Some(child),
            channel: Some(JsonRpcChannel::new(stdin, BufReader::new(stdout), timeout)),
            tools: Vec::new(),
        };

        match session.handshake().await {
            Ok(tools) => {
                tracing::info!(
                    "Tool provider ready: {} tools ({})",
                    tools.len(),
                    tools
                        .iter()
                        .map(|t| t.function.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                session.tools = tools;
                Ok(session)
            }
            Err(e) => {
                session.release().await;
                Err(match e {
                    SessionError::Connection(_) => e,
                    other => SessionError::connection("handshake failed", other),
                })
            }
        }
    }

    async fn handshake(&mut self) -> Result<Vec<ToolDefinition>, SessionError> {
        let channel = self.channel.as_mut().ok_or(SessionError::Released)?;

        let params = serde_json::to_value(InitializeParams::default())
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        let init = channel.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(init)
            .map_err(|e| SessionError::Protocol(format!("bad initialize result: {}", e)))?;
        if let Some(server) = &init.server_info {
            tracing::debug!(
                "Connected to {} {}",
                server.name,
                server.version.as_deref().unwrap_or("")
            );
        }

        channel.notify("notifications/initialized").await?;

        let listed = channel.request("tools/list", None).await?;
        let listed: McpToolsResponse = serde_json::from_value(listed)
            .map_err(|e| SessionError::Protocol(format!("bad tools/list result: {}", e)))?;

        Ok(listed.tools.iter().map(tool_definition).collect())
    }
}

#[async_trait]
impl ToolSession for StdioToolSession {
    fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    async fn call(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, SessionError> {
        let channel = self.channel.as_mut().ok_or(SessionError::Released)?;
        let params = serde_json::to_value(McpCallToolRequest {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| SessionError::Protocol(e.to_string()))?;

        let result = channel.request("tools/call", Some(params)).await?;
        let response: McpCallToolResponse = serde_json::from_value(result)
            .map_err(|e| SessionError::Protocol(format!("bad tools/call result: {}", e)))?;

        if response.is_error {
            tracing::debug!("Tool {} reported an error", name);
        }
        Ok(response.text())
    }

    async fn release(&mut self) {
        // Closing stdin is the MCP stdio shutdown signal.
        drop(self.channel.take());

        let Some(mut child) = self.child.take() else {
            return;
        };

        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("{} exited with {}", self.command, status),
            Ok(Err(e)) => tracing::warn!("Failed to wait for {}: {}", self.command, e),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill {}: {}", self.command, e);
                } else {
                    tracing::debug!("{} killed after exit grace period", self.command);
                }
            }
        }
    }
}

/// Connector that spawns a fresh stdio provider per `connect`.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    spec: LaunchSpec,
    timeout: Duration,
}

impl StdioConnector {
    pub fn new(spec: LaunchSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }
}

#[async_trait]
impl SessionConnector for StdioConnector {
    async fn connect(&self) -> Result<Box<dyn ToolSession>, SessionError> {
        let session = StdioToolSession::connect(&self.spec, self.timeout).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_becomes_function_tool() {
        let descriptor = McpToolDescriptor {
            name: "schema_definitions".to_string(),
            description: Some("Returns schema for the given tables".to_string()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"table_names": {"type": "array"}}
            }),
        };
        let tool = tool_definition(&descriptor);
        assert_eq!(tool.tool_type, "function");
        assert_eq!(tool.function.name, "schema_definitions");
        assert_eq!(
            tool.function.parameters["properties"]["table_names"]["type"],
            "array"
        );
    }

    #[test]
    fn long_descriptions_are_truncated_on_char_boundary() {
        let descriptor = McpToolDescriptor {
            name: "execute_query".to_string(),
            description: Some("查".repeat(500)),
            input_schema: serde_json::Value::Null,
        };
        let tool = tool_definition(&descriptor);
        assert!(tool.function.description.len() <= MAX_TOOL_DESCRIPTION_BYTES);
        assert_eq!(tool.function.description.chars().count(), 341);
        assert_eq!(tool.function.parameters["type"], "object");
    }

    #[tokio::test]
    async fn missing_executable_is_connection_error() {
        let spec = LaunchSpec::new("/nonexistent/text2sql-mcp-provider", Vec::new());
        let err = StdioToolSession::connect(&spec, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Connection(_)));
    }

    /// Answers the handshake, then one `tools/call` with a tool-level error.
    /// Exits early if the initialized notification is not the second line.
    #[cfg(unix)]
    const SCRIPTED_PROVIDER: &str = r#"
echo "provider starting"
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"scripted-db","version":"0.1"}}}'
read -r line
case "$line" in *notifications/initialized*) ;; *) exit 3 ;; esac
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"all_table_names","description":"List tables","inputSchema":{"type":"object"}},{"name":"execute_query","inputSchema":{"type":"object","properties":{"query":{"type":"string"}}}}]}}'
read -r line
case "$line" in *tools/call*execute_query*) ;; *) exit 4 ;; esac
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"Error: no such table: users"}],"isError":true}}'
while read -r line; do :; done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn stdio_session_handshakes_calls_and_releases() {
        let spec = LaunchSpec::new("sh", vec!["-c".to_string(), SCRIPTED_PROVIDER.to_string()]);
        let mut session = StdioToolSession::connect(&spec, Duration::from_secs(5))
            .await
            .expect("handshake with scripted provider");

        let names: Vec<_> = session
            .tool_definitions()
            .iter()
            .map(|t| t.function.name.as_str())
            .collect();
        assert_eq!(names, vec!["all_table_names", "execute_query"]);
        assert_eq!(session.tool_definitions()[0].function.description, "List tables");

        // A tool-level failure is still a successful call.
        let text = session
            .call("execute_query", serde_json::json!({"query": "SELECT * FROM users"}))
            .await
            .unwrap();
        assert_eq!(text, "Error: no such table: users");

        session.release().await;
        session.release().await;
        let err = session
            .call("all_table_names", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Released));
    }
}
