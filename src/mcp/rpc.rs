//! Newline-delimited JSON-RPC 2.0 over an async byte stream.
//!
//! The channel is generic over the reader and writer so the stdio session
//! can hand it a child's pipes while tests drive it with in-memory duplexes.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::error::SessionError;
use super::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

/// Request/response channel. One request is in flight at a time; the
/// `&mut self` receivers serialize access.
pub struct JsonRpcChannel<W, R> {
    writer: W,
    reader: R,
    next_id: u64,
    timeout: Duration,
}

impl<W, R> JsonRpcChannel<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(writer: W, reader: R, timeout: Duration) -> Self {
        Self {
            writer,
            reader,
            next_id: 1,
            timeout,
        }
    }

    /// Send a request and wait for the response carrying the same id.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, SessionError> {
        let id = self.next_id;
        self.next_id += 1;

        self.write_line(&JsonRpcRequest::new(id, method, params))
            .await?;

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.read_response(id))
            .await
            .map_err(|_| SessionError::Timeout {
                method: method.to_string(),
                after: timeout,
            })?
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&mut self, method: &str) -> Result<(), SessionError> {
        self.write_line(&JsonRpcNotification::new(method)).await
    }

    async fn write_line<T: Serialize>(&mut self, message: &T) -> Result<(), SessionError> {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| SessionError::Protocol(format!("Failed to encode request: {}", e)))?;
        line.push(b'\n');
        self.writer.write_all(&line).await.map_err(closed_on_pipe)?;
        self.writer.flush().await.map_err(closed_on_pipe)?;
        Ok(())
    }

    async fn read_response(&mut self, id: u64) -> Result<serde_json::Value, SessionError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(SessionError::Closed);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: JsonRpcMessage = match serde_json::from_str(trimmed) {
                Ok(message) => message,
                Err(_) => {
                    tracing::debug!("Skipping non JSON-RPC line from tool provider: {}", trimmed);
                    continue;
                }
            };

            if !message.answers(id) {
                tracing::debug!(
                    "Skipping message while waiting for response {}: method={:?}",
                    id,
                    message.method
                );
                continue;
            }

            if let Some(error) = message.error {
                return Err(SessionError::Rpc {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(message.result.unwrap_or(serde_json::Value::Null));
        }
    }
}

fn closed_on_pipe(err: std::io::Error) -> SessionError {
    if err.kind() == std::io::ErrorKind::BrokenPipe {
        SessionError::Closed
    } else {
        SessionError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, BufReader, DuplexStream, ReadHalf, WriteHalf};

    type TestChannel = JsonRpcChannel<WriteHalf<DuplexStream>, BufReader<ReadHalf<DuplexStream>>>;

    fn channel(timeout: Duration) -> (TestChannel, DuplexStream) {
        let (client, server) = duplex(4096);
        let (read, write) = split(client);
        (JsonRpcChannel::new(write, BufReader::new(read), timeout), server)
    }

    async fn read_request(server: &mut BufReader<DuplexStream>) -> serde_json::Value {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn request_matches_response_by_id() {
        let (mut channel, server) = channel(Duration::from_secs(5));
        let mut server = BufReader::new(server);

        let responder = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            assert_eq!(request["method"], "tools/list");
            let id = request["id"].as_u64().unwrap();
            let reply = format!(
                "starting server...\n{{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{{}}}}\n{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":{{\"tools\":[]}}}}\n",
                id
            );
            server.get_mut().write_all(reply.as_bytes()).await.unwrap();
            server
        });

        let result = channel.request("tools/list", None).await.unwrap();
        assert_eq!(result, serde_json::json!({"tools": []}));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn rpc_error_is_reported() {
        let (mut channel, server) = channel(Duration::from_secs(5));
        let mut server = BufReader::new(server);

        let responder = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            let id = request["id"].as_u64().unwrap();
            let reply = format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":{},\"error\":{{\"code\":-32601,\"message\":\"Method not found\"}}}}\n",
                id
            );
            server.get_mut().write_all(reply.as_bytes()).await.unwrap();
            server
        });

        let err = channel.request("tools/nope", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Rpc { code: -32601, .. }));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn silent_provider_times_out() {
        let (mut channel, _server) = channel(Duration::from_millis(50));
        let err = channel.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn closed_stream_is_reported() {
        let (mut channel, server) = channel(Duration::from_secs(5));
        drop(server);
        let err = channel.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Closed | SessionError::Io(_)));
    }

    #[tokio::test]
    async fn notifications_carry_no_id() {
        let (mut channel, server) = channel(Duration::from_secs(5));
        let mut server = BufReader::new(server);
        channel.notify("notifications/initialized").await.unwrap();
        let message = read_request(&mut server).await;
        assert_eq!(message["method"], "notifications/initialized");
        assert!(message.get("id").is_none());
    }
}
