//! A single tool-server subprocess and the JSON-RPC session with it.

use crate::mcp::protocol::*;
use maistro_config::McpServerConfig;
use maistro_core::error::ToolError;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Pipes and request counter for one server. Requests are serialized
/// through the mutex, so at most one is in flight per server.
struct Connection {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    /// Set while a line is being written to stdin.
    writing: bool,
    /// Why the connection can no longer be used, if it can't.
    broken: Option<String>,
}

/// A running MCP server.
pub struct McpClient {
    name: String,
    timeout: Duration,
    connection: Mutex<Connection>,
    child: Mutex<Child>,
}

impl McpClient {
    /// Launch the server and perform the `initialize` handshake.
    pub async fn spawn(name: impl Into<String>, config: &McpServerConfig) -> Result<Self, ToolError> {
        let client = Self::start(name.into(), config)?;
        client.initialize().await?;
        Ok(client)
    }

    /// Launch the subprocess without talking to it.
    fn start(name: String, config: &McpServerConfig) -> Result<Self, ToolError> {
        let transport = |reason: String| ToolError::Transport {
            server: name.clone(),
            reason,
        };

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| transport(format!("failed to spawn '{}': {e}", config.command)))?;

        let stdin = child.stdin.take().ok_or_else(|| transport("no stdin pipe".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| transport("no stdout pipe".into()))?;

        // Drain stderr so a chatty server never blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let server = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "{line}");
                }
            });
        }

        let client = Self {
            name,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            connection: Mutex::new(Connection {
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 1,
                writing: false,
                broken: None,
            }),
            child: Mutex::new(child),
        };

        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), ToolError> {
        let result = self
            .request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "maistro",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
                "initialize",
            )
            .await?;

        let server_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(server = %self.name, protocol = server_version, "MCP server initialized");

        self.notify("notifications/initialized").await
    }

    /// All tools the server offers, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, ToolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request("tools/list", params, "tools/list").await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| self.transport(format!("malformed tools/list result: {e}")))?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        debug!(server = %self.name, count = tools.len(), "Discovered tools");
        Ok(tools)
    }

    /// Invoke a tool. A result flagged `isError` is returned as-is, not as `Err`.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<CallToolResult, ToolError> {
        let result = self
            .request(
                "tools/call",
                Some(serde_json::json!({ "name": tool, "arguments": arguments })),
                tool,
            )
            .await?;

        serde_json::from_value(result)
            .map_err(|e| self.transport(format!("malformed tools/call result: {e}")))
    }

    /// Kill the subprocess.
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(server = %self.name, error = %e, "Server already exited");
        }
    }

    fn transport(&self, reason: String) -> ToolError {
        ToolError::Transport {
            server: self.name.clone(),
            reason,
        }
    }

    async fn notify(&self, method: &str) -> Result<(), ToolError> {
        let mut conn = self.connection.lock().await;
        self.ensure_usable(&conn)?;
        let line = serde_json::to_string(&JsonRpcNotification::new(method))
            .map_err(|e| self.transport(e.to_string()))?;
        self.write_line(&mut conn, &line).await
    }

    /// Send a request and wait for the response carrying the same id.
    /// `label` names the operation in timeout errors.
    async fn request(&self, method: &str, params: Option<Value>, label: &str) -> Result<Value, ToolError> {
        let mut conn = self.connection.lock().await;
        self.ensure_usable(&conn)?;
        let id = conn.next_id;
        conn.next_id += 1;

        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| self.transport(e.to_string()))?;

        let exchange = async {
            self.write_line(&mut conn, &line).await?;
            self.read_response(&mut conn, id).await
        };

        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(server = %self.name, method, "MCP request timed out");
                // A half-written line would corrupt every later request
                if conn.writing {
                    warn!(server = %self.name, method, "Timed out mid-write, closing connection");
                    conn.broken = Some(format!("a '{method}' request timed out while being written"));
                }
                Err(ToolError::Timeout {
                    tool_name: label.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }

    fn ensure_usable(&self, conn: &Connection) -> Result<(), ToolError> {
        match &conn.broken {
            Some(reason) => Err(self.transport(format!("connection unusable: {reason}"))),
            None => Ok(()),
        }
    }

    async fn write_line(&self, conn: &mut Connection, line: &str) -> Result<(), ToolError> {
        conn.writing = true;
        conn.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport(format!("write failed: {e}")))?;
        conn.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| self.transport(format!("write failed: {e}")))?;
        conn.stdin
            .flush()
            .await
            .map_err(|e| self.transport(format!("flush failed: {e}")))?;
        conn.writing = false;
        Ok(())
    }

    async fn read_response(&self, conn: &mut Connection, id: u64) -> Result<Value, ToolError> {
        loop {
            let line = conn
                .stdout
                .next_line()
                .await
                .map_err(|e| self.transport(format!("read failed: {e}")))?
                .ok_or_else(|| self.transport("server closed its stdout".into()))?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    debug!(server = %self.name, "Skipping non-JSON output: {trimmed}");
                    continue;
                }
            };

            let method = message.get("method").and_then(Value::as_str);
            let message_id = message.get("id").filter(|v| !v.is_null());

            match (method, message_id) {
                (Some(method), None) => {
                    debug!(server = %self.name, method, "Skipping notification");
                }
                (Some(method), Some(request_id)) => {
                    // Server-to-client requests are not supported
                    debug!(server = %self.name, method, "Rejecting server request");
                    let reply = JsonRpcResponse::failure(
                        request_id.clone(),
                        METHOD_NOT_FOUND,
                        format!("client does not handle '{method}'"),
                    );
                    let reply = serde_json::to_string(&reply).map_err(|e| self.transport(e.to_string()))?;
                    self.write_line(conn, &reply).await?;
                }
                (None, Some(response_id)) if response_id.as_u64() == Some(id) => {
                    let response: JsonRpcResponse = serde_json::from_value(message)
                        .map_err(|e| self.transport(format!("malformed response: {e}")))?;
                    if let Some(error) = response.error {
                        return Err(ToolError::Server {
                            server: self.name.clone(),
                            code: error.code,
                            message: error.message,
                        });
                    }
                    return Ok(response.result.unwrap_or(Value::Null));
                }
                (None, Some(other)) => {
                    debug!(server = %self.name, expected = id, got = %other, "Skipping stale response");
                }
                (None, None) => {
                    debug!(server = %self.name, "Skipping message without id or method");
                }
            }
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_missing_binary_is_transport_error() {
        let config = McpServerConfig::new("definitely-not-a-real-mcp-server-binary", vec![]);
        let err = McpClient::spawn("ghost", &config).await.unwrap_err();
        match err {
            ToolError::Transport { server, .. } => assert_eq!(server, "ghost"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_that_exits_fails_handshake() {
        let config = McpServerConfig::new("true", vec![]);
        let err = McpClient::spawn("quitter", &config).await.unwrap_err();
        assert!(matches!(err, ToolError::Transport { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_server_times_out() {
        let mut config = McpServerConfig::new("sleep", vec!["30".into()]);
        config.timeout_secs = 1;
        let err = McpClient::spawn("sleepy", &config).await.unwrap_err();
        match err {
            ToolError::Timeout { tool_name, timeout_secs } => {
                assert_eq!(tool_name, "initialize");
                assert_eq!(timeout_secs, 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_mid_write_closes_connection() {
        // `sleep` never reads stdin, so a request larger than the pipe buffer stalls mid-write
        let mut config = McpServerConfig::new("sleep", vec!["30".into()]);
        config.timeout_secs = 1;
        let client = McpClient::start("stuck".into(), &config).unwrap();

        let big = "x".repeat(4 * 1024 * 1024);
        let err = client.call_tool("echo", serde_json::json!({ "text": big })).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));

        let err = client.call_tool("echo", serde_json::json!({})).await.unwrap_err();
        match err {
            ToolError::Transport { server, reason } => {
                assert_eq!(server, "stuck");
                assert!(reason.contains("connection unusable"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        client.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_while_waiting_keeps_connection() {
        let mut config = McpServerConfig::new("sleep", vec!["30".into()]);
        config.timeout_secs = 1;
        let client = McpClient::start("slow".into(), &config).unwrap();

        for _ in 0..2 {
            let err = client.call_tool("add", serde_json::json!({"a": 1, "b": 2})).await.unwrap_err();
            assert!(matches!(err, ToolError::Timeout { .. }));
        }
        client.shutdown().await;
    }
}
