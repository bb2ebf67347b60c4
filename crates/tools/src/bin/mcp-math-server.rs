//! Minimal MCP tool server over stdio offering `add` and `multiply`.
//!
//! Useful as a stand-in tool server when trying out the agent:
//!
//! ```toml
//! [mcp_servers.math]
//! command = "mcp-math-server"
//! ```

use maistro_tools::mcp::protocol::{
    CallToolResult, INVALID_PARAMS, JsonRpcResponse, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("math server ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(response) = handle_line(&line) else {
            continue;
        };
        let mut encoded = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Handle one inbound line. Notifications produce no reply.
fn handle_line(line: &str) -> Option<JsonRpcResponse> {
    let message: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            debug!("ignoring unparseable line: {e}");
            return None;
        }
    };

    let id = message.get("id").cloned().filter(|v| !v.is_null())?;
    let method = message.get("method").and_then(Value::as_str).unwrap_or("");
    let params = message.get("params").cloned().unwrap_or_else(|| json!({}));

    let response = match method {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "math", "version": env!("CARGO_PKG_VERSION") }
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tool_list() })),
        "tools/call" => call_tool(id, &params),
        other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
    };
    Some(response)
}

fn tool_list() -> Value {
    let schema = json!({
        "type": "object",
        "properties": {
            "a": { "type": "integer" },
            "b": { "type": "integer" }
        },
        "required": ["a", "b"]
    });
    json!([
        { "name": "add", "description": "Add two numbers", "inputSchema": schema },
        { "name": "multiply", "description": "Multiply two numbers", "inputSchema": schema }
    ])
}

fn call_tool(id: Value, params: &Value) -> JsonRpcResponse {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let op: fn(i64, i64) -> Option<i64> = match name {
        "add" => i64::checked_add,
        "multiply" => i64::checked_mul,
        other => return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("unknown tool: {other}")),
    };

    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let operand = |key: &str| args.get(key).and_then(Value::as_i64);

    let result = match (operand("a"), operand("b")) {
        (Some(a), Some(b)) => match op(a, b) {
            Some(value) => CallToolResult::text(value.to_string(), false),
            None => CallToolResult::text("integer overflow", true),
        },
        _ => CallToolResult::text("arguments 'a' and 'b' must be integers", true),
    };

    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
}
