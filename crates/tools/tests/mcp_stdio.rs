//! End-to-end tests against the bundled math server binary.

use maistro_config::McpServerConfig;
use maistro_core::tool::{ToolCall, ToolRegistry};
use maistro_tools::{McpClient, McpToolset};
use std::collections::BTreeMap;

fn math_server() -> McpServerConfig {
    McpServerConfig::new(env!("CARGO_BIN_EXE_mcp-math-server"), vec![])
}

#[tokio::test]
async fn handshake_and_list_tools() {
    let client = McpClient::spawn("math", &math_server()).await.unwrap();
    let tools = client.list_tools().await.unwrap();

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["add", "multiply"]);
    assert_eq!(tools[0].input_schema["required"][0], "a");

    client.shutdown().await;
}

#[tokio::test]
async fn call_tool_returns_text() {
    let client = McpClient::spawn("math", &math_server()).await.unwrap();

    let sum = client
        .call_tool("add", serde_json::json!({"a": 19, "b": 23}))
        .await
        .unwrap();
    assert!(!sum.is_error);
    assert_eq!(sum.joined_text(), "42");

    let bad = client
        .call_tool("multiply", serde_json::json!({"a": 2}))
        .await
        .unwrap();
    assert!(bad.is_error);

    client.shutdown().await;
}

#[tokio::test]
async fn unknown_tool_is_server_error() {
    let client = McpClient::spawn("math", &math_server()).await.unwrap();
    let err = client
        .call_tool("divide", serde_json::json!({"a": 1, "b": 0}))
        .await
        .unwrap_err();
    assert!(matches!(err, maistro_core::ToolError::Server { .. }));
    client.shutdown().await;
}

#[tokio::test]
async fn toolset_registers_bare_names() {
    let mut servers = BTreeMap::new();
    servers.insert("math".to_string(), math_server());
    servers.insert(
        "missing".to_string(),
        McpServerConfig::new("definitely-not-a-real-mcp-server-binary", vec![]),
    );

    let toolset = McpToolset::connect(&servers).await;
    assert_eq!(toolset.server_names(), vec!["math"]);

    let mut registry = ToolRegistry::new();
    toolset.register_into(&mut registry);
    assert_eq!(registry.names(), vec!["add", "multiply"]);

    let result = registry
        .execute(&ToolCall {
            id: "call_7".into(),
            name: "multiply".into(),
            arguments: serde_json::json!({"a": 6, "b": 7}),
        })
        .await
        .unwrap();
    assert_eq!(result.call_id, "call_7");
    assert!(result.success);
    assert_eq!(result.output, "42");

    toolset.shutdown().await;
}
