//! Adapter exposing one server tool through the [`Tool`] trait.

use crate::mcp::client::McpClient;
use crate::mcp::protocol::ToolInfo;
use async_trait::async_trait;
use maistro_core::error::ToolError;
use maistro_core::tool::{Tool, ToolResult};
use std::sync::Arc;

pub struct McpTool {
    client: Arc<McpClient>,
    info: ToolInfo,
    description: String,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, info: ToolInfo) -> Self {
        let description = info
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool '{}' provided by {}", info.name, client.name()));
        Self {
            client,
            info,
            description,
        }
    }

    /// Name of the server this tool runs on.
    pub fn server(&self) -> &str {
        self.client.name()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };

        let result = self.client.call_tool(&self.info.name, arguments).await?;
        let output = result.joined_text();

        Ok(ToolResult {
            call_id: String::new(),
            success: !result.is_error,
            output,
            data: serde_json::to_value(&result).ok(),
        })
    }
}
