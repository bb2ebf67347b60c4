//! Every configured tool server, started together.

use crate::mcp::client::McpClient;
use crate::mcp::protocol::ToolInfo;
use crate::mcp::tool::McpTool;
use maistro_config::McpServerConfig;
use maistro_core::tool::ToolRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// The running servers and the tools they advertised at startup.
#[derive(Default)]
pub struct McpToolset {
    servers: Vec<Arc<McpClient>>,
    tools: Vec<(Arc<McpClient>, ToolInfo)>,
}

impl McpToolset {
    /// Start every server, in name order. A server that fails to start or
    /// to list its tools is logged and left out.
    pub async fn connect(servers: &BTreeMap<String, McpServerConfig>) -> Self {
        let mut toolset = Self::default();

        for (name, config) in servers {
            let client = match McpClient::spawn(name.clone(), config).await {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!(server = %name, error = %e, "Skipping tool server that failed to start");
                    continue;
                }
            };

            match client.list_tools().await {
                Ok(tools) => {
                    info!(server = %name, tools = tools.len(), "Connected to tool server");
                    toolset
                        .tools
                        .extend(tools.into_iter().map(|t| (Arc::clone(&client), t)));
                    toolset.servers.push(client);
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Skipping tool server that failed to list tools");
                    client.shutdown().await;
                }
            }
        }

        toolset
    }

    /// Names of the servers that came up.
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name()).collect()
    }

    /// `(server, tool)` pairs in discovery order.
    pub fn tools(&self) -> impl Iterator<Item = (&str, &ToolInfo)> {
        self.tools.iter().map(|(client, info)| (client.name(), info))
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Register every discovered tool under its bare name.
    pub fn register_into(&self, registry: &mut ToolRegistry) {
        for (client, info) in &self.tools {
            registry.register(Box::new(McpTool::new(Arc::clone(client), info.clone())));
        }
    }

    /// Kill every server process.
    pub async fn shutdown(&self) {
        for server in &self.servers {
            server.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_servers_are_skipped() {
        let mut servers = BTreeMap::new();
        servers.insert(
            "broken".to_string(),
            McpServerConfig::new("definitely-not-a-real-mcp-server-binary", vec![]),
        );

        let toolset = McpToolset::connect(&servers).await;
        assert!(toolset.is_empty());
        assert!(toolset.server_names().is_empty());

        let mut registry = ToolRegistry::new();
        toolset.register_into(&mut registry);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn no_servers_is_empty() {
        let toolset = McpToolset::connect(&BTreeMap::new()).await;
        assert!(toolset.is_empty());
        toolset.shutdown().await;
    }
}
