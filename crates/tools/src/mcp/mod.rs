//! Model Context Protocol client over newline-delimited JSON-RPC on stdio.

pub mod client;
pub mod protocol;
pub mod tool;
pub mod toolset;

pub use client::McpClient;
pub use protocol::{CallToolResult, ContentBlock, ToolInfo, PROTOCOL_VERSION};
pub use tool::McpTool;
pub use toolset::McpToolset;
