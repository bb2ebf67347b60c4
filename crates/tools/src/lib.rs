//! External tools for maistro.
//!
//! Tools live in separate tool-server processes (calendar, search, ...)
//! spoken to over the Model Context Protocol on stdio. Each configured
//! server is spawned, asked for its tools, and every tool it offers is
//! wrapped as a [`maistro_core::Tool`] so the turn loop can execute it
//! like any other.

pub mod mcp;

pub use mcp::{McpClient, McpTool, McpToolset};
