//! # maistro core
//!
//! Domain types, traits, and error definitions for the maistro task agent.
//! This crate has **no framework dependencies**: it defines the domain model
//! every other crate implements against.
//!
//! Every external collaborator is a trait here:
//! - [`Provider`]: the completion capability
//! - [`Tool`]: an external tool discovered from a tool server
//! - [`MemoryStore`]: the namespaced key/value store

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod record;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, ProviderError, ReflectionError, Result, RoutingError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::{Item, MemoryStore, Namespace, RecordKind};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition, Usage};
pub use record::{Instructions, ToDo, TodoStatus};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
