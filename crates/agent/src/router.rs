//! Decides what happens after the assistant speaks.
//!
//! The router looks at the tool invocations carried by the latest assistant
//! message and picks the next step: run external tools, update the to-do
//! list, update the instructions, or end the turn. It is a pure function of
//! the message and the [`ToolRegistry`] of known external tools.

use maistro_core::error::RoutingError;
use maistro_core::message::{Message, MessageToolCall, Role};
use maistro_core::provider::ToolDefinition;
use maistro_core::tool::ToolRegistry;
use serde::{Deserialize, Serialize};

/// Name of the tool the assistant calls to request a memory update.
pub const UPDATE_MEMORY_TOOL: &str = "UpdateMemory";

/// Which memory an `UpdateMemory` invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Todo,
    Instructions,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Todo => "todo",
            UpdateType::Instructions => "instructions",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "todo" => Some(UpdateType::Todo),
            "instructions" => Some(UpdateType::Instructions),
            _ => None,
        }
    }
}

/// The next step of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterDecision {
    ContinueToolExecution,
    UpdateTodos,
    UpdateInstructions,
    EndTurn,
}

impl std::fmt::Display for RouterDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RouterDecision::ContinueToolExecution => "continue_tool_execution",
            RouterDecision::UpdateTodos => "update_todos",
            RouterDecision::UpdateInstructions => "update_instructions",
            RouterDecision::EndTurn => "end_turn",
        };
        f.write_str(s)
    }
}

/// What a single invocation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolTarget {
    /// `UpdateMemory`; `None` when `update_type` is missing or unrecognized.
    MemoryUpdate(Option<UpdateType>),
    /// A tool registered in the external tool registry.
    External,
    /// Anything else.
    Unknown,
}

/// Resolve one invocation against the registry.
pub fn classify(call: &MessageToolCall, tools: &ToolRegistry) -> Result<ToolTarget, RoutingError> {
    if call.name.trim().is_empty() {
        return Err(RoutingError::MalformedToolCall {
            call_id: call.id.clone(),
            reason: "tool call has no name".into(),
        });
    }

    if call.name == UPDATE_MEMORY_TOOL {
        let args = call
            .parsed_arguments()
            .map_err(|e| RoutingError::MalformedToolCall {
                call_id: call.id.clone(),
                reason: format!("arguments are not valid JSON: {e}"),
            })?;
        let update_type = args
            .get("update_type")
            .and_then(|v| v.as_str())
            .and_then(UpdateType::parse);
        return Ok(ToolTarget::MemoryUpdate(update_type));
    }

    if !tools.is_empty() && tools.contains(&call.name) {
        Ok(ToolTarget::External)
    } else {
        Ok(ToolTarget::Unknown)
    }
}

/// Pick the next step for the latest assistant message.
///
/// Invocations are examined in order and the first one decides: a memory
/// update or a known external tool routes accordingly, anything else ends the
/// turn without looking further.
pub fn route(last: &Message, tools: &ToolRegistry) -> Result<RouterDecision, RoutingError> {
    if last.role != Role::Assistant {
        return Err(RoutingError::UnexpectedRole {
            role: last.role.to_string(),
        });
    }

    let Some(first) = last.tool_calls.first() else {
        return Ok(RouterDecision::EndTurn);
    };

    let decision = match classify(first, tools)? {
        ToolTarget::MemoryUpdate(Some(UpdateType::Todo)) => RouterDecision::UpdateTodos,
        ToolTarget::MemoryUpdate(Some(UpdateType::Instructions)) => RouterDecision::UpdateInstructions,
        ToolTarget::External => RouterDecision::ContinueToolExecution,
        ToolTarget::MemoryUpdate(None) | ToolTarget::Unknown => RouterDecision::EndTurn,
    };
    Ok(decision)
}

/// The first `UpdateMemory` invocation in `message` targeting `update_type`.
pub fn find_memory_update(message: &Message, update_type: UpdateType) -> Option<&MessageToolCall> {
    message.tool_calls.iter().find(|call| {
        call.name == UPDATE_MEMORY_TOOL
            && call
                .parsed_arguments()
                .ok()
                .and_then(|args| args.get("update_type").and_then(|v| v.as_str()).and_then(UpdateType::parse))
                == Some(update_type)
    })
}

/// Tool definition offered to the assistant for memory updates.
pub fn update_memory_definition() -> ToolDefinition {
    ToolDefinition {
        name: UPDATE_MEMORY_TOOL.into(),
        description: "Decision on what memory type to update".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "update_type": {
                    "type": "string",
                    "enum": ["todo", "instructions"]
                }
            },
            "required": ["update_type"]
        }),
    }
}
