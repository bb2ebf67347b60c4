//! Structured extraction: turn a transcript into new or patched records.
//!
//! The [`Extractor`] trait is the seam; [`ToolCallExtractor`] implements it
//! by binding the record schema and a `PatchDoc` tool to a completion and
//! reading the tool calls that come back.

use crate::completion::complete_within;
use async_trait::async_trait;
use maistro_core::error::ReflectionError;
use maistro_core::message::{Message, MessageToolCall};
use maistro_core::provider::{Provider, ProviderRequest, ToolChoice, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the patch tool bound next to the record schema.
pub const PATCH_DOC_TOOL: &str = "PatchDoc";

/// A stored document the extractor may patch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingRecord {
    pub id: String,
    /// Schema name, e.g. "ToDo"
    pub kind: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// The record schema, bound as a tool
    pub schema: ToolDefinition,
    pub existing: Vec<ExistingRecord>,
    /// Prepared transcript, reflection instruction first
    pub messages: Vec<Message>,
}

/// One change proposed by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedChange {
    /// An existing document was patched; `value` is the full patched document.
    Patched {
        doc_id: String,
        planned_edits: String,
        /// Value carried by the first patch operation
        changed: Value,
        value: Value,
    },
    /// The extractor looked at a document and left it alone.
    Unchanged { doc_id: String, planned_edits: String },
    /// A brand-new document.
    Inserted { value: Value },
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: ExtractionRequest) -> Result<Vec<ExtractedChange>, ReflectionError>;
}

/// Arguments of a `PatchDoc` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchDoc {
    pub json_doc_id: String,
    #[serde(default)]
    pub planned_edits: String,
    #[serde(default)]
    pub patches: Vec<PatchOp>,
}

/// A JSON-Patch style operation on a JSON-Pointer path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Replace,
    Remove,
}

/// LLM-backed extractor using tool calls.
pub struct ToolCallExtractor {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl ToolCallExtractor {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn patch_doc_definition() -> ToolDefinition {
        ToolDefinition {
            name: PATCH_DOC_TOOL.into(),
            description: "Patch an existing document. Use an empty patch list when no change is needed.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "json_doc_id": {
                        "type": "string",
                        "description": "The id of the document to patch."
                    },
                    "planned_edits": {
                        "type": "string",
                        "description": "Short plan of the edits to make."
                    },
                    "patches": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "op": { "type": "string", "enum": ["add", "replace", "remove"] },
                                "path": { "type": "string", "description": "JSON Pointer, e.g. /status" },
                                "value": { "description": "New value (omit for remove)." }
                            },
                            "required": ["op", "path"]
                        }
                    }
                },
                "required": ["json_doc_id", "planned_edits", "patches"]
            }),
        }
    }

    fn build_request(&self, request: &ExtractionRequest) -> ProviderRequest {
        let mut messages = request.messages.clone();
        let mut tools = vec![request.schema.clone()];

        let tool_choice = if request.existing.is_empty() {
            ToolChoice::Named(request.schema.name.clone())
        } else {
            let listing = request
                .existing
                .iter()
                .map(|r| format!("({}, {}, {})", r.id, r.kind, r.value))
                .collect::<Vec<_>>()
                .join("\n");
            // Right after the reflection instruction, ahead of the transcript
            let at = usize::from(!messages.is_empty());
            messages.insert(at, Message::system(crate::prompts::existing_documents(&listing)));
            tools.push(Self::patch_doc_definition());
            ToolChoice::Required
        };

        let mut provider_request = ProviderRequest::new(&self.model, messages, self.temperature);
        provider_request.tools = tools;
        provider_request.parallel_tool_calls = Some(true);
        provider_request.tool_choice = Some(tool_choice);
        provider_request
    }

    fn interpret(
        call: &MessageToolCall,
        request: &ExtractionRequest,
    ) -> Result<Option<ExtractedChange>, ReflectionError> {
        let args = call.parsed_arguments().map_err(|e| ReflectionError::InvalidRecordShape {
            record: call.name.clone(),
            reason: format!("arguments are not valid JSON: {e}"),
        })?;

        if call.name == request.schema.name {
            return Ok(Some(ExtractedChange::Inserted { value: args }));
        }

        if call.name != PATCH_DOC_TOOL {
            warn!(tool = %call.name, "Extractor called an unexpected tool, ignoring");
            return Ok(None);
        }

        let patch: PatchDoc = serde_json::from_value(args).map_err(|e| ReflectionError::InvalidRecordShape {
            record: PATCH_DOC_TOOL.into(),
            reason: e.to_string(),
        })?;

        let Some(existing) = request.existing.iter().find(|r| r.id == patch.json_doc_id) else {
            warn!(doc_id = %patch.json_doc_id, "Patch targets an unknown document, ignoring");
            return Ok(None);
        };

        let Some(first) = patch.patches.first() else {
            return Ok(Some(ExtractedChange::Unchanged {
                doc_id: patch.json_doc_id,
                planned_edits: patch.planned_edits,
            }));
        };
        let changed = first.value.clone();

        let value = apply_patches(&existing.value, &patch.patches).map_err(|reason| {
            ReflectionError::InvalidRecordShape {
                record: existing.kind.clone(),
                reason,
            }
        })?;

        Ok(Some(ExtractedChange::Patched {
            doc_id: patch.json_doc_id,
            planned_edits: patch.planned_edits,
            changed,
            value,
        }))
    }
}

#[async_trait]
impl Extractor for ToolCallExtractor {
    async fn extract(&self, request: ExtractionRequest) -> Result<Vec<ExtractedChange>, ReflectionError> {
        let provider_request = self.build_request(&request);

        debug!(
            schema = %request.schema.name,
            existing = request.existing.len(),
            messages = provider_request.messages.len(),
            "Running extraction"
        );

        let response = complete_within(self.provider.as_ref(), provider_request, self.timeout)
            .await
            .map_err(ReflectionError::CompletionUnavailable)?;

        let mut changes = Vec::new();
        for call in &response.message.tool_calls {
            if let Some(change) = Self::interpret(call, &request)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }
}

/// Apply patch operations in order to a copy of `doc`.
pub fn apply_patches(doc: &Value, patches: &[PatchOp]) -> Result<Value, String> {
    let mut doc = doc.clone();
    for patch in patches {
        apply_one(&mut doc, patch)?;
    }
    Ok(doc)
}

fn apply_one(doc: &mut Value, patch: &PatchOp) -> Result<(), String> {
    if patch.path.is_empty() {
        return match patch.op {
            PatchKind::Add | PatchKind::Replace => {
                *doc = patch.value.clone();
                Ok(())
            }
            PatchKind::Remove => Err("cannot remove the whole document".into()),
        };
    }

    let (parent_path, last) = split_pointer(&patch.path)?;
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| format!("path '{}' does not exist", patch.path))?;

    match parent {
        Value::Object(map) => match patch.op {
            PatchKind::Add => {
                map.insert(last, patch.value.clone());
                Ok(())
            }
            PatchKind::Replace => match map.get_mut(&last) {
                Some(slot) => {
                    *slot = patch.value.clone();
                    Ok(())
                }
                None => Err(format!("path '{}' does not exist", patch.path)),
            },
            PatchKind::Remove => map
                .remove(&last)
                .map(|_| ())
                .ok_or_else(|| format!("path '{}' does not exist", patch.path)),
        },
        Value::Array(items) => {
            if patch.op == PatchKind::Add && last == "-" {
                items.push(patch.value.clone());
                return Ok(());
            }
            let index: usize = last
                .parse()
                .map_err(|_| format!("'{last}' is not an array index in '{}'", patch.path))?;
            match patch.op {
                PatchKind::Add if index <= items.len() => {
                    items.insert(index, patch.value.clone());
                    Ok(())
                }
                PatchKind::Replace if index < items.len() => {
                    items[index] = patch.value.clone();
                    Ok(())
                }
                PatchKind::Remove if index < items.len() => {
                    items.remove(index);
                    Ok(())
                }
                _ => Err(format!("index {index} out of bounds in '{}'", patch.path)),
            }
        }
        _ => Err(format!("parent of '{}' is not a container", patch.path)),
    }
}

/// Split `/a/b/c` into (`/a/b`, `c`), unescaping the final token.
fn split_pointer(path: &str) -> Result<(&str, String), String> {
    if !path.starts_with('/') {
        return Err(format!("'{path}' is not a JSON Pointer"));
    }
    let cut = path.rfind('/').unwrap_or(0);
    let token = path[cut + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..cut], token))
}
