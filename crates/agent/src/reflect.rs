//! Memory reflection: derive records from the transcript and persist them.
//!
//! Both paths answer the `UpdateMemory` invocation that triggered them with a
//! tool message, so the assistant's request is always matched by a response.
//! Nothing is written until every proposed record has been validated.

use crate::completion::complete_within;
use crate::extract::{ExistingRecord, ExtractedChange, ExtractionRequest, Extractor};
use crate::prompts;
use crate::router::{UpdateType, find_memory_update};
use chrono::Utc;
use maistro_core::error::ReflectionError;
use maistro_core::event::{DomainEvent, EventBus};
use maistro_core::memory::{Item, MemoryStore, Namespace};
use maistro_core::message::{Message, MessageToolCall, Role};
use maistro_core::provider::{Provider, ProviderRequest};
use maistro_core::record::{INSTRUCTIONS_KEY, TODO_SCHEMA_NAME, ToDo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The outcome of one reflection step.
#[derive(Debug, Clone)]
pub struct Reflection {
    /// Number of records written to the store
    pub written: usize,
    /// Tool message answering the triggering invocation
    pub message: Message,
}

pub struct Reflector {
    provider: Arc<dyn Provider>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn MemoryStore>,
    model: String,
    temperature: f32,
    timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl Reflector {
    pub fn new(
        provider: Arc<dyn Provider>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn MemoryStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            extractor,
            store,
            model: model.into(),
            temperature: 0.0,
            timeout: Duration::from_secs(120),
            event_bus: None,
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

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Update the to-do list from the transcript.
    ///
    /// `transcript` ends with the assistant message that requested the
    /// update; `existing` is the current content of `namespace`.
    pub async fn reflect_todos(
        &self,
        transcript: &[Message],
        existing: &[Item],
        namespace: &Namespace,
    ) -> Result<Reflection, ReflectionError> {
        let invocation = triggering_invocation(transcript, UpdateType::Todo)?;

        let mut messages = vec![Message::system(prompts::reflection_instruction(Utc::now()))];
        messages.extend(history(transcript).iter().cloned());

        let request = ExtractionRequest {
            schema: ToDo::schema(),
            existing: existing
                .iter()
                .map(|item| ExistingRecord {
                    id: item.key.clone(),
                    kind: TODO_SCHEMA_NAME.into(),
                    value: item.value.clone(),
                })
                .collect(),
            messages: merge_message_runs(messages),
        };

        let changes = self.extractor.extract(request).await?;

        // Validate everything before the first write
        let mut writes = Vec::new();
        for change in &changes {
            match change {
                ExtractedChange::Inserted { value } => {
                    let todo = ToDo::from_value(value.clone())?;
                    writes.push((uuid::Uuid::new_v4().to_string(), todo.to_value()));
                }
                ExtractedChange::Patched { doc_id, value, .. } => {
                    let todo = ToDo::from_value(value.clone())?;
                    writes.push((doc_id.clone(), todo.to_value()));
                }
                ExtractedChange::Unchanged { .. } => {}
            }
        }

        for (key, value) in &writes {
            self.store.put(namespace, key, value.clone()).await?;
            self.publish_update(namespace, key);
        }

        info!(%namespace, written = writes.len(), changes = changes.len(), "To-do list reflected");

        Ok(Reflection {
            written: writes.len(),
            message: Message::tool_result(&invocation.id, summarize_changes(&changes, TODO_SCHEMA_NAME)),
        })
    }

    /// Rewrite the instruction record from the transcript.
    ///
    /// The store is only touched after the completion succeeds.
    pub async fn reflect_instructions(
        &self,
        transcript: &[Message],
        existing: Option<&Item>,
        namespace: &Namespace,
    ) -> Result<Reflection, ReflectionError> {
        let invocation = triggering_invocation(transcript, UpdateType::Instructions)?;

        let current = existing.map(|item| match item.value.get("memory").and_then(|m| m.as_str()) {
            Some(text) => text.to_string(),
            None => item.value.to_string(),
        });

        let mut messages = vec![Message::system(prompts::instructions_prompt(current.as_deref()))];
        messages.extend(history(transcript).iter().cloned());
        messages.push(Message::user(prompts::INSTRUCTIONS_DIRECTIVE));

        let request = ProviderRequest::new(&self.model, messages, self.temperature);
        let response = complete_within(self.provider.as_ref(), request, self.timeout)
            .await
            .map_err(ReflectionError::CompletionUnavailable)?;

        let value = serde_json::json!({ "memory": response.message.content });
        self.store.put(namespace, INSTRUCTIONS_KEY, value).await?;
        self.publish_update(namespace, INSTRUCTIONS_KEY);

        debug!(%namespace, "Instructions rewritten");

        Ok(Reflection {
            written: 1,
            message: Message::tool_result(&invocation.id, prompts::INSTRUCTIONS_UPDATED),
        })
    }

    fn publish_update(&self, namespace: &Namespace, key: &str) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::MemoryUpdated {
                namespace: namespace.to_string(),
                key: key.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

fn triggering_invocation(
    transcript: &[Message],
    update_type: UpdateType,
) -> Result<&MessageToolCall, ReflectionError> {
    transcript
        .last()
        .and_then(|last| find_memory_update(last, update_type))
        .ok_or_else(|| ReflectionError::MissingInvocation(update_type.as_str().into()))
}

/// Everything before the tool-requesting message.
fn history(transcript: &[Message]) -> &[Message] {
    match transcript.split_last() {
        Some((_, rest)) => rest,
        None => &[],
    }
}

/// Human-readable account of what the extractor changed, one paragraph per change.
pub fn summarize_changes(changes: &[ExtractedChange], schema_name: &str) -> String {
    if changes.is_empty() {
        return format!("No {schema_name} changes were needed.");
    }

    changes
        .iter()
        .map(|change| match change {
            ExtractedChange::Patched {
                doc_id,
                planned_edits,
                changed,
                ..
            } => {
                let changed = changed.as_str().map_or_else(|| changed.to_string(), str::to_string);
                format!("Document {doc_id} updated:\nPlan: {planned_edits}\nAdded content: {changed}")
            }
            ExtractedChange::Unchanged { doc_id, planned_edits } => {
                format!("Document {doc_id} unchanged:\n{planned_edits}")
            }
            ExtractedChange::Inserted { value } => {
                format!("New {schema_name} created:\nContent: {value}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn is_plain(message: &Message) -> bool {
    message.role != Role::Tool && message.tool_calls.is_empty() && message.tool_call_id.is_none()
}

/// Collapse consecutive plain messages of the same role into one.
///
/// Messages carrying tool calls or answering one are never merged.
pub fn merge_message_runs(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(prev) if prev.role == message.role && is_plain(prev) && is_plain(&message) => {
                prev.content.push('\n');
                prev.content.push_str(&message.content);
            }
            _ => merged.push(message),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::UPDATE_MEMORY_TOOL;
    use crate::test_helpers::{ScriptedProvider, call, text_response};
    use async_trait::async_trait;
    use maistro_core::error::ProviderError;
    use maistro_memory::InMemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns canned changes and remembers the request.
    struct FixedExtractor {
        changes: Vec<ExtractedChange>,
        seen: Mutex<Option<ExtractionRequest>>,
    }

    impl FixedExtractor {
        fn new(changes: Vec<ExtractedChange>) -> Self {
            Self {
                changes,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Extractor for FixedExtractor {
        async fn extract(&self, request: ExtractionRequest) -> Result<Vec<ExtractedChange>, ReflectionError> {
            *self.seen.lock().unwrap() = Some(request);
            Ok(self.changes.clone())
        }
    }

    fn transcript(update_type: &str) -> Vec<Message> {
        vec![
            Message::user("remind me to buy milk tomorrow"),
            Message::assistant_with_tool_calls(
                "",
                vec![call("call_1", UPDATE_MEMORY_TOOL, json!({"update_type": update_type}))],
            ),
        ]
    }

    fn reflector(
        provider: Arc<dyn Provider>,
        extractor: Arc<dyn Extractor>,
        store: Arc<InMemoryStore>,
    ) -> Reflector {
        Reflector::new(provider, extractor, store, "mock-model")
    }

    #[tokio::test]
    async fn todo_insert_is_persisted_and_reported() {
        let store = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(FixedExtractor::new(vec![ExtractedChange::Inserted {
            value: json!({"task": "buy milk", "deadline": "2025-06-02", "solutions": ["corner shop"]}),
        }]));
        let ns = Namespace::todo("general", "alice");

        let reflection = reflector(Arc::new(ScriptedProvider::texts(&[])), extractor.clone(), store.clone())
            .reflect_todos(&transcript("todo"), &[], &ns)
            .await
            .unwrap();

        assert_eq!(reflection.written, 1);
        assert_eq!(reflection.message.tool_call_id.as_deref(), Some("call_1"));
        assert!(reflection.message.content.contains("New ToDo created"));
        assert!(reflection.message.content.contains("buy milk"));

        let items = store.search(&ns).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value["status"], "not started");

        // The tool-requesting message is not part of the extraction input
        let seen = extractor.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.messages.len(), 2);
        assert_eq!(seen.messages[0].role, Role::System);
        assert_eq!(seen.messages[1].content, "remind me to buy milk tomorrow");
    }

    #[tokio::test]
    async fn patch_overwrites_only_its_id() {
        let store = Arc::new(InMemoryStore::new());
        let ns = Namespace::todo("general", "alice");
        store
            .put(&ns, "a", json!({"task": "buy milk", "solutions": ["shop"]}))
            .await
            .unwrap();
        store
            .put(&ns, "b", json!({"task": "walk dog", "solutions": ["park"]}))
            .await
            .unwrap();
        let existing = store.search(&ns).await.unwrap();

        let extractor = Arc::new(FixedExtractor::new(vec![ExtractedChange::Patched {
            doc_id: "a".into(),
            planned_edits: "mark done".into(),
            changed: json!("done"),
            value: json!({"task": "buy milk", "solutions": ["shop"], "status": "done"}),
        }]));

        let reflection = reflector(Arc::new(ScriptedProvider::texts(&[])), extractor, store.clone())
            .reflect_todos(&transcript("todo"), &existing, &ns)
            .await
            .unwrap();
        assert_eq!(reflection.written, 1);
        assert!(reflection.message.content.starts_with("Document a updated:\nPlan: mark done"));

        let a = store.get(&ns, "a").await.unwrap().unwrap();
        let b = store.get(&ns, "b").await.unwrap().unwrap();
        assert_eq!(a.value["status"], "done");
        assert_eq!(b.value, json!({"task": "walk dog", "solutions": ["park"]}));
    }

    #[tokio::test]
    async fn invalid_record_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(FixedExtractor::new(vec![
            ExtractedChange::Inserted {
                value: json!({"task": "good", "solutions": ["fine"]}),
            },
            ExtractedChange::Inserted {
                value: json!({"task": "bad", "solutions": []}),
            },
        ]));
        let ns = Namespace::todo("general", "alice");

        let err = reflector(Arc::new(ScriptedProvider::texts(&[])), extractor, store.clone())
            .reflect_todos(&transcript("todo"), &[], &ns)
            .await
            .unwrap_err();

        assert!(matches!(err, ReflectionError::InvalidRecordShape { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unchanged_patch_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(FixedExtractor::new(vec![ExtractedChange::Unchanged {
            doc_id: "a".into(),
            planned_edits: "already up to date".into(),
        }]));
        let ns = Namespace::todo("general", "alice");

        let reflection = reflector(Arc::new(ScriptedProvider::texts(&[])), extractor, store.clone())
            .reflect_todos(&transcript("todo"), &[], &ns)
            .await
            .unwrap();
        assert_eq!(reflection.written, 0);
        assert_eq!(reflection.message.content, "Document a unchanged:\nalready up to date");
    }

    #[tokio::test]
    async fn missing_invocation_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(FixedExtractor::new(vec![]));
        let ns = Namespace::todo("general", "alice");

        let err = reflector(Arc::new(ScriptedProvider::texts(&[])), extractor, store)
            .reflect_todos(&transcript("instructions"), &[], &ns)
            .await
            .unwrap_err();
        assert!(matches!(err, ReflectionError::MissingInvocation(kind) if kind == "todo"));
    }

    #[tokio::test]
    async fn instructions_overwrite_fixed_key() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(ScriptedProvider::texts(&["Always add a deadline."]));
        let ns = Namespace::instructions("general", "alice");

        let reflection = reflector(provider.clone(), Arc::new(FixedExtractor::new(vec![])), store.clone())
            .reflect_instructions(&transcript("instructions"), None, &ns)
            .await
            .unwrap();

        assert_eq!(reflection.message.content, "updated instructions");
        assert_eq!(reflection.message.tool_call_id.as_deref(), Some("call_1"));
        let item = store.get(&ns, INSTRUCTIONS_KEY).await.unwrap().unwrap();
        assert_eq!(item.value, json!({"memory": "Always add a deadline."}));

        let sent = provider.requests();
        assert!(sent[0].messages[0].content.contains("<current_instructions>\nNone\n"));
        assert_eq!(sent[0].messages.last().unwrap().content, prompts::INSTRUCTIONS_DIRECTIVE);
        assert!(sent[0].tools.is_empty());
    }

    #[tokio::test]
    async fn failed_completion_keeps_prior_instructions() {
        let store = Arc::new(InMemoryStore::new());
        let ns = Namespace::instructions("general", "alice");
        store
            .put(&ns, INSTRUCTIONS_KEY, json!({"memory": "keep it short"}))
            .await
            .unwrap();
        let prior = store.get(&ns, INSTRUCTIONS_KEY).await.unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Network("down".into()))]));
        let err = reflector(provider, Arc::new(FixedExtractor::new(vec![])), store.clone())
            .reflect_instructions(&transcript("instructions"), prior.as_ref(), &ns)
            .await
            .unwrap_err();

        assert!(matches!(err, ReflectionError::CompletionUnavailable(_)));
        let after = store.get(&ns, INSTRUCTIONS_KEY).await.unwrap().unwrap();
        assert_eq!(after.value, json!({"memory": "keep it short"}));
    }

    #[tokio::test]
    async fn instruction_reflection_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let ns = Namespace::instructions("general", "alice");
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response("Group tasks by day.")),
            Ok(text_response("Group tasks by day.")),
        ]));
        let reflector = reflector(provider.clone(), Arc::new(FixedExtractor::new(vec![])), store.clone());
        let transcript = transcript("instructions");

        reflector.reflect_instructions(&transcript, None, &ns).await.unwrap();
        let first = store.get(&ns, INSTRUCTIONS_KEY).await.unwrap().unwrap();
        reflector
            .reflect_instructions(&transcript, Some(&first), &ns)
            .await
            .unwrap();
        let second = store.get(&ns, INSTRUCTIONS_KEY).await.unwrap().unwrap();

        assert_eq!(first.value, second.value);
        assert!(provider.requests()[1].messages[0].content.contains("Group tasks by day."));
    }

    #[test]
    fn summary_formats() {
        let changes = vec![
            ExtractedChange::Patched {
                doc_id: "d1".into(),
                planned_edits: "set status".into(),
                changed: json!("done"),
                value: json!({}),
            },
            ExtractedChange::Unchanged {
                doc_id: "d2".into(),
                planned_edits: "nothing to do".into(),
            },
            ExtractedChange::Inserted {
                value: json!({"task": "call mum"}),
            },
        ];
        assert_eq!(
            summarize_changes(&changes, "ToDo"),
            "Document d1 updated:\nPlan: set status\nAdded content: done\n\n\
             Document d2 unchanged:\nnothing to do\n\n\
             New ToDo created:\nContent: {\"task\":\"call mum\"}"
        );
        assert_eq!(summarize_changes(&[], "ToDo"), "No ToDo changes were needed.");
    }

    #[test]
    fn patched_content_prints_bare_strings() {
        let patched = |changed| ExtractedChange::Patched {
            doc_id: "d1".into(),
            planned_edits: "update".into(),
            changed,
            value: json!({}),
        };
        assert!(summarize_changes(&[patched(json!("in progress"))], "ToDo").ends_with("Added content: in progress"));
        assert!(summarize_changes(&[patched(json!(30))], "ToDo").ends_with("Added content: 30"));
        assert!(
            summarize_changes(&[patched(json!(["ask a neighbour"]))], "ToDo")
                .ends_with("Added content: [\"ask a neighbour\"]")
        );
    }

    #[test]
    fn merge_runs_only_joins_plain_neighbours() {
        let merged = merge_message_runs(vec![
            Message::system("a"),
            Message::system("b"),
            Message::user("c"),
            Message::user("d"),
            Message::assistant_with_tool_calls("", vec![call("x", "list_events", json!({}))]),
            Message::tool_result("x", "e"),
            Message::tool_result("y", "f"),
            Message::assistant("g"),
        ]);

        let contents: Vec<&str> = merged.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a\nb", "c\nd", "", "e", "f", "g"]);
    }
}
