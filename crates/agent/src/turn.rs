//! The turn loop: assistant → router → tools or reflection → assistant.

use crate::completion::complete_within;
use crate::extract::{Extractor, ToolCallExtractor};
use crate::prompts;
use crate::reflect::{Reflection, Reflector};
use crate::router::{self, RouterDecision, UpdateType, update_memory_definition};
use chrono::Utc;
use futures::future::join_all;
use maistro_core::event::{DomainEvent, EventBus};
use maistro_core::memory::{MemoryStore, Namespace};
use maistro_core::message::{Conversation, Message, MessageToolCall};
use maistro_core::provider::{Provider, ProviderRequest};
use maistro_core::error::ReflectionError;
use maistro_core::record::INSTRUCTIONS_KEY;
use maistro_core::tool::{ToolCall, ToolRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ITERATION_LIMIT_REPLY: &str =
    "I've reached the maximum number of steps for this message. Please tell me how you'd like to continue.";

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The router ended the turn.
    Completed,
    /// `max_iterations` assistant calls were made without the turn ending.
    IterationLimit,
}

/// Result of [`TurnLoop::run`].
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The transcript with everything this turn appended
    pub conversation: Conversation,
    /// Text of the final assistant message
    pub reply: String,
    /// Assistant calls made
    pub iterations: u32,
    pub stop: StopReason,
}

/// Drives one user turn to completion.
pub struct TurnLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    store: Arc<dyn MemoryStore>,
    tools: Arc<ToolRegistry>,
    extractor: Option<Arc<dyn Extractor>>,
    event_bus: Arc<EventBus>,
    user_id: String,
    category: String,
    role: String,
    max_iterations: u32,
    completion_timeout: Duration,
}

impl TurnLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        store: Arc<dyn MemoryStore>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let defaults = maistro_config::AgentConfig::default();
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            store,
            tools,
            extractor: None,
            event_bus,
            user_id: defaults.user_id,
            category: defaults.todo_category,
            role: defaults.role,
            max_iterations: defaults.max_iterations,
            completion_timeout: Duration::from_secs(defaults.completion_timeout_secs),
        }
    }

    /// Take user, category, role and limits from the `[agent]` config table.
    pub fn configure(mut self, agent: &maistro_config::AgentConfig) -> Self {
        self.user_id = agent.user_id.clone();
        self.category = agent.todo_category.clone();
        self.role = agent.role.clone();
        self.max_iterations = agent.max_iterations.max(1);
        self.completion_timeout = Duration::from_secs(agent.completion_timeout_secs.max(1));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Replace the default LLM-backed extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn todo_namespace(&self) -> Namespace {
        Namespace::todo(&self.category, &self.user_id)
    }

    pub fn instructions_namespace(&self) -> Namespace {
        Namespace::instructions(&self.category, &self.user_id)
    }

    fn reflector(&self) -> Reflector {
        let extractor = self.extractor.clone().unwrap_or_else(|| {
            Arc::new(
                ToolCallExtractor::new(Arc::clone(&self.provider), &self.model)
                    .with_timeout(self.completion_timeout),
            )
        });
        Reflector::new(Arc::clone(&self.provider), extractor, Arc::clone(&self.store), &self.model)
            .with_temperature(self.temperature)
            .with_timeout(self.completion_timeout)
            .with_event_bus(Arc::clone(&self.event_bus))
    }

    /// Render the system prompt from the current memory.
    pub async fn system_prompt(&self) -> maistro_core::Result<String> {
        let todos = self
            .store
            .search(&self.todo_namespace())
            .await?
            .iter()
            .map(|item| item.value.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let instructions = self
            .store
            .get(&self.instructions_namespace(), INSTRUCTIONS_KEY)
            .await?
            .map(|item| match item.value.get("memory").and_then(|m| m.as_str()) {
                Some(text) => text.to_string(),
                None => item.value.to_string(),
            })
            .unwrap_or_default();

        Ok(prompts::system_prompt(&self.role, &todos, &instructions))
    }

    /// Run the loop until the router ends the turn or the iteration limit is hit.
    ///
    /// `conversation` should end with the user's new message.
    pub async fn run(&self, mut conversation: Conversation) -> maistro_core::Result<TurnOutcome> {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            user = %self.user_id,
            category = %self.category,
            "Processing turn"
        );

        let mut tool_definitions = vec![update_memory_definition()];
        tool_definitions.extend(self.tools.definitions());
        let reflector = self.reflector();
        let mut iterations = 0;

        loop {
            if iterations >= self.max_iterations {
                warn!(
                    conversation_id = %conversation.id,
                    iterations,
                    "Max iterations reached, ending turn"
                );
                return Ok(TurnOutcome {
                    conversation,
                    reply: ITERATION_LIMIT_REPLY.into(),
                    iterations,
                    stop: StopReason::IterationLimit,
                });
            }
            iterations += 1;

            debug!(conversation_id = %conversation.id, iteration = iterations, "Turn iteration");

            let mut messages = vec![Message::system(self.system_prompt().await?)];
            messages.extend(conversation.messages.iter().cloned());

            let mut request = ProviderRequest::new(&self.model, messages, self.temperature);
            request.max_tokens = self.max_tokens;
            request.tools = tool_definitions.clone();
            request.parallel_tool_calls = Some(!self.tools.is_empty());

            let response = match complete_within(self.provider.as_ref(), request, self.completion_timeout).await {
                Ok(response) => response,
                Err(e) => {
                    self.publish_error("completion", &e.to_string());
                    return Err(e.into());
                }
            };

            if let Some(usage) = &response.usage {
                self.event_bus.publish(DomainEvent::ResponseGenerated {
                    conversation_id: conversation.id.to_string(),
                    model: response.model.clone(),
                    tokens_used: usage.total_tokens,
                    timestamp: Utc::now(),
                });
            }

            let assistant = response.message;
            conversation.push(assistant.clone());

            let decision = router::route(&assistant, &self.tools)?;
            debug!(conversation_id = %conversation.id, %decision, "Routed");
            self.event_bus.publish(DomainEvent::RouteDecided {
                conversation_id: conversation.id.to_string(),
                decision: decision.to_string(),
                timestamp: Utc::now(),
            });

            match decision {
                RouterDecision::EndTurn => {
                    let unanswered = answer_all(&assistant.tool_calls, &HashSet::new(), |call| {
                        Message::tool_error(&call.id, format!("Tool '{}' is not available", call.name))
                    });
                    conversation.extend(unanswered);
                    return Ok(TurnOutcome {
                        conversation,
                        reply: assistant.content,
                        iterations,
                        stop: StopReason::Completed,
                    });
                }
                RouterDecision::UpdateTodos => {
                    let namespace = self.todo_namespace();
                    let existing = self.store.search(&namespace).await?;
                    let result = reflector.reflect_todos(&conversation.messages, &existing, &namespace).await;
                    let answer = self.reflection_answer(&assistant, UpdateType::Todo, result)?;
                    self.append_reflection(&mut conversation, &assistant, answer);
                }
                RouterDecision::UpdateInstructions => {
                    let namespace = self.instructions_namespace();
                    let existing = self.store.get(&namespace, INSTRUCTIONS_KEY).await?;
                    let result = reflector
                        .reflect_instructions(&conversation.messages, existing.as_ref(), &namespace)
                        .await;
                    let answer = self.reflection_answer(&assistant, UpdateType::Instructions, result)?;
                    self.append_reflection(&mut conversation, &assistant, answer);
                }
                RouterDecision::ContinueToolExecution => {
                    let results = self.execute_tools(&assistant.tool_calls).await;
                    conversation.extend(results);
                }
            }
        }
    }

    /// The message answering a reflection step.
    ///
    /// A failed step is reported to the assistant as a tool error on the
    /// `UpdateMemory` call and the turn goes on. Store failures abort the turn.
    fn reflection_answer(
        &self,
        assistant: &Message,
        update_type: UpdateType,
        result: Result<Reflection, ReflectionError>,
    ) -> maistro_core::Result<Message> {
        let error = match result {
            Ok(reflection) => return Ok(reflection.message),
            Err(e) => e,
        };
        self.publish_error("reflection", &error.to_string());

        if matches!(error, ReflectionError::Store(_)) {
            return Err(error.into());
        }
        let Some(call) = router::find_memory_update(assistant, update_type) else {
            return Err(error.into());
        };
        warn!(
            update_type = update_type.as_str(),
            call_id = %call.id,
            error = %error,
            "Memory update failed, reporting to the assistant"
        );
        Ok(Message::tool_error(&call.id, format!("Error: memory update failed: {error}")))
    }

    /// Append the reflection answer, then answer every other invocation as skipped.
    fn append_reflection(&self, conversation: &mut Conversation, assistant: &Message, answer: Message) {
        let mut answered = HashSet::new();
        if let Some(id) = &answer.tool_call_id {
            answered.insert(id.clone());
        }
        conversation.push(answer);
        let skipped = answer_all(&assistant.tool_calls, &answered, |call| {
            Message::tool_result(&call.id, format!("skipped: '{}' was not run in this step", call.name))
        });
        conversation.extend(skipped);
    }

    /// Run every invocation concurrently; results come back in request order.
    async fn execute_tools(&self, calls: &[MessageToolCall]) -> Vec<Message> {
        join_all(calls.iter().map(|call| self.execute_one(call))).await
    }

    async fn execute_one(&self, call: &MessageToolCall) -> Message {
        if !self.tools.contains(&call.name) {
            return Message::tool_error(&call.id, format!("Tool '{}' is not available", call.name));
        }

        let arguments = match call.parsed_arguments() {
            Ok(args) => args,
            Err(e) => {
                return Message::tool_error(&call.id, format!("Error: invalid arguments for '{}': {e}", call.name));
            }
        };

        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };

        let start = Instant::now();
        let result = self.tools.execute(&tool_call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (success, message) = match result {
            Ok(result) if result.success => (true, Message::tool_result(&call.id, result.output)),
            Ok(result) => (false, Message::tool_error(&call.id, result.output)),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                (false, Message::tool_error(&call.id, format!("Error: {e}")))
            }
        };

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
        message
    }

    fn publish_error(&self, context: &str, message: &str) {
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: context.to_string(),
            error_message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// One message per invocation not already in `answered`.
fn answer_all(
    calls: &[MessageToolCall],
    answered: &HashSet<String>,
    answer: impl Fn(&MessageToolCall) -> Message,
) -> Vec<Message> {
    calls
        .iter()
        .filter(|call| !answered.contains(&call.id))
        .map(answer)
        .collect()
}
