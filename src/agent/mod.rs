//! Tool-using extraction agent.

pub mod fields;
pub mod prompt;

pub use fields::{ExtractionResult, ExtractionStatus, parse_answer};

use crate::config::{ExtractionMode, InventoryConfig};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError, Tool};
use crate::metrics;
use crate::models::CandidateListing;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("model requested unknown tool `{0}`")]
    UnknownTool(String),
    #[error("no final answer after {0} iterations")]
    IterationLimit(usize),
}

/// Runs the conversation until the model answers without tool calls.
pub struct AgentExecutor<'a> {
    model: &'a dyn ChatModel,
    tools: Vec<&'a dyn Tool>,
    max_iterations: usize,
    json_response: bool,
}

impl<'a> AgentExecutor<'a> {
    pub fn new(model: &'a dyn ChatModel, tools: Vec<&'a dyn Tool>, max_iterations: usize) -> Self {
        Self {
            model,
            tools,
            max_iterations: max_iterations.max(1),
            json_response: false,
        }
    }

    pub fn json_response(mut self, enabled: bool) -> Self {
        self.json_response = enabled;
        self
    }

    pub async fn invoke(&self, messages: Vec<ChatMessage>) -> Result<String, AgentError> {
        let mut request = ChatRequest {
            messages,
            tools: self.tools.iter().map(|t| t.spec()).collect(),
            json_response: self.json_response,
        };

        for iteration in 1..=self.max_iterations {
            let reply = self.model.chat(&request).await?;
            let calls = reply.pending_tool_calls().to_vec();
            if calls.is_empty() {
                debug!(target = "furniflip.agent", iteration, "agent finished");
                return Ok(reply.text_content());
            }

            request.messages.push(reply);
            for call in calls {
                let tool = self
                    .tools
                    .iter()
                    .find(|t| t.spec().name == call.function.name)
                    .ok_or_else(|| AgentError::UnknownTool(call.function.name.clone()))?;
                let arguments = parse_arguments(&call.function.arguments);
                debug!(target = "furniflip.agent", tool = %call.function.name, iteration, "executing tool call");
                let output = match tool.call(arguments).await {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(target = "furniflip.agent", tool = %call.function.name, error = %err, "tool call failed");
                        format!("Error: {err}")
                    }
                };
                request.messages.push(ChatMessage::tool_result(call.id, output));
            }
        }
        Err(AgentError::IterationLimit(self.max_iterations))
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Prompts the model about one image and parses its answer. `candidates` is
/// the full scraped list; titles and prices go into the prompt index-aligned
/// and verbatim. Missing fields are reported on the result, never raised.
pub async fn extract_item(
    model: &dyn ChatModel,
    retrieval: &dyn Tool,
    image_url: &str,
    candidates: &[CandidateListing],
    categories: &[String],
    conditions: &[String],
    cfg: &InventoryConfig,
) -> Result<ExtractionResult, AgentError> {
    let titles: Vec<String> = candidates.iter().map(|c| c.title.clone()).collect();
    let prices: Vec<String> = candidates.iter().map(|c| c.price.clone()).collect();
    let task =
        prompt::inventory_prompt(&titles, categories, conditions, &prices, cfg.extraction_mode);

    let answer = AgentExecutor::new(model, vec![retrieval], cfg.agent_max_iterations)
        .json_response(cfg.extraction_mode == ExtractionMode::Structured)
        .invoke(prompt::build_messages(image_url, task))
        .await?;

    let result = parse_answer(&answer);
    if result.status == ExtractionStatus::Partial {
        warn!(
            target = "furniflip.agent",
            image_url,
            missing = ?result.missing,
            "extraction incomplete"
        );
        metrics::extraction_partial(result.missing.len());
    }
    Ok(result)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::llm::{FunctionCall, Role, ToolCall};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted replies and records every request it saw.
    #[derive(Default)]
    pub struct ScriptedModel {
        pub replies: Mutex<Vec<Result<ChatMessage, LlmError>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<ChatMessage, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                requests: Mutex::default(),
            }
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: id.to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            tool_call_id: None,
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(ChatMessage::assistant("name: Unknown")))
        }
    }
}
