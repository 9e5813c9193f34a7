use super::{ChatMessage, ChatModel, ChatRequest, Embedder, LlmError, ToolSpec};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: std::env::var("MODEL_NAME").unwrap_or_else(|_| "gpt-4o".into()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".into()),
        }
    }
}

pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, LlmError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;

        let response = self
            .http
            .post(format!("{}{path}", self.config.base_url))
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http(format!("HTTP {status}: {text}")));
        }

        response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        debug!(
            target = "furniflip.llm",
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat request"
        );
        let body = CompletionRequest::from_request(&self.config.model, request);
        let payload: CompletionResponse = self.post("/chat/completions", &body).await?;
        payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::InvalidResponse("no choices".into()))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: texts,
        };
        let mut payload: EmbeddingResponse = self.post("/embeddings", &body).await?;
        if payload.data.len() != texts.len() {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.data.len()
            )));
        }
        payload.data.sort_by_key(|item| item.index);
        Ok(payload.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

impl<'a> CompletionRequest<'a> {
    fn from_request(model: &'a str, request: &'a ChatRequest) -> Self {
        let tools: Vec<Value> = request.tools.iter().map(tool_definition).collect();
        Self {
            model,
            messages: &request.messages,
            temperature: 0.0,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
            response_format: request
                .json_response
                .then(|| json!({ "type": "json_object" })),
        }
    }
}

fn tool_definition(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            model: "gpt-4o".into(),
            embedding_model: "text-embedding-3-small".into(),
        }
    }

    #[test]
    fn completion_request_declares_tools_and_json_mode() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: vec![ToolSpec {
                name: "retrieve_item_information".into(),
                description: "Search and return information about an item.".into(),
                parameters: json!({"type": "object"}),
            }],
            json_response: true,
        };
        let body = serde_json::to_value(CompletionRequest::from_request("gpt-4o", &request)).unwrap();
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "retrieve_item_information");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn plain_request_omits_tool_fields() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let body = serde_json::to_value(CompletionRequest::from_request("gpt-4o", &request)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("response_format").is_none());
    }

    #[tokio::test]
    async fn missing_key_fails_before_network() {
        let client = OpenAiClient::new(config());
        let err = client
            .chat(&ChatRequest::default())
            .await
            .expect_err("no key configured");
        assert!(matches!(err, LlmError::MissingApiKey));
    }

    #[tokio::test]
    async fn empty_embedding_batch_skips_request() {
        let client = OpenAiClient::new(config());
        let out = client.embed_documents(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
