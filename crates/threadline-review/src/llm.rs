use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use threadline_core::{LlmConfig, ThreadlineError};

/// One grounding request sent to the generation service.
///
/// # Examples
///
/// ```
/// use threadline_review::llm::GenerationRequest;
///
/// let request = GenerationRequest {
///     system_instruction: "Grade the change.".into(),
///     user_prompt: "+let x = 1;".into(),
/// };
/// assert!(request.user_prompt.starts_with('+'));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Standing instructions describing the verdict contract.
    pub system_instruction: String,
    /// Rule, context files, diff, and in-scope files.
    pub user_prompt: String,
}

/// A text-generation backend that grades one rule against one diff.
///
/// Implementations are shared read-only across concurrent evaluations.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Send `request` and return the raw response text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ThreadlineError>;
}

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use threadline_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Grade this change".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint:
/// OpenAI, Ollama, vLLM, LiteLLM, etc.
///
/// # Examples
///
/// ```
/// use threadline_core::LlmConfig;
/// use threadline_review::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "gpt-4o");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Llm`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, ThreadlineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ThreadlineError::Llm(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Return the model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a chat completion request and return the text response.
    ///
    /// Posts to `{base_url}/v1/chat/completions` with temperature 0.1 and a
    /// JSON response format.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Llm`] on HTTP errors or when the response
    /// has no message content.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, ThreadlineError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/');
        let url = format!("{base_url}/v1/chat/completions");

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
        });

        let mut request = self.client.post(&url);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| ThreadlineError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ThreadlineError::Llm(format!(
                "generation API error {status}: {body_text}"
            )));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ThreadlineError::Llm(format!("failed to parse response: {e}")))?;

        let content = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                ThreadlineError::Llm(format!("unexpected response structure: {response_body}"))
            })?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl GenerationService for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ThreadlineError> {
        tracing::debug!(model = %self.config.model, "sending generation request");
        self.chat(vec![
            ChatMessage {
                role: Role::System,
                content: request.system_instruction.clone(),
            },
            ChatMessage {
                role: Role::User,
                content: request.user_prompt.clone(),
            },
        ])
        .await
    }
}
