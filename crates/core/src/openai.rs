// OpenAI-compatible AiProvider
//
// Single-shot, non-streaming chat completion. The request context is sent
// as the `user` field for attribution; the prompt goes in as one user
// message after a fixed system message.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::traits::{AiProvider, AiRequestContext, AiResponse, AiSettings};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const SYSTEM_PROMPT: &str =
    "You are a business-process assistant. Answer precisely in the format the user asks for.";

/// AI capability backed by an OpenAI-compatible `/chat/completions` endpoint
///
/// # Example
///
/// ```ignore
/// use stepwise_core::openai::OpenAiChatProvider;
///
/// let provider = OpenAiChatProvider::from_env()?;
/// // or with custom endpoint
/// let provider = OpenAiChatProvider::with_base_url("your-api-key", "https://api.example.com/v1");
/// ```
#[derive(Clone)]
pub struct OpenAiChatProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiChatProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Custom base URL (everything before `/chat/completions`)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from `OPENAI_API_KEY` and optional `OPENAI_BASE_URL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RuntimeError::configuration("OPENAI_API_KEY environment variable not set"))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::with_base_url(api_key, base_url))
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl std::fmt::Debug for OpenAiChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    user: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

#[async_trait]
impl AiProvider for OpenAiChatProvider {
    async fn create_unified_response(
        &self,
        prompt: &str,
        settings: &AiSettings,
        context: &AiRequestContext,
    ) -> Result<AiResponse> {
        let model = settings.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            user: format!("{}:{}", context.tenant_id, context.user_id),
        };

        tracing::debug!(
            model,
            agent_id = %context.agent_id,
            module = %context.module_context,
            "Calling chat completion"
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RuntimeError::ai(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::ai(format!(
                "API error ({}): {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::ai(format!("invalid response body: {}", e)))?;

        let output = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content);

        Ok(AiResponse {
            success: output.is_some(),
            output,
            tokens_used: parsed.usage.and_then(|u| u.total_tokens),
            cost: None,
        })
    }
}
