//! OpenRouter chat-completions client.
//!
//! Implements [`CompletionService`] over `POST <base_url>/chat/completions`.
//! The reply text is handed back untouched: fence stripping, double-decoding
//! and field recovery all happen in `bulletin-core`.

use std::time::Duration;

use bulletin_shared::{
    BulletinError, CompletionRequest, CompletionService, OpenRouterConfig, ResponseFormat, Result,
    read_secret,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("bulletin/", env!("CARGO_PKG_VERSION"));

/// Application name reported to OpenRouter.
const APP_TITLE: &str = "bulletin";

/// How much of an error body is kept in error messages.
const ERROR_BODY_LIMIT: usize = 300;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

// ---------------------------------------------------------------------------
// OpenRouterClient
// ---------------------------------------------------------------------------

/// A [`CompletionService`] backed by OpenRouter.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenRouterClient {
    /// Create a client. Without a key the client reports itself unconfigured
    /// and refuses to send anything.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BulletinError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Build from the `[openrouter]` section, reading the key from the
    /// environment variable it names.
    pub fn from_config(config: &OpenRouterConfig) -> Result<Self> {
        let api_key = read_secret(&config.api_key_env);
        if api_key.is_none() {
            debug!(var = %config.api_key_env, "no OpenRouter API key in environment");
        }
        Self::new(&config.base_url, &config.model, api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl CompletionService for OpenRouterClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    #[instrument(skip_all, fields(model = %self.model, max_tokens = request.max_tokens))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            BulletinError::config("OpenRouter API key is not configured")
        })?;

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: match request.response_format {
                ResponseFormat::JsonObject => Some(WireFormat {
                    kind: "json_object",
                }),
                ResponseFormat::Text => None,
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("X-Title", APP_TITLE)
            .json(&body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(request.timeout, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(request.timeout, e))?;

        if !status.is_success() {
            warn!(%status, "completion request rejected");
            return Err(BulletinError::Network(format!(
                "{url}: HTTP {status}: {}",
                truncate(&text, ERROR_BODY_LIMIT)
            )));
        }

        debug!(bytes = text.len(), "completion received");
        extract_content(&text)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pull `choices[0].message.content` out of a response body.
///
/// String content is returned verbatim; any other JSON value is returned as
/// its serialisation.
fn extract_content(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        BulletinError::Completion(format!(
            "response is not a chat completion ({e}): {}",
            truncate(body, ERROR_BODY_LIMIT)
        ))
    })?;

    let Some(choice) = parsed.choices.into_iter().next() else {
        let reason = parsed
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "no choices in response".into());
        return Err(BulletinError::Completion(reason));
    };

    match choice.message.content {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Null => Err(BulletinError::Completion(
            "choice has no message content".into(),
        )),
        other => Ok(other.to_string()),
    }
}

fn transport_error(timeout: Option<Duration>, e: reqwest::Error) -> BulletinError {
    if e.is_timeout() {
        let after = timeout.map(|t| format!(" after {}s", t.as_secs())).unwrap_or_default();
        BulletinError::Timeout(format!("completion request timed out{after}"))
    } else {
        BulletinError::Network(format!("completion request failed: {e}"))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
