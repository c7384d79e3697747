use super::models::Usage;
use super::{ChatBackend, ChatPrompt, Completion};
use crate::config::OracleSettings;
use crate::error::OracleError;
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(settings: &OracleSettings, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key,
        })
    }

    fn map_transport_error(err: reqwest::Error) -> OracleError {
        if err.is_timeout() {
            OracleError::Transport("request timed out".to_string())
        } else if err.is_connect() {
            OracleError::Transport(format!("could not connect: {}", err))
        } else {
            OracleError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl ChatBackend for HttpOracle {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<Completion, OracleError> {
        let api_key = self.api_key.as_deref().ok_or(OracleError::MissingCredential)?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = prompt.system.as_deref() {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &prompt.user,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(prompt.timeout)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(Self::map_transport_error)?;

        if !status.is_success() {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: sanitize_api_response(&text),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            OracleError::Decode(format!("{}: {}", e, sanitize_api_response(&text)))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(OracleError::EmptyResponse);
        }

        Ok(Completion {
            content,
            usage: parsed.usage,
        })
    }
}
