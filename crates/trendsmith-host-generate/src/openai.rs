//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};
use trendsmith_config::GenerationConfig;

use crate::error::GenerationError;
use crate::generator::{GenerationConstraints, TextGenerator};

pub struct OpenAiClient {
  client: Client,
  base_url: String,
  model: String,
  api_key: Option<String>,
}

impl OpenAiClient {
  pub fn new(
    base_url: impl Into<String>,
    model: impl Into<String>,
    timeout: Duration,
  ) -> Result<Self, GenerationError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| GenerationError::Request(e.to_string()))?;

    Ok(Self {
      client,
      base_url: base_url.into().trim_end_matches('/').to_string(),
      model: model.into(),
      api_key: None,
    })
  }

  /// Build from configuration, reading the key from `api_key_env`.
  pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
    let client = Self::new(
      config.base_url.clone(),
      config.model.clone(),
      Duration::from_millis(config.timeout_ms),
    )?;
    Ok(match std::env::var(&config.api_key_env) {
      Ok(key) if !key.is_empty() => client.with_api_key(key),
      _ => client,
    })
  }

  pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
    self.api_key = Some(key.into());
    self
  }

  pub fn model(&self) -> &str {
    &self.model
  }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  max_tokens: u32,
  temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
  content: Option<String>,
}

/// Pull the first choice's text out of a chat completions body.
pub fn parse_chat_response(body: &str) -> Result<String, GenerationError> {
  let response: ChatResponse =
    serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;

  let content = response
    .choices
    .into_iter()
    .next()
    .and_then(|choice| choice.message.content)
    .ok_or_else(|| GenerationError::Malformed("response has no message content".to_string()))?;

  if content.trim().is_empty() {
    return Err(GenerationError::Malformed("empty message content".to_string()));
  }
  Ok(content)
}

fn status_error(status: u16, body: String) -> GenerationError {
  match status {
    401 | 403 => GenerationError::Auth(body),
    402 | 429 => GenerationError::Quota(body),
    _ if body.contains("insufficient_quota") => GenerationError::Quota(body),
    _ => GenerationError::Request(format!("{}: {}", status, body)),
  }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
  #[instrument(skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
  async fn generate(
    &self,
    prompt: &str,
    constraints: &GenerationConstraints,
  ) -> Result<String, GenerationError> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &constraints.system {
      messages.push(ChatMessage {
        role: "system",
        content: system,
      });
    }
    messages.push(ChatMessage {
      role: "user",
      content: prompt,
    });

    let body = ChatRequest {
      model: &self.model,
      messages,
      max_tokens: constraints.max_tokens,
      temperature: constraints.temperature,
    };

    let mut request = self
      .client
      .post(format!("{}/chat/completions", self.base_url))
      .json(&body);
    if let Some(key) = &self.api_key {
      request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| {
      if e.is_timeout() {
        GenerationError::Timeout
      } else {
        GenerationError::Request(e.to_string())
      }
    })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| {
      if e.is_timeout() {
        GenerationError::Timeout
      } else {
        GenerationError::Malformed(e.to_string())
      }
    })?;

    if !status.is_success() {
      error!(status = status.as_u16(), "generation_request_failed");
      return Err(status_error(status.as_u16(), text));
    }

    let content = parse_chat_response(&text)?;
    debug!(reply_bytes = content.len(), "generation_completed");
    Ok(content)
  }
}
