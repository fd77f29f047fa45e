//! External AI gateway: text generation per configured provider, with a
//! per-provider cooldown.
//!
//! Callers pass the persisted provider settings on each call; the gateway
//! holds only volatile state (HTTP client + cooldown map). Calls are
//! instrumented and log model names, latencies, and response sizes (not
//! contents).
//!
//! NOTE: We never log API keys and we keep payload truncations short.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use crate::config::Prompts;
use crate::domain::{ProviderConfig, Settings};
use crate::error::GatewayError;

/// Minimum spacing between two calls to the same provider.
const COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default)]
pub struct GenerateOptions {
  pub max_tokens: Option<u32>,
  pub temperature: Option<f32>,
}

/// In-memory per-provider cooldown, keyed by provider id. The stamp happens
/// when a call starts, not when it completes, so caller cancellation or
/// timeouts cannot leave it half-updated. Resets on process restart.
struct Cooldowns {
  window: Duration,
  last_call: HashMap<String, Instant>,
}

impl Cooldowns {
  fn new(window: Duration) -> Self {
    Self { window, last_call: HashMap::new() }
  }

  /// Ok stamps the provider and commits to the call; Err carries the time
  /// remaining in the window.
  fn try_begin(&mut self, provider_id: &str, now: Instant) -> Result<(), Duration> {
    if let Some(last) = self.last_call.get(provider_id) {
      let elapsed = now.saturating_duration_since(*last);
      if elapsed < self.window {
        return Err(self.window - elapsed);
      }
    }
    self.last_call.insert(provider_id.to_string(), now);
    Ok(())
  }
}

pub struct Gateway {
  client: reqwest::Client,
  cooldowns: Mutex<Cooldowns>,
  tutor_system: String,
  openai_base_url: String,
}

impl Gateway {
  pub fn new(prompts: &Prompts) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .unwrap_or_default();
    // Override point for OpenAI-compatible relays, same knob the rest of
    // the config surface uses env vars for.
    let openai_base_url = std::env::var("OPENAI_BASE_URL")
      .unwrap_or_else(|_| "https://api.openai.com/v1".into());
    Self {
      client,
      cooldowns: Mutex::new(Cooldowns::new(COOLDOWN)),
      tutor_system: prompts.tutor_system.clone(),
      openai_base_url,
    }
  }

  /// Generate text with the given provider. Never required to succeed:
  /// every error here is recoverable and user-visible only.
  #[instrument(level = "info", skip(self, settings, prompt), fields(%provider_id, prompt_len = prompt.len()))]
  pub async fn generate(
    &self,
    settings: &Settings,
    provider_id: &str,
    prompt: &str,
    options: GenerateOptions,
  ) -> Result<String, GatewayError> {
    let Some(cfg) = settings.providers.get(provider_id) else {
      return Err(GatewayError::ProviderNotConfigured(provider_id.to_string()));
    };
    if !cfg.enabled || cfg.api_key.is_empty() {
      return Err(GatewayError::ProviderNotConfigured(provider_id.to_string()));
    }

    {
      let mut cooldowns = self.cooldowns.lock().await;
      cooldowns
        .try_begin(provider_id, Instant::now())
        .map_err(GatewayError::RateLimited)?;
    }

    let start = Instant::now();
    let result = match provider_id {
      "openai" => {
        let url = format!("{}/chat/completions", self.openai_base_url);
        self.chat_openai_style(&url, cfg, prompt, options).await
      }
      "perplexity" => {
        self
          .chat_openai_style("https://api.perplexity.ai/chat/completions", cfg, prompt, options)
          .await
      }
      "anthropic" => self.chat_anthropic(cfg, prompt, options).await,
      "google" => self.chat_google(cfg, prompt, options).await,
      other => Err(GatewayError::ProviderNotConfigured(other.to_string())),
    };
    let elapsed = start.elapsed();

    match &result {
      Ok(text) => {
        info!(?elapsed, model = %cfg.model, response_chars = text.len(), "Provider response received")
      }
      Err(e) => error!(?elapsed, model = %cfg.model, error = %e, "Provider request failed"),
    }
    result
  }

  /// OpenAI-style chat completion (openai, perplexity).
  async fn chat_openai_style(
    &self,
    url: &str,
    cfg: &ProviderConfig,
    prompt: &str,
    options: GenerateOptions,
  ) -> Result<String, GatewayError> {
    let req = ChatCompletionRequest {
      model: cfg.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: self.tutor_system.clone() },
        ChatMessageReq { role: "user".into(), content: prompt.into() },
      ],
      max_tokens: options.max_tokens.unwrap_or(500),
      temperature: options.temperature.unwrap_or(0.7),
    };

    let res = self
      .client
      .post(url)
      .header(USER_AGENT, "edudash-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", cfg.api_key))
      .json(&req)
      .send()
      .await
      .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

    if !res.status().is_success() {
      return Err(error_from_response(res).await);
    }

    let body: ChatCompletionResponse = res
      .json()
      .await
      .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Provider usage");
    }
    Ok(
      body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default()
        .trim()
        .to_string(),
    )
  }

  /// Anthropic messages API. The tutor framing is folded into the user turn.
  async fn chat_anthropic(
    &self,
    cfg: &ProviderConfig,
    prompt: &str,
    options: GenerateOptions,
  ) -> Result<String, GatewayError> {
    let req = AnthropicRequest {
      model: cfg.model.clone(),
      max_tokens: options.max_tokens.unwrap_or(500),
      messages: vec![ChatMessageReq {
        role: "user".into(),
        content: format!("{} {}", self.tutor_system, prompt),
      }],
    };

    let res = self
      .client
      .post("https://api.anthropic.com/v1/messages")
      .header(USER_AGENT, "edudash-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-api-key", cfg.api_key.clone())
      .header("anthropic-version", "2023-06-01")
      .json(&req)
      .send()
      .await
      .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

    if !res.status().is_success() {
      return Err(error_from_response(res).await);
    }

    let body: AnthropicResponse = res
      .json()
      .await
      .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;
    Ok(
      body
        .content
        .into_iter()
        .next()
        .map(|block| block.text)
        .unwrap_or_default()
        .trim()
        .to_string(),
    )
  }

  /// Google generateContent API. The key travels as a query parameter.
  async fn chat_google(
    &self,
    cfg: &ProviderConfig,
    prompt: &str,
    _options: GenerateOptions,
  ) -> Result<String, GatewayError> {
    let url = format!(
      "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
      cfg.model, cfg.api_key
    );
    let req = GoogleRequest {
      contents: vec![GoogleContent {
        parts: vec![GooglePart { text: format!("{} {}", self.tutor_system, prompt) }],
      }],
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "edudash-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(&req)
      .send()
      .await
      .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

    if !res.status().is_success() {
      return Err(error_from_response(res).await);
    }

    let body: GoogleResponse = res
      .json()
      .await
      .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;
    Ok(
      body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .unwrap_or_default()
        .trim()
        .to_string(),
    )
  }
}

async fn error_from_response(res: reqwest::Response) -> GatewayError {
  let status = res.status();
  let body = res.text().await.unwrap_or_default();
  let msg = extract_provider_error(&body).unwrap_or(body);
  GatewayError::RequestFailed(format!("HTTP {}: {}", status, msg))
}

/// Try to extract a clean message from a provider error body; all four
/// providers use the `{"error": {"message": ...}}` envelope.
fn extract_provider_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

// --- Wire DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  max_tokens: u32,
  temperature: f32,
}
#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

#[derive(Serialize)]
struct AnthropicRequest {
  model: String,
  max_tokens: u32,
  messages: Vec<ChatMessageReq>,
}
#[derive(Deserialize)]
struct AnthropicResponse {
  content: Vec<AnthropicBlock>,
}
#[derive(Deserialize)]
struct AnthropicBlock {
  text: String,
}

#[derive(Serialize)]
struct GoogleRequest {
  contents: Vec<GoogleContent>,
}
#[derive(Serialize)]
struct GoogleContent {
  parts: Vec<GooglePart>,
}
#[derive(Serialize, Deserialize)]
struct GooglePart {
  text: String,
}
#[derive(Deserialize)]
struct GoogleResponse {
  candidates: Vec<GoogleCandidate>,
}
#[derive(Deserialize)]
struct GoogleCandidate {
  content: GoogleCandidateContent,
}
#[derive(Deserialize)]
struct GoogleCandidateContent {
  parts: Vec<GooglePart>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cooldown_denies_within_window_then_allows() {
    let mut cooldowns = Cooldowns::new(Duration::from_secs(5));
    let t0 = Instant::now();

    assert!(cooldowns.try_begin("openai", t0).is_ok());

    let remaining = cooldowns
      .try_begin("openai", t0 + Duration::from_secs(2))
      .unwrap_err();
    assert_eq!(remaining, Duration::from_secs(3));

    assert!(cooldowns.try_begin("openai", t0 + Duration::from_secs(5)).is_ok());
  }

  #[test]
  fn cooldown_is_keyed_by_provider() {
    let mut cooldowns = Cooldowns::new(Duration::from_secs(5));
    let t0 = Instant::now();
    assert!(cooldowns.try_begin("openai", t0).is_ok());
    assert!(cooldowns.try_begin("anthropic", t0).is_ok());
    assert!(cooldowns.try_begin("openai", t0 + Duration::from_secs(1)).is_err());
  }

  #[tokio::test]
  async fn disabled_or_unknown_providers_are_not_configured() {
    let gateway = Gateway::new(&Prompts::default());
    let settings = Settings::default(); // all providers disabled, no keys

    let err = gateway
      .generate(&settings, "openai", "hello", GenerateOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, GatewayError::ProviderNotConfigured(_)));

    let err = gateway
      .generate(&settings, "mistral", "hello", GenerateOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, GatewayError::ProviderNotConfigured(_)));
  }

  #[tokio::test]
  async fn cooldown_applies_before_the_request_goes_out() {
    let gateway = Gateway::new(&Prompts::default());
    let mut settings = Settings::default();
    if let Some(cfg) = settings.providers.get_mut("openai") {
      cfg.enabled = true;
      cfg.api_key = "test-key".into();
    }

    // Stamp the cooldown directly, as a just-started call would.
    {
      let mut cooldowns = gateway.cooldowns.lock().await;
      cooldowns.try_begin("openai", Instant::now()).expect("first call stamps");
    }

    let err = gateway
      .generate(&settings, "openai", "hello", GenerateOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited(_)));
  }
}
