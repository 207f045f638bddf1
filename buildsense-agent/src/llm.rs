use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rig::client::CompletionClient;

use buildsense_core::config::ProviderConfig;
use buildsense_core::error::{ConfigError, ProviderError};

/// Abstraction over the external reasoning provider. One call, one raw
/// text response; structure is checked by the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &str;

    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// An LlmClient implementation that wraps a rig CompletionModel.
pub struct RigLlmClient<M: rig::completion::CompletionModel> {
    provider: String,
    model: M,
}

impl<M: rig::completion::CompletionModel> RigLlmClient<M> {
    pub fn new(provider: impl Into<String>, model: M) -> Self {
        Self {
            provider: provider.into(),
            model,
        }
    }
}

#[async_trait]
impl<M> LlmClient for RigLlmClient<M>
where
    M: rig::completion::CompletionModel + Send + Sync + 'static,
    M::Response: Send + Sync,
{
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = self
            .model
            .completion_request(prompt.to_string())
            .preamble(system_prompt.to_string())
            .temperature(0.1)
            .build();

        let response = self
            .model
            .completion(request)
            .await
            .map_err(|e| ProviderError::Transport {
                provider: self.provider.clone(),
                message: truncate_debug(&e.to_string(), 500),
            })?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                rig::message::AssistantContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect();

        if text.trim().is_empty() {
            return Err(ProviderError::malformed("response carried no text content"));
        }
        Ok(text)
    }
}

fn truncate_debug(value: &str, max_chars: usize) -> String {
    let char_count = value.chars().count();
    if char_count <= max_chars {
        return value.to_string();
    }
    let truncated: String = value.chars().take(max_chars).collect();
    format!("{}...(+{} chars)", truncated, char_count - max_chars)
}

/// Build the provider client described by `config`.
///
/// `Ok(None)` means reasoning is unavailable (provider `"none"` or a missing
/// API key) and every agent runs on its rule set.
pub fn build_llm_client<F>(
    config: &ProviderConfig,
    env: F,
) -> Result<Option<Arc<dyn LlmClient>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match config.provider.as_str() {
        "none" => Ok(None),
        "mock" => Ok(Some(Arc::new(MockLlmClient::default()))),
        provider => {
            let env_var = resolve_api_key_env_var(provider);
            let Some(key) = env(&env_var).filter(|key| !key.trim().is_empty()) else {
                tracing::warn!(
                    provider,
                    env_var = %env_var,
                    "provider_api_key_missing"
                );
                return Ok(None);
            };

            let base_url = config
                .base_url
                .as_deref()
                .or_else(|| default_base_url(provider));

            let client: Result<rig::providers::openai::Client, std::convert::Infallible> =
                if let Some(url) = base_url {
                    Ok(rig::providers::openai::Client::builder(&key)
                        .base_url(url)
                        .build())
                } else if provider == "openai" {
                    Ok(rig::providers::openai::Client::new(&key))
                } else {
                    return Err(ConfigError::Invalid(format!(
                        "provider '{provider}' requires provider.base_url"
                    )));
                };

            let client = client.map_err(|e| {
                ConfigError::Invalid(format!("failed to create LLM client: {e}"))
            })?;

            Ok(Some(Arc::new(RigLlmClient::new(
                provider,
                client.completion_model(&config.model).completions_api(),
            ))))
        }
    }
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "gemini" | "google" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "xai" => Some("https://api.x.ai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        _ => None,
    }
}

fn resolve_api_key_env_var(provider: &str) -> String {
    match provider {
        "gemini" | "google" => "GEMINI_API_KEY".into(),
        other => format!("{}_API_KEY", other.to_ascii_uppercase().replace('-', "_")),
    }
}

/// Valid response with no actions, returned once a mock runs out of script.
pub const MOCK_IDLE_RESPONSE: &str = r#"{
  "actions": [],
  "scores": {"comfort": 0.8, "energy": 0.8, "reliability": 0.9, "security": 0.8},
  "reasoning": "Room is within its targets; no change needed.",
  "confidence": 0.6
}"#;

/// A scripted LLM client for testing and for the `mock` provider.
#[derive(Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _system_prompt: &str, prompt: &str) -> Result<String, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_string());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        next.unwrap_or_else(|| Ok(MOCK_IDLE_RESPONSE.to_string()))
    }
}
