//! Text completion transport.
//!
//! Policies, reward models and thought generators only see the
//! [`Completion`] trait: text in, text out. A completion never fails from
//! the caller's point of view; transport problems come back as an
//! `"Error: ..."` string that the downstream parsers treat like any other
//! unhelpful reply.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, instrument};

use crate::config::LlmConfig;
use crate::error::{AgentError, Result};

/// System prompt for general use.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant driving an information retrieval agent.\n\
Your role is to help users find and process information effectively and accurately.";

/// System prompt for thought generation.
pub const THOUGHT_SYSTEM_PROMPT: &str = "You are generating thoughts for an AI agent.\n\
Your role is to explore ideas, analyze information, and suggest possible approaches to solve the user's query.\n\
Be thorough, analytical, and creative in your thinking process.";

/// System prompt for action selection.
pub const POLICY_SYSTEM_PROMPT: &str = "You are determining the next action for an AI agent.\n\
Your role is to select the most appropriate action based on the current state and thoughts.\n\
Consider the available tools, the user's query, and the information collected so far.";

// ---------------------------------------------------------------------------
// Completion trait
// ---------------------------------------------------------------------------

/// An opaque, possibly slow, possibly unreliable text generator.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> String;
}

/// Adapts a plain closure into a [`Completion`].
pub struct FnCompletion<F> {
    f: F,
}

impl<F> FnCompletion<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Completion for FnCompletion<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    async fn complete(&self, prompt: &str) -> String {
        (self.f)(prompt)
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Non-streaming client for Ollama's `/api/generate`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    system_prompt: Option<String>,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        debug!(base_url = %config.base_url, model = %config.model, "ollama client created");

        Ok(Self {
            http,
            endpoint: format!("{}/api/generate", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// Replace the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `/api/generate` reads sampling settings only from `options`.
    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        if let Some(system) = &self.system_prompt {
            body["system"] = Value::String(system.clone());
        }
        body
    }

    /// Send one prompt and return the generated text.
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        parse_generate_response(&text)
    }
}

fn parse_generate_response(text: &str) -> Result<String> {
    let v: Value = serde_json::from_str(text).map_err(|e| AgentError::LlmRequestFailed {
        reason: format!("invalid JSON response: {e}"),
    })?;

    if let Some(err) = v["error"].as_str().filter(|e| !e.is_empty()) {
        return Err(AgentError::LlmRequestFailed {
            reason: err.to_owned(),
        });
    }

    Ok(v["response"].as_str().unwrap_or_default().to_owned())
}

#[async_trait]
impl Completion for OllamaClient {
    async fn complete(&self, prompt: &str) -> String {
        match self.generate(prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "completion failed");
                format!("Error: {e}")
            }
        }
    }
}
