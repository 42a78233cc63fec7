//! Chat model backends for the code auditor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::AuditModelConfig;
use crate::exploits::truncate;

/// Token variable consulted when the configured one is unset.
const FALLBACK_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("model response carried no message content")]
    EmptyResponse,
}

/// A model that reviews source code and answers in free text.
#[async_trait]
pub trait AuditModel: Send + Sync {
    /// `None` when the model is switched off.
    fn name(&self) -> Option<&str>;

    async fn review(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Placeholder used when no token is configured.
pub struct DisabledModel;

#[async_trait]
impl AuditModel for DisabledModel {
    fn name(&self) -> Option<&str> {
        None
    }

    async fn review(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::EmptyResponse)
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletionsModel {
    client: Client,
    endpoint: String,
    model: String,
    token: String,
    max_tokens: u32,
}

impl ChatCompletionsModel {
    pub fn new(config: &AuditModelConfig, token: String) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            token,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl AuditModel for ChatCompletionsModel {
    fn name(&self) -> Option<&str> {
        Some(&self.model)
    }

    async fn review(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
            "temperature": 0.0,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %truncate(&body, 500),
                "model endpoint rejected the request"
            );
            return Err(ModelError::Status {
                status: status.as_u16(),
            });
        }

        let reply: serde_json::Value = response.json().await?;
        reply["choices"][0]["message"]["content"]
            .as_str()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .ok_or(ModelError::EmptyResponse)
    }
}

/// Builds the configured model, or [`DisabledModel`] when no token is set.
pub fn from_config(config: &AuditModelConfig) -> Arc<dyn AuditModel> {
    let token = std::env::var(&config.token_env)
        .or_else(|_| std::env::var(FALLBACK_TOKEN_ENV))
        .ok()
        .filter(|t| !t.trim().is_empty());

    let Some(token) = token else {
        tracing::info!(env = %config.token_env, "no model token set; model review disabled");
        return Arc::new(DisabledModel);
    };

    match ChatCompletionsModel::new(config, token) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build model client; model review disabled");
            Arc::new(DisabledModel)
        }
    }
}
