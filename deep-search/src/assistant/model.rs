use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::configuration::{Configuration, GenerationConfig, ModelProvider};
use super::error::{ConfigurationError, ModelError};

/// The single capability every pipeline stage needs from a language model.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, ModelError>;
}

/// OpenAI-compatible chat completions client (Groq by default).
pub struct GroqClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GroqClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl GenerativeModel for GroqClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, ModelError> {
        debug!(model = %config.model_name, prompt_chars = prompt.len(), "calling chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": config.model_name,
                "messages": [
                    {
                        "role": "user",
                        "content": prompt
                    }
                ],
                "temperature": config.temperature,
                "max_tokens": config.max_tokens
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelError::MalformedResponse("missing choices[0].message.content".to_string()))?;

        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(content.to_string())
    }
}

/// Local model served by Ollama.
pub struct OllamaModel {
    ollama: Ollama,
}

impl OllamaModel {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            ollama: Ollama::new(host, port),
        }
    }
}

#[async_trait]
impl GenerativeModel for OllamaModel {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, ModelError> {
        debug!(model = %config.model_name, prompt_chars = prompt.len(), "calling ollama");

        let options = GenerationOptions::default()
            .temperature(config.temperature)
            .num_predict(config.max_tokens as i32);
        let request = GenerationRequest::new(config.model_name.clone(), prompt.to_string()).options(options);

        let response = self
            .ollama
            .generate(request)
            .await
            .map_err(|e| ModelError::Request(format!("Ollama request failed: {}", e)))?
            .response;

        if response.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(response)
    }
}

/// Picks the backend named by the configuration.
pub fn build_model(config: &Configuration) -> Result<Arc<dyn GenerativeModel>, ConfigurationError> {
    match config.model_provider {
        ModelProvider::Local => Ok(Arc::new(OllamaModel::new(
            config.ollama_host.clone(),
            config.ollama_port,
        ))),
        ModelProvider::Remote => {
            let api_key = config
                .groq_api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ConfigurationError::MissingCredential {
                    key: "GROQ_API_KEY".to_string(),
                })?;
            Ok(Arc::new(GroqClient::new(api_key, config.groq_base_url.clone())))
        }
    }
}
