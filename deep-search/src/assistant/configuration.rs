use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::error::ConfigurationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ModelProvider {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "remote")]
    Remote,
}

impl Default for ModelProvider {
    fn default() -> Self {
        ModelProvider::Remote
    }
}

/// Model parameters passed with every `generate` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub model_provider: ModelProvider,
    pub groq_api_key: Option<String>,
    #[serde(default = "default_groq_model")]
    pub groq_model: String,
    #[serde(default = "default_groq_base_url")]
    pub groq_base_url: String,
    #[serde(default = "default_local_llm")]
    pub local_llm: String,
    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,
    #[serde(default = "default_ollama_port")]
    pub ollama_port: u16,
    pub report_model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_query_count")]
    pub query_count: usize,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default = "default_max_encyclopedia_results")]
    pub max_encyclopedia_results: usize,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_max_extractions")]
    pub max_extractions: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    pub system_instruction: Option<String>,
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
}

fn default_groq_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_groq_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_local_llm() -> String {
    "deepseek-r1:8b".to_string()
}

fn default_ollama_host() -> String {
    "http://localhost".to_string()
}

fn default_ollama_port() -> u16 {
    11434
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_query_count() -> usize {
    5
}

fn default_max_search_results() -> usize {
    5
}

fn default_max_encyclopedia_results() -> usize {
    3
}

fn default_max_content_length() -> usize {
    4000
}

fn default_max_extractions() -> usize {
    20
}

fn default_concurrency() -> usize {
    4
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_server_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            model_provider: ModelProvider::default(),
            groq_api_key: None,
            groq_model: default_groq_model(),
            groq_base_url: default_groq_base_url(),
            local_llm: default_local_llm(),
            ollama_host: default_ollama_host(),
            ollama_port: default_ollama_port(),
            report_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            query_count: default_query_count(),
            max_search_results: default_max_search_results(),
            max_encyclopedia_results: default_max_encyclopedia_results(),
            max_content_length: default_max_content_length(),
            max_extractions: default_max_extractions(),
            concurrency: default_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
            system_instruction: None,
            server_addr: default_server_addr(),
        }
    }
}

impl Configuration {
    /// Reads the process environment. Call `crate::init` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let model_provider = match get("MODEL_PROVIDER").as_deref() {
            None | Some("remote") => ModelProvider::Remote,
            Some("local") => ModelProvider::Local,
            Some(other) => {
                return Err(ConfigurationError::InvalidValue {
                    key: "MODEL_PROVIDER".to_string(),
                    value: other.to_string(),
                    reason: "expected `local` or `remote`".to_string(),
                })
            }
        };

        let config = Configuration {
            model_provider,
            groq_api_key: get("GROQ_API_KEY"),
            groq_model: get("GROQ_MODEL").unwrap_or(defaults.groq_model),
            groq_base_url: get("GROQ_BASE_URL").unwrap_or(defaults.groq_base_url),
            local_llm: get("LOCAL_LLM").unwrap_or(defaults.local_llm),
            ollama_host: get("OLLAMA_HOST").unwrap_or(defaults.ollama_host),
            ollama_port: parse_or(&get, "OLLAMA_PORT", defaults.ollama_port)?,
            report_model: get("REPORT_MODEL"),
            temperature: parse_or(&get, "TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_or(&get, "MAX_TOKENS", defaults.max_tokens)?,
            query_count: parse_or(&get, "QUERY_COUNT", defaults.query_count)?,
            max_search_results: parse_or(&get, "MAX_SEARCH_RESULTS", defaults.max_search_results)?,
            max_encyclopedia_results: parse_or(
                &get,
                "MAX_ENCYCLOPEDIA_RESULTS",
                defaults.max_encyclopedia_results,
            )?,
            max_content_length: parse_or(&get, "MAX_CONTENT_LENGTH", defaults.max_content_length)?,
            max_extractions: parse_or(&get, "MAX_EXTRACTIONS", defaults.max_extractions)?,
            concurrency: parse_or(&get, "CONCURRENCY", defaults.concurrency)?,
            call_timeout_secs: parse_or(&get, "CALL_TIMEOUT_SECS", defaults.call_timeout_secs)?,
            system_instruction: get("SYSTEM_INSTRUCTION"),
            server_addr: get("SERVER_ADDR").unwrap_or(defaults.server_addr),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the credential and the numeric bounds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.model_provider == ModelProvider::Remote
            && self.groq_api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(ConfigurationError::MissingCredential {
                key: "GROQ_API_KEY".to_string(),
            });
        }

        let non_zero = [
            ("QUERY_COUNT", self.query_count as u64),
            ("MAX_SEARCH_RESULTS", self.max_search_results as u64),
            ("MAX_ENCYCLOPEDIA_RESULTS", self.max_encyclopedia_results as u64),
            ("MAX_CONTENT_LENGTH", self.max_content_length as u64),
            ("MAX_EXTRACTIONS", self.max_extractions as u64),
            ("CONCURRENCY", self.concurrency as u64),
            ("CALL_TIMEOUT_SECS", self.call_timeout_secs),
            ("MAX_TOKENS", self.max_tokens as u64),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigurationError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigurationError::InvalidValue {
                key: "TEMPERATURE".to_string(),
                value: self.temperature.to_string(),
                reason: "must be between 0.0 and 2.0".to_string(),
            });
        }

        Ok(())
    }

    pub fn planning_model(&self) -> &str {
        match self.model_provider {
            ModelProvider::Local => &self.local_llm,
            ModelProvider::Remote => &self.groq_model,
        }
    }

    pub fn report_model(&self) -> &str {
        self.report_model.as_deref().unwrap_or_else(|| self.planning_model())
    }

    /// Parameters for query planning.
    pub fn planning_generation(&self) -> GenerationConfig {
        GenerationConfig {
            model_name: self.planning_model().to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Parameters for report synthesis and follow-up chat.
    pub fn report_generation(&self) -> GenerationConfig {
        GenerationConfig {
            model_name: self.report_model().to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigurationError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
