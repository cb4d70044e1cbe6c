use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with the process configuration. Raised before any run starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("{key} is not set - add it to your environment or .env file")]
    MissingCredential { key: String },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("could not initialise HTTP client: {0}")]
    HttpClient(String),
}

/// A generative-model call that did not produce usable text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model response could not be read: {0}")]
    MalformedResponse(String),

    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Request(err.to_string())
    }
}

/// Search or lookup failure. Connectors absorb these into empty results.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("search provider returned {0}")]
    Status(u16),

    #[error("could not parse provider response: {0}")]
    Parse(String),
}

/// Fetch or cleaning failure. Absorbed into a `Failed` document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("fetch failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("page contained no extractable text")]
    NoContent,

    #[error("fetch timed out after {0}s")]
    Timeout(u64),
}

/// Why a research run ended in the `Failed` phase.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("research topic is empty")]
    InvalidTopic,

    #[error("model unreachable: {0}")]
    ModelUnavailable(String),

    #[error("no search queries could be planned")]
    NoQueries,

    #[error("no usable content retrieved")]
    NoUsableContent,

    #[error("research was cancelled")]
    Cancelled,
}

/// A follow-up question that could not be answered. The session is untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChatError {
    #[error("research has no report to discuss")]
    NoReport,

    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Model(#[from] ModelError),
}
