//! Error types for each stage of the crawl.
//!
//! Only [`PipelineError`] ever aborts a run. Listing and extraction failures are
//! folded into sentinel values at their component boundary, and a duplicate key
//! on insert is an [`InsertOutcome`](crate::storage::InsertOutcome), not an error.

use thiserror::Error;

/// Failure of a single outbound request before any status code was received.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Why an article could not be extracted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Timeout")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("no usable article text or title")]
    Parse,
}

impl From<FetchError> for ExtractError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout => ExtractError::Timeout,
            FetchError::Transport(msg) => ExtractError::Transport(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint at {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not replace checkpoint {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: tempfile::PersistError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown built-in site '{0}'")]
    UnknownSite(String),
    #[error("could not read site file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid site descriptor: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid regex '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid CSS selector '{0}'")]
    Selector(String),
    #[error("invalid base url '{0}'")]
    BaseUrl(String),
    #[error("invalid archive unit '{value}': {reason}")]
    Unit { value: String, reason: String },
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("translator returned {got} texts for a batch of {expected}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("translator error: {0}")]
    Backend(String),
}

/// Errors that end a crawl or translation run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
