//! Typed errors for the ingestion core library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on error kind instead of inspecting strings.

use thiserror::Error;

/// Errors from URL normalization.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("url parse error: {0}")]
    Parse(#[from] url::ParseError),

    #[error("disallowed scheme: {0}")]
    DisallowedScheme(String),

    #[error("url has no host")]
    NoHost,
}

/// Errors from the dedupe engine.
#[derive(Debug, Error)]
pub enum DedupeError {
    #[error("unknown run: {run_id}")]
    UnknownRun { run_id: String },

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the pluggable search client.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("run_id is required")]
    MissingRunId,

    #[error("search request failed: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("search returned an unexpected payload shape")]
    MalformedResponse,

    #[error("{provider} api key is not configured")]
    MissingApiKey { provider: &'static str },
}

/// Errors from the URL resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("url is required")]
    EmptyUrl,

    #[error("resolve request failed: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("resolve request timed out: {url}")]
    Timeout { url: String },
}

/// Errors from HTML fetch and visible-text extraction.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch request failed: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("io error writing raw html: {0}")]
    Io(#[from] std::io::Error),

    #[error("extract failed: {reason}")]
    Extract { reason: String },
}

/// Errors from the pluggable model trait.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model class: {class_name}")]
    UnknownClass { class_name: String },

    #[error("fit failed: {0}")]
    Fit(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("predict failed: {0}")]
    Predict(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type NormalizeResult<T> = std::result::Result<T, NormalizeError>;
pub type DedupeResult<T> = std::result::Result<T, DedupeError>;
pub type SearchResult<T> = std::result::Result<T, SearchError>;
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
pub type FetchResult<T> = std::result::Result<T, FetchError>;
pub type ModelResult<T> = std::result::Result<T, ModelError>;
