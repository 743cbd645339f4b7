use thiserror::Error;

/// Why a single source fetch produced no payload.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("failed to parse feed: {0}")]
    Feed(#[from] feed_rs::parser::ParseFeedError),

    #[error("{0}")]
    Source(String),

    #[error("task panicked")]
    Panicked,

    #[error("cancelled before completion")]
    Cancelled,
}

/// Failure of one call to the completion service.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("no candidates in response")]
    NoCandidates,

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}
