//! Crate-wide error type.
//!
//! Rate-limit rejections are a distinct kind so the backoff layer can retry
//! them while letting every other failure propagate untouched.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Backend answered 429 (or an equivalent marker).
    #[error("rate limited (429): {label}")]
    RateLimited { label: String },

    #[error("http {status} from {label}")]
    Http { status: u16, label: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("graphql error: {0}")]
    GraphQl(String),

    #[error("dry-run error: {0}")]
    DryRun(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[cfg(feature = "native")]
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Worker or channel went away before answering.
    #[error("channel closed")]
    Closed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True when the failure is eligible for backoff-retry.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::RateLimited { .. } => true,
            Error::Http { status, .. } => *status == 429,
            Error::Transport(e) => e.status().map(|s| s.as_u16() == 429).unwrap_or(false),
            // Some backends only surface the status inside the message body
            Error::GraphQl(msg) | Error::DryRun(msg) => msg.contains("429"),
            _ => false,
        }
    }

    pub fn rate_limited(label: impl Into<String>) -> Self {
        Error::RateLimited {
            label: label.into(),
        }
    }

    /// Map a non-success HTTP status into the matching error kind.
    pub fn from_status(status: u16, label: impl Into<String>) -> Self {
        let label = label.into();
        if status == 429 {
            Error::RateLimited { label }
        } else {
            Error::Http { status, label }
        }
    }
}
