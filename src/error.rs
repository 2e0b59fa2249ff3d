//! Error types for the harvesting pipeline
//!
//! None of these escape a cycle. The orchestrators turn each variant into a
//! log line, a dropped entry, or a persisted `alive`/`error_message` state.

use thiserror::Error;

/// Failure to turn one raw feed line into text
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Reasons a candidate entry is not a usable Shadowsocks URI
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("not a Shadowsocks entry")]
    NotShadowsocks,

    #[error("invalid percent encoding: {0}")]
    Percent(std::string::FromUtf8Error),

    #[error("invalid base64 credentials: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("credentials are not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("missing method:password credentials")]
    MissingCredentials,

    #[error("invalid cipher method: {0}")]
    InvalidMethod(String),

    #[error("invalid host:port: {0}")]
    InvalidAddress(String),
}

/// Feed-level failure while polling a subscription
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("We are facing issues getting this subscription {url} ({status} {body})")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("Error decoding subscription {url}, {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },
}

/// Store write and read failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("url {url} is already stored")]
    Conflict { url: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
