//! Error definitions for the client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP client error: {source}")]
    HttpClient {
        #[from]
        source: reqwest::Error,
    },

    #[error("Request failed: {status} {status_text}")]
    RequestFailed { status: u16, status_text: String },

    #[error("Stream failed: {source}")]
    StreamFailed { source: reqwest::Error },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("A generation is already in progress")]
    Busy,
}

pub type Result<T> = std::result::Result<T, Error>;
