//! Streaming client for the Ollama generate API.

pub mod chat;
pub mod client;
pub mod error;
pub mod generate;
pub mod ndjson;
pub mod stream;

#[cfg(test)]
mod test_support;

pub use ollama_stream_types as types;

pub use chat::ChatSession;
pub use client::{Client, ClientBuilder, ClientConfig, HttpOptions, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use error::{Error, Result};
pub use generate::{GenerationRequest, Generations};
pub use stream::{GenerateEvent, GenerateStream};
pub use tokio_util::sync::CancellationToken;
