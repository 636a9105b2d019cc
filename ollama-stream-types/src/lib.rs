//! Shared wire types for the Ollama streaming client.

pub mod chat;
pub mod generate;
