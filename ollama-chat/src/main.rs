mod app;

use anyhow::{Context, Result};
use clap::Parser;
use ollama_stream::types::generate::GenerationOptions;
use ollama_stream::{ChatSession, Client};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Chat with an Ollama server from the terminal", long_about = None)]
struct Cli {
    /// Base URL of the Ollama server
    #[arg(long, env = "OLLAMA_BASE_URL")]
    base_url: Option<String>,

    /// Model used for generation
    #[arg(short, long, env = "OLLAMA_MODEL")]
    model: Option<String>,

    /// Context window size sent as options.num_ctx
    #[arg(long)]
    num_ctx: Option<u64>,

    /// Request timeout in seconds, covering the whole streamed response
    #[arg(long)]
    timeout: Option<u64>,
}

impl Cli {
    fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(base_url) = self.base_url.as_deref().filter(|url| !url.trim().is_empty()) {
            builder = builder.base_url(base_url);
        }
        if let Some(model) = &self.model {
            builder = builder.model(model.trim());
        }
        if let Some(num_ctx) = self.num_ctx {
            builder = builder.default_options(GenerationOptions::with_defaults().num_ctx(num_ctx));
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = cli.build_client().context("failed to configure client")?;
    tracing::debug!(base_url = %client.config().base_url, model = %client.config().model, "starting chat");

    app::run(ChatSession::new(client)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cli_overrides_reach_client_config() {
        let cli = Cli::try_parse_from([
            "ollama-chat",
            "--base-url",
            "http://localhost:11434/",
            "--model",
            "phi3",
            "--num-ctx",
            "8192",
        ])
        .unwrap();
        let client = cli.build_client().unwrap();
        assert_eq!(client.config().base_url, "http://localhost:11434");
        assert_eq!(client.config().model, "phi3");
        assert_eq!(
            client.config().default_options.get("num_ctx"),
            Some(&json!(8192))
        );
    }

    #[test]
    fn blank_base_url_falls_back_to_default() {
        let cli = Cli::try_parse_from(["ollama-chat", "--base-url", " "]).unwrap();
        let client = cli.build_client().unwrap();
        assert_eq!(client.config().base_url, ollama_stream::DEFAULT_BASE_URL);
    }

    #[test]
    fn invalid_timeout_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["ollama-chat", "--timeout", "soon"]).is_err());
    }
}
