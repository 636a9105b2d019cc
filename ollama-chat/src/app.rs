//! Line-oriented chat loop.

use std::io::{self, Write};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use ollama_stream::chat::ERROR_PLACEHOLDER;
use ollama_stream::types::chat::{Message, MessageStatus, Role};
use ollama_stream::ChatSession;

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Quit,
    Clear,
    Empty,
    Prompt(String),
}

pub fn parse_input(line: &str) -> Input {
    match line.trim() {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/clear" => Input::Clear,
        prompt => Input::Prompt(prompt.to_string()),
    }
}

pub fn render_header(model: &str) -> String {
    format!("Ollama Based AI · On-prem Ollama · Chat [{model}]\nCtrl-C stops a reply, /quit exits.")
}

pub fn render_message(message: &Message) -> String {
    let role = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let content = if message.content.is_empty() {
        "..."
    } else {
        message.content.as_str()
    };
    format!("{role}> {content}{}", status_suffix(message.status))
}

fn status_suffix(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Stopped => " [stopped]",
        MessageStatus::Failed => " [failed]",
        MessageStatus::Complete | MessageStatus::Streaming => "",
    }
}

/// 流式回复结束后补在同一行末尾的内容：失败占位文本与状态标记。
fn reply_trailer(last: Option<&Message>, failed: bool) -> String {
    let Some(message) = last else {
        return String::new();
    };
    let placeholder = if failed && message.content == ERROR_PLACEHOLDER {
        ERROR_PLACEHOLDER
    } else {
        ""
    };
    format!("{placeholder}{}", status_suffix(message.status))
}

pub async fn run(session: ChatSession) -> Result<()> {
    println!("{}", render_header(session.model()));
    for message in session.messages().await {
        println!("{}", render_message(&message));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match parse_input(&line) {
            Input::Quit => break,
            Input::Clear | Input::Empty => {}
            Input::Prompt(prompt) => stream_reply(&session, &prompt).await?,
        }
    }
    Ok(())
}

async fn stream_reply(session: &ChatSession, prompt: &str) -> Result<()> {
    print!("assistant> ");
    io::stdout().flush()?;

    let send = session.send_message(prompt, |token| {
        print!("{token}");
        if let Err(err) = io::stdout().flush() {
            tracing::debug!(error = %err, "failed to flush stdout");
        }
    });
    tokio::pin!(send);
    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = tokio::signal::ctrl_c() => {
                session.stop();
            }
        }
    };

    let last = session.messages().await.pop();
    println!("{}", reply_trailer(last.as_ref(), result.is_err()));
    if let Err(err) = result {
        eprintln!("error: {err}");
    }
    Ok(())
}
