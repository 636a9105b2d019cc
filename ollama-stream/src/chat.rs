//! Conversation state for a chat front-end.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use ollama_stream_types::chat::{Message, MessageStatus};
use ollama_stream_types::generate::GenerationOptions;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::generate::GenerationRequest;
use crate::stream::GenerateEvent;

/// 会话开场白。
pub const GREETING: &str = "I am your on-prem Ollama assistant. Paste context or ask for tasks, and I will respond with concise action steps.";

/// 生成失败且没有任何输出时显示的占位文本。
pub const ERROR_PLACEHOLDER: &str = "[error while generating]";

/// Chat 会话。
///
/// 只维护展示用的消息列表，每次发送仅把当前 prompt 交给服务端。
/// 同一时间最多一个生成在进行中。
#[derive(Clone)]
pub struct ChatSession {
    client: Client,
    model: String,
    options: GenerationOptions,
    messages: Arc<RwLock<Vec<Message>>>,
    last_error: Arc<RwLock<Option<String>>>,
    in_flight: Arc<Mutex<Option<CancellationToken>>>,
}

impl ChatSession {
    /// 使用客户端默认模型创建会话。
    pub fn new(client: Client) -> Self {
        let model = client.config().model.clone();
        Self::with_model(client, model)
    }

    /// 指定模型创建会话。
    pub fn with_model(client: Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            options: GenerationOptions::new(),
            messages: Arc::new(RwLock::new(vec![Message::assistant(GREETING)])),
            last_error: Arc::new(RwLock::new(None)),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// 设置每次请求附带的生成参数。
    #[must_use]
    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 当前消息列表快照。
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    /// 最近一次发送失败的错误信息。
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// 是否有生成正在进行。
    pub fn is_streaming(&self) -> bool {
        self.slot().is_some()
    }

    /// 停止当前生成，已收到的内容保留。没有进行中的生成时返回 `false`。
    pub fn stop(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 发送消息并把流式输出追加到最新的助手消息。
    ///
    /// `on_token` 在每个片段写入消息后调用，供前端增量渲染。
    ///
    /// # Errors
    /// prompt 为空白时返回 [`Error::EmptyPrompt`]；已有生成进行中时返回
    /// [`Error::Busy`]；请求或读取失败时返回对应错误，此时助手消息被标记为失败。
    pub async fn send_message<F>(&self, prompt: impl AsRef<str>, mut on_token: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        let prompt = prompt.as_ref().trim();
        if prompt.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        let guard = self.begin()?;

        *self.last_error.write().await = None;
        {
            let mut messages = self.messages.write().await;
            messages.push(Message::user(prompt));
            messages.push(Message::pending_assistant());
        }

        let request = GenerationRequest::new(prompt)
            .model(self.model.clone())
            .options(self.options.clone());
        let result = self
            .stream_into_last(request, guard.token.clone(), &mut on_token)
            .await;

        let status = match &result {
            Ok(()) if guard.token.is_cancelled() => MessageStatus::Stopped,
            Ok(()) => MessageStatus::Complete,
            Err(_) => MessageStatus::Failed,
        };
        if let Some(last) = self.messages.write().await.last_mut() {
            last.status = status;
            if status == MessageStatus::Failed && last.content.is_empty() {
                last.content = ERROR_PLACEHOLDER.to_string();
            }
        }
        if let Err(err) = &result {
            tracing::warn!(error = %err, "generation failed");
            *self.last_error.write().await = Some(err.to_string());
        }

        result
    }

    async fn stream_into_last<F>(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
        on_token: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&str),
    {
        let mut stream = self.client.generations().stream(request, cancel).await?;
        while let Some(event) = stream.next().await {
            if let GenerateEvent::Token { text, .. } = event? {
                if let Some(last) = self.messages.write().await.last_mut() {
                    last.content.push_str(&text);
                }
                on_token(&text);
            }
        }
        Ok(())
    }

    fn begin(&self) -> Result<InFlightGuard> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(Error::Busy);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(InFlightGuard {
            slot: self.in_flight.clone(),
            messages: self.messages.clone(),
            token,
        })
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 生成结束（包括 future 被丢弃）时释放进行中标记。
///
/// future 在流式过程中被丢弃时，仍处于 `Streaming` 的助手消息改为 `Stopped`。
struct InFlightGuard {
    slot: Arc<Mutex<Option<CancellationToken>>>,
    messages: Arc<RwLock<Vec<Message>>>,
    token: CancellationToken,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut messages) = self.messages.try_write() {
            if let Some(last) = messages
                .last_mut()
                .filter(|message| message.status == MessageStatus::Streaming)
            {
                last.status = MessageStatus::Stopped;
            }
        }
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_client;

    #[tokio::test]
    async fn test_new_session_starts_with_greeting() {
        let session = ChatSession::new(test_client("http://127.0.0.1:9"));
        let messages = session.messages().await;
        assert_eq!(messages, vec![Message::assistant(GREETING)]);
        assert_eq!(session.model(), "llama3.2:3b");
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_blank_prompt_is_rejected() {
        let session = ChatSession::new(test_client("http://127.0.0.1:9"));
        let err = session.send_message("  \n\t", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::EmptyPrompt));
        assert_eq!(session.messages().await.len(), 1);
    }

    #[test]
    fn test_stop_without_generation_is_noop() {
        let session = ChatSession::new(test_client("http://127.0.0.1:9"));
        assert!(!session.stop());
    }

    #[test]
    fn test_second_begin_is_busy_until_guard_drops() {
        let session = ChatSession::new(test_client("http://127.0.0.1:9"));
        let guard = session.begin().unwrap();
        assert!(session.is_streaming());
        assert!(matches!(session.begin(), Err(Error::Busy)));
        assert!(session.stop());
        assert!(guard.token.is_cancelled());
        drop(guard);
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_dropped_guard_marks_streaming_message_stopped() {
        let session = ChatSession::new(test_client("http://127.0.0.1:9"));
        let guard = session.begin().unwrap();
        session.messages.write().await.push(Message::pending_assistant());
        drop(guard);

        let messages = session.messages().await;
        assert_eq!(messages.last().unwrap().status, MessageStatus::Stopped);
        assert_eq!(messages[0].status, MessageStatus::Complete);
        assert!(!session.is_streaming());
    }
}
