//! Incremental decoding of the `/api/generate` response body.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::{Error, Result};
use crate::ndjson::NdjsonDecoder;
use ollama_stream_types::generate::StreamRecord;

type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

/// 流式生成事件。
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateEvent {
    /// 一个文本片段及其原始记录。
    Token { text: String, record: StreamRecord },
    /// 结束记录（`done: true`）。若该记录同时携带文本，先产出 `Token`。
    Done { record: StreamRecord },
}

/// 生成结果流。
///
/// 按服务端顺序产出 [`GenerateEvent`]，遇到第一条 `done` 记录即结束，
/// 之后缓冲或未读取的字节全部丢弃。取消令牌触发后流直接结束，不产生错误。
pub struct GenerateStream {
    body: ByteStream,
    decoder: NdjsonDecoder,
    lines: VecDeque<String>,
    queued_done: Option<StreamRecord>,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
    tokens: usize,
}

impl GenerateStream {
    /// 从 HTTP 响应创建生成流。
    pub fn new(response: reqwest::Response, cancel: CancellationToken) -> Self {
        Self::from_byte_stream(response.bytes_stream(), cancel)
    }

    /// 从任意字节流创建生成流。
    pub fn from_byte_stream<S>(body: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
    {
        let cancelled = Box::pin(cancel.clone().cancelled_owned());
        Self {
            body: Box::pin(body),
            decoder: NdjsonDecoder::new(),
            lines: VecDeque::new(),
            queued_done: None,
            cancel,
            cancelled,
            finished: false,
            tokens: 0,
        }
    }

    /// 已结束的空流（请求发出前已被取消）。
    pub(crate) fn aborted(cancel: CancellationToken) -> Self {
        let mut stream = Self::from_byte_stream(futures_util::stream::empty(), cancel);
        stream.finished = true;
        stream
    }

    /// 已产出的文本片段数。
    pub fn tokens_delivered(&self) -> usize {
        self.tokens
    }

    /// 流是否已结束。
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        self.lines.clear();
        self.queued_done = None;
        self.decoder.discard();
        self.body = Box::pin(futures_util::stream::empty());
    }

    fn abort(&mut self) {
        tracing::debug!(tokens = self.tokens, "generation cancelled");
        self.finish();
    }

    fn next_from_lines(&mut self) -> Option<GenerateEvent> {
        while let Some(line) = self.lines.pop_front() {
            let record = match StreamRecord::from_line(&line) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(error = %err, line = %line, "skipping malformed stream line");
                    continue;
                }
            };

            let done = record.is_done();
            if let Some(text) = record.text().map(ToString::to_string) {
                self.tokens += 1;
                if done {
                    self.queued_done = Some(record.clone());
                }
                return Some(GenerateEvent::Token { text, record });
            }
            if done {
                self.finish();
                return Some(GenerateEvent::Done { record });
            }
        }
        None
    }
}

impl Stream for GenerateStream {
    type Item = Result<GenerateEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            if this.cancel.is_cancelled() {
                this.abort();
                return Poll::Ready(None);
            }

            if let Some(record) = this.queued_done.take() {
                this.finish();
                return Poll::Ready(Some(Ok(GenerateEvent::Done { record })));
            }
            if let Some(event) = this.next_from_lines() {
                return Poll::Ready(Some(Ok(event)));
            }

            if this.cancelled.as_mut().poll(cx).is_ready() {
                this.abort();
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    let dropped = this.decoder.discard();
                    if dropped > 0 {
                        tracing::debug!(bytes = dropped, "discarding incomplete trailing line");
                    }
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finish();
                    return Poll::Ready(Some(Err(Error::StreamFailed { source: err })));
                }
                Poll::Ready(Some(Ok(bytes))) => {
                    this.lines.extend(this.decoder.decode(&bytes));
                }
            }
        }
    }
}
