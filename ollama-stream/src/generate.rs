//! Generate API surface.

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{normalize_base_url, ClientInner};
use crate::error::{Error, Result};
use crate::stream::{GenerateEvent, GenerateStream};
use ollama_stream_types::generate::{GenerateRequestBody, GenerationOptions};

/// 一次生成请求。
///
/// `prompt` 应由调用方保证非空；客户端不做校验。
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    model: Option<String>,
    options: GenerationOptions,
    base_url: Option<String>,
}

impl GenerationRequest {
    /// 创建请求。
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            options: GenerationOptions::new(),
            base_url: None,
        }
    }

    /// 指定模型，未指定时使用客户端默认模型。
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// 替换生成参数，合并到客户端默认参数之上。
    #[must_use]
    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// 设置单个生成参数。
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options = self.options.insert(key, value);
        self
    }

    /// 覆盖本次请求的服务地址。
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[derive(Clone)]
pub struct Generations {
    pub(crate) inner: Arc<ClientInner>,
}

impl Generations {
    pub(crate) fn new(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// 发起流式生成。
    ///
    /// 请求发出前或等待响应时被取消，返回一个立即结束的空流。
    ///
    /// # Errors
    /// 网络请求失败时返回 [`Error::HttpClient`]；
    /// 非成功状态或响应无内容时返回 [`Error::RequestFailed`]，此时不读取响应体。
    pub async fn stream(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateStream> {
        let url = build_generate_url(&self.inner, &request)?;
        let body = build_request_body(&self.inner, request);
        tracing::debug!(%url, model = %body.model, "sending generate request");

        let http_request = self.inner.http.post(url).json(&body);
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("generation cancelled before response");
                return Ok(GenerateStream::aborted(cancel));
            }
            response = self.inner.send(http_request) => response?,
        };

        let status = response.status();
        if !status.is_success() || !has_body(status) {
            return Err(Error::RequestFailed {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        Ok(GenerateStream::new(response, cancel))
    }

    /// 流式生成，按顺序为每个文本片段调用 `on_token(text, record)`。
    ///
    /// 结束记录（`done: true`）之后的数据被忽略；取消后不再回调并返回 `Ok(())`。
    ///
    /// # Errors
    /// 参见 [`Generations::stream`]；读取响应体失败时返回 [`Error::StreamFailed`]。
    pub async fn generate<F>(
        &self,
        request: GenerationRequest,
        mut on_token: F,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(&str, &Value),
    {
        let mut stream = self.stream(request, cancel).await?;
        while let Some(event) = stream.next().await {
            if let GenerateEvent::Token { text, record } = event? {
                on_token(&text, record.raw());
            }
        }
        Ok(())
    }
}

fn has_body(status: StatusCode) -> bool {
    status != StatusCode::NO_CONTENT && status != StatusCode::RESET_CONTENT
}

pub(crate) fn build_generate_url(
    inner: &ClientInner,
    request: &GenerationRequest,
) -> Result<String> {
    let base = request
        .base_url
        .as_deref()
        .map_or_else(|| inner.config.base_url.clone(), normalize_base_url);
    if base.is_empty() {
        return Err(Error::InvalidConfig {
            message: "Base URL must not be empty".into(),
        });
    }
    Ok(format!("{base}/api/generate"))
}

pub(crate) fn build_request_body(
    inner: &ClientInner,
    request: GenerationRequest,
) -> GenerateRequestBody {
    let GenerationRequest {
        prompt,
        model,
        options,
        ..
    } = request;
    GenerateRequestBody {
        model: model.unwrap_or_else(|| inner.config.model.clone()),
        prompt,
        stream: true,
        options: options.merged_over(&inner.config.default_options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use serde_json::json;

    fn inner(client: &Client) -> Arc<ClientInner> {
        client.generations().inner
    }

    #[test]
    fn test_body_uses_defaults() {
        let client = Client::new().unwrap();
        let body = build_request_body(&inner(&client), GenerationRequest::new("hi"));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "llama3.2:3b",
                "prompt": "hi",
                "stream": true,
                "options": {"num_ctx": 4000}
            })
        );
    }

    #[test]
    fn test_body_merges_caller_options() {
        let client = Client::builder().model("phi3").build().unwrap();
        let request = GenerationRequest::new("hi")
            .model("mistral")
            .option("num_ctx", 1024)
            .option("repeat_penalty", 1.1);
        let body = build_request_body(&inner(&client), request);
        assert_eq!(body.model, "mistral");
        assert_eq!(body.options.get("num_ctx"), Some(&json!(1024)));
        assert_eq!(body.options.get("repeat_penalty"), Some(&json!(1.1)));
    }

    #[test]
    fn test_url_uses_client_base() {
        let client = Client::builder()
            .base_url("http://localhost:11434/")
            .build()
            .unwrap();
        let url = build_generate_url(&inner(&client), &GenerationRequest::new("hi")).unwrap();
        assert_eq!(url, "http://localhost:11434/api/generate");
    }

    #[test]
    fn test_url_per_request_override_is_normalized() {
        let client = Client::new().unwrap();
        let request = GenerationRequest::new("hi").base_url("http://proxy.local//");
        let url = build_generate_url(&inner(&client), &request).unwrap();
        assert_eq!(url, "http://proxy.local/api/generate");
        assert_eq!(request.prompt(), "hi");
    }

    #[test]
    fn test_url_empty_per_request_override_is_rejected() {
        let client = Client::new().unwrap();
        let request = GenerationRequest::new("hi").base_url(" / ");
        let err = build_generate_url(&inner(&client), &request).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_stream_with_empty_override_fails_before_sending() {
        let client = Client::new().unwrap();
        let result = client
            .generations()
            .stream(GenerationRequest::new("hi").base_url("/"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_no_content_counts_as_missing_body() {
        assert!(!has_body(StatusCode::NO_CONTENT));
        assert!(has_body(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_cancelled_before_send_returns_empty_stream() {
        let client = Client::builder()
            .base_url("http://127.0.0.1:9")
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;
        client
            .generate(GenerationRequest::new("hi"), |_, _| calls += 1, cancel)
            .await
            .unwrap();
        assert_eq!(calls, 0);
    }
}
