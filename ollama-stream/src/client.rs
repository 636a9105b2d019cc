//! Client configuration and transport layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as HttpClient, Proxy};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::generate::{GenerationRequest, Generations};
use ollama_stream_types::generate::GenerationOptions;

/// 未配置时使用的服务地址。
pub const DEFAULT_BASE_URL: &str = "https://ollama.ayux.in";

/// 未指定模型时使用的模型标识。
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

/// Ollama 客户端。
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub http: HttpClient,
    pub config: ClientConfig,
}

/// 客户端配置。
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 规范化后的服务地址（无尾部斜杠）。
    pub base_url: String,
    /// 默认模型。
    pub model: String,
    /// 默认生成参数，请求参数在其之上合并。
    pub default_options: GenerationOptions,
    /// HTTP 配置。
    pub http_options: HttpOptions,
}

/// HTTP 配置。
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    pub timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub proxy: Option<String>,
    pub headers: HashMap<String, String>,
}

impl Client {
    /// 使用默认配置创建客户端。
    ///
    /// # Errors
    /// 当构建 HTTP 客户端失败时返回错误。
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// 从环境变量创建客户端。
    ///
    /// 读取 `OLLAMA_BASE_URL` 与 `OLLAMA_MODEL`，空白值会被忽略。
    ///
    /// # Errors
    /// 当构建客户端失败时返回错误。
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Ok(base_url) = std::env::var("OLLAMA_BASE_URL") {
            if !base_url.trim().is_empty() {
                builder = builder.base_url(base_url);
            }
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            if !model.trim().is_empty() {
                builder = builder.model(model.trim());
            }
        }
        builder.build()
    }

    /// 创建 Builder。
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// 当前配置。
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// 访问 Generate API。
    #[must_use]
    pub fn generations(&self) -> Generations {
        Generations::new(self.inner.clone())
    }

    /// 流式生成，每个文本片段回调一次 `on_token(text, record)`。
    ///
    /// 取消令牌触发后不再回调，且返回 `Ok(())`。
    ///
    /// # Errors
    /// 服务端返回非成功状态时返回 [`Error::RequestFailed`]，
    /// 读取响应体失败时返回 [`Error::StreamFailed`]。
    pub async fn generate<F>(
        &self,
        request: GenerationRequest,
        on_token: F,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(&str, &Value),
    {
        self.generations().generate(request, on_token, cancel).await
    }
}

/// 客户端 Builder。
#[derive(Default)]
pub struct ClientBuilder {
    base_url: Option<String>,
    model: Option<String>,
    default_options: Option<GenerationOptions>,
    http_options: HttpOptions,
}

impl ClientBuilder {
    /// 设置服务地址。
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// 设置默认模型。
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// 替换默认生成参数。
    #[must_use]
    pub fn default_options(mut self, options: GenerationOptions) -> Self {
        self.default_options = Some(options);
        self
    }

    /// 设置请求超时（秒），覆盖整个流式读取过程。
    #[must_use]
    pub const fn timeout(mut self, secs: u64) -> Self {
        self.http_options.timeout = Some(secs);
        self
    }

    /// 设置连接超时（秒）。
    #[must_use]
    pub const fn connect_timeout(mut self, secs: u64) -> Self {
        self.http_options.connect_timeout = Some(secs);
        self
    }

    /// 设置代理。
    #[must_use]
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.http_options.proxy = Some(url.into());
        self
    }

    /// 增加默认 HTTP 头。
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_options.headers.insert(key.into(), value.into());
        self
    }

    /// 构建客户端。
    ///
    /// # Errors
    /// 当服务地址为空、HTTP 头或代理无效时返回错误。
    pub fn build(self) -> Result<Client> {
        let Self {
            base_url,
            model,
            default_options,
            http_options,
        } = self;

        let base_url = normalize_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL));
        if base_url.is_empty() {
            return Err(Error::InvalidConfig {
                message: "Base URL must not be empty".into(),
            });
        }
        let model = model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let default_options = default_options.unwrap_or_else(GenerationOptions::with_defaults);

        let headers = Self::build_headers(&http_options)?;
        let http = Self::build_http_client(&http_options, headers)?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                http,
                config: ClientConfig {
                    base_url,
                    model,
                    default_options,
                    http_options,
                },
            }),
        })
    }

    fn build_headers(http_options: &HttpOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (key, value) in &http_options.headers {
            let name =
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| Error::InvalidConfig {
                    message: format!("Invalid header name: {key}"),
                })?;
            let value = HeaderValue::from_str(value).map_err(|_| Error::InvalidConfig {
                message: format!("Invalid header value for {key}"),
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn build_http_client(http_options: &HttpOptions, headers: HeaderMap) -> Result<HttpClient> {
        let mut http_builder = HttpClient::builder();
        if let Some(timeout) = http_options.timeout {
            http_builder = http_builder.timeout(Duration::from_secs(timeout));
        }
        if let Some(connect_timeout) = http_options.connect_timeout {
            http_builder = http_builder.connect_timeout(Duration::from_secs(connect_timeout));
        }

        if let Some(proxy_url) = &http_options.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| Error::InvalidConfig {
                message: format!("Invalid proxy: {e}"),
            })?;
            http_builder = http_builder.proxy(proxy);
        }

        if !headers.is_empty() {
            http_builder = http_builder.default_headers(headers);
        }

        Ok(http_builder.build()?)
    }
}

impl ClientInner {
    /// 发送请求。
    ///
    /// # Errors
    /// 当请求构建或网络请求失败时返回错误。
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = request.build()?;
        Ok(self.http.execute(request).await?)
    }
}

/// 去除首尾空白与所有尾部斜杠。
pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}
