use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 默认上下文窗口大小（`options.num_ctx`）。
pub const DEFAULT_NUM_CTX: u64 = 4000;

/// 生成参数（请求体中的 `options` 对象）。
///
/// 常用字段提供了类型化的 setter，其余键通过 [`GenerationOptions::insert`]
/// 原样透传给服务端。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationOptions(Map<String, Value>);

impl GenerationOptions {
    /// 创建空参数表。
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// 内置默认参数（`num_ctx = 4000`）。
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new().num_ctx(DEFAULT_NUM_CTX)
    }

    /// 设置上下文窗口大小。
    #[must_use]
    pub fn num_ctx(self, num_ctx: u64) -> Self {
        self.insert("num_ctx", num_ctx)
    }

    /// 设置最大生成 token 数。
    #[must_use]
    pub fn num_predict(self, num_predict: i64) -> Self {
        self.insert("num_predict", num_predict)
    }

    /// 设置采样温度。
    #[must_use]
    pub fn temperature(self, temperature: f64) -> Self {
        self.insert("temperature", temperature)
    }

    #[must_use]
    pub fn top_k(self, top_k: u64) -> Self {
        self.insert("top_k", top_k)
    }

    #[must_use]
    pub fn top_p(self, top_p: f64) -> Self {
        self.insert("top_p", top_p)
    }

    #[must_use]
    pub fn seed(self, seed: i64) -> Self {
        self.insert("seed", seed)
    }

    /// 设置停止序列。
    #[must_use]
    pub fn stop<I, S>(self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stop: Vec<Value> = stop.into_iter().map(|s| Value::String(s.into())).collect();
        self.insert("stop", Value::Array(stop))
    }

    /// 插入任意参数（未知键原样透传）。
    #[must_use]
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// 读取参数。
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 以 `defaults` 为底合并当前参数，调用方的键覆盖默认值。
    #[must_use]
    pub fn merged_over(&self, defaults: &Self) -> Self {
        let mut merged = defaults.0.clone();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }

    /// 访问底层 JSON 对象。
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for GenerationOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// `/api/generate` 请求体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequestBody {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerationOptions,
}

/// 流中的一行记录（已解析的 JSON）。
///
/// 一条记录可能携带 `response` 文本片段，也可能是 `done: true` 的结束标记，
/// 或两者兼有。
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    raw: Value,
}

impl StreamRecord {
    /// 解析一行 NDJSON。
    ///
    /// # Errors
    /// 当该行不是合法 JSON 时返回错误。
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line).map(Self::from_value)
    }

    #[must_use]
    pub const fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    /// 文本片段；`response` 为字符串时返回（包括空字符串），其他类型的值视为无文本。
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.raw.get("response").and_then(Value::as_str)
    }

    /// 是否为结束标记。只认布尔值 `true`，`1` 或 `"true"` 不会结束流。
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.raw.get("done").and_then(Value::as_bool) == Some(true)
    }

    #[must_use]
    pub const fn raw(&self) -> &Value {
        &self.raw
    }

    #[must_use]
    pub fn into_raw(self) -> Value {
        self.raw
    }

    /// 转换为类型化视图。
    ///
    /// # Errors
    /// 当已知字段类型不匹配时返回错误。
    pub fn to_response(&self) -> serde_json::Result<GenerateResponse> {
        GenerateResponse::deserialize(&self.raw)
    }
}

/// 流记录的类型化视图。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    /// 总耗时（纳秒）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    /// 生成耗时（纳秒）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

impl GenerateResponse {
    /// 生成速度（token/秒），仅结束记录携带统计信息时可用。
    #[must_use]
    pub fn tokens_per_second(&self) -> Option<f64> {
        let count = self.eval_count?;
        let duration = self.eval_duration.filter(|d| *d > 0)?;
        #[allow(clippy::cast_precision_loss)]
        Some(count as f64 / (duration as f64 / 1_000_000_000.0))
    }
}
