use crate::client::Client;
use bytes::Bytes;
use futures_util::Stream;
use std::sync::Mutex;

static ENV_LOCK: Mutex<()> = Mutex::new(());

pub fn with_env(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
    let _guard = ENV_LOCK.lock().unwrap();
    let backup: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(key, _)| ((*key).to_string(), std::env::var(key).ok()))
        .collect();
    for (key, value) in vars {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
    f();
    for (key, value) in backup {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
}

pub fn test_client(base_url: &str) -> Client {
    Client::builder().base_url(base_url).build().unwrap()
}

/// 按给定切分构造字节流。
pub fn chunked(
    chunks: Vec<Vec<u8>>,
) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static {
    futures_util::stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))))
}

/// 一个同步构造出的 `reqwest::Error`，用于模拟读取失败。
pub fn read_error() -> reqwest::Error {
    reqwest::Client::new()
        .get("not a url")
        .build()
        .unwrap_err()
}
