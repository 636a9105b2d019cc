//! Newline-delimited JSON line reassembly.

use bytes::{Buf, BytesMut};

/// NDJSON 行解码器。
///
/// 跨 chunk 的未完成行以原始字节形式保留在缓冲区中，直到后续 chunk
/// 补齐换行符。`\n` 不会出现在 UTF-8 多字节序列内部，因此按字节切分行
/// 不会截断多字节字符。
pub struct NdjsonDecoder {
    buffer: BytesMut,
    scanned: usize,
}

impl NdjsonDecoder {
    /// 创建新的 NDJSON 解码器。
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
        }
    }

    /// 解码一个 chunk，返回其中所有完整且非空白的行。
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::with_capacity(4);

        while let Some(offset) = memchr::memchr(b'\n', &self.buffer[self.scanned..]) {
            let line_bytes = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            if let Some(line) = decode_line(&line_bytes) {
                lines.push(line);
            }
        }
        self.scanned = self.buffer.len();

        lines
    }

    /// 尚未遇到换行符的剩余字节。
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// 丢弃剩余字节，返回被丢弃的字节数。
    pub fn discard(&mut self) -> usize {
        let len = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        len
    }
}

impl Default for NdjsonDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }
    Some(line.to_string())
}
