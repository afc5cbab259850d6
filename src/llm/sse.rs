//! Server-Sent Events 解码
//!
//! 流式补全以 `data: {...}` 行返回，网络分块可能在任意字节处截断，
//! 这里按行缓冲后只输出 `data:` 的负载。

/// 流结束标记
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个网络分块，返回其中完整的 data 负载
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = parse_data_line(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// 流结束时处理缓冲区中没有换行的最后一行
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        parse_data_line(&rest)
    }
}

fn parse_data_line(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(&['\r', '\n'][..]);
    text.strip_prefix("data:")
        .map(|data| data.trim_start().to_string())
        .filter(|data| !data.is_empty())
}
