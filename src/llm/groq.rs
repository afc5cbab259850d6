// Groq 提供商实现 - OpenAI 兼容的 chat/completions 接口，支持图片 base64 与流式输出

use super::plugin::*;
use super::sse::{SseDecoder, DONE_MARKER};
use super::LlmConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Groq提供商
pub struct GroqProvider {
    api_key: Option<String>,
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl GroqProvider {
    /// 创建新的提供商（接受共享的HTTP客户端以复用连接池）
    pub fn new(client: Client, config: &LlmConfig) -> Self {
        let api_key = Some(config.api_key.clone()).filter(|k| !k.is_empty());
        Self {
            api_key,
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn map_transport(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                after_secs: self.request_timeout.as_secs(),
            }
        } else {
            LlmError::Transport(e.to_string())
        }
    }

    /// 发送请求并检查状态码，错误时解析服务端返回的错误信息
    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let api_key = self.api_key.as_ref().ok_or(LlmError::MissingApiKey)?;

        let body = CompletionBody {
            request,
            top_p: 1.0,
            stream,
        };

        debug!(
            "调用 Groq API: model={}, stream={}, max_tokens={}",
            request.model, stream, request.max_completion_tokens
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Groq API 错误: {} - {}", status, error_text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: extract_error_message(&error_text),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let start_time = Instant::now();
        let response = self.send(&request, false).await?;

        let response_text = response.text().await.map_err(|e| self.map_transport(e))?;
        let data: CompletionResponse = serde_json::from_str(&response_text)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("Groq API 返回空结果".to_string()))?;

        // finish_reason 为 length 说明达到 token 上限，内容可能不完整
        if choice.finish_reason.as_deref() == Some("length") {
            warn!(
                "LLM 响应因达到 token 限制而被截断 (model={}, max_tokens={})",
                request.model, request.max_completion_tokens
            );
        }

        debug!(
            "Groq API 调用完成: model={}, 耗时 {}ms",
            request.model,
            start_time.elapsed().as_millis()
        );

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn complete_stream(
        &self,
        request: ChatRequest,
        on_chunk: &ChunkSink,
    ) -> Result<String, LlmError> {
        let start_time = Instant::now();
        let response = self.send(&request, true).await?;

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut content = String::new();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_transport(e))?;
            for payload in decoder.push(&chunk) {
                if payload == DONE_MARKER {
                    break 'outer;
                }
                if let Some(delta) = parse_stream_payload(&payload)? {
                    on_chunk(&delta);
                    content.push_str(&delta);
                }
            }
        }

        if let Some(payload) = decoder.finish() {
            if payload != DONE_MARKER {
                if let Some(delta) = parse_stream_payload(&payload)? {
                    on_chunk(&delta);
                    content.push_str(&delta);
                }
            }
        }

        debug!(
            "Groq 流式调用完成: model={}, {} 字符, 耗时 {}ms",
            request.model,
            content.len(),
            start_time.elapsed().as_millis()
        );

        Ok(content)
    }
}

/// 解析单条流式负载，返回增量文本；负载中携带错误时转为 API 错误
fn parse_stream_payload(payload: &str) -> Result<Option<String>, LlmError> {
    let chunk: StreamChunk =
        serde_json::from_str(payload).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    if let Some(err) = chunk.error {
        return Err(LlmError::Api {
            status: 200,
            message: err.describe(),
        });
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

/// 从错误响应体中提取可读信息（包含错误码，便于下线/视觉能力判断）
fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.describe(),
        Err(_) => body.trim().to_string(),
    }
}

/// 请求体：在通用请求上附加 top_p 与 stream
#[derive(Serialize)]
struct CompletionBody<'a> {
    #[serde(flatten)]
    request: &'a ChatRequest,
    top_p: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>, // 完成原因：stop, length, etc
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    code: Option<String>,
}

impl ApiErrorBody {
    fn describe(&self) -> String {
        match &self.code {
            Some(code) => format!("{} ({})", self.message, code),
            None => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message_with_code() {
        let body = r#"{"error":{"message":"The model `old` has been decommissioned","type":"invalid_request_error","code":"model_decommissioned"}}"#;
        let message = extract_error_message(body);
        assert_eq!(
            message,
            "The model `old` has been decommissioned (model_decommissioned)"
        );
    }

    #[test]
    fn test_extract_error_message_plain_text() {
        assert_eq!(extract_error_message("  bad gateway \n"), "bad gateway");
    }

    #[test]
    fn test_parse_stream_payload() {
        let payload = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
        assert_eq!(
            parse_stream_payload(payload).unwrap(),
            Some("Hello".to_string())
        );

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_stream_payload(role_only).unwrap(), None);

        let error = r#"{"error":{"message":"model_not_found"}}"#;
        let err = parse_stream_payload(error).unwrap_err();
        assert!(err.is_model_decommissioned());
    }

    #[test]
    fn test_body_flattens_request() {
        let request = ChatRequest::text("m", "hi").with_max_tokens(256);
        let body = CompletionBody {
            request: &request,
            top_p: 1.0,
            stream: true,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "m");
        assert_eq!(value["max_completion_tokens"], 256);
        assert_eq!(value["stream"], true);
        assert_eq!(value["top_p"], 1.0);
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let provider = GroqProvider::new(Client::new(), &LlmConfig::default());
        let err = provider
            .complete(ChatRequest::text("m", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
        assert_eq!(provider.name(), "groq");
    }
}
