// LLM插件系统 - 定义提供商接口、请求结构与错误分类

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 多模态消息中的内容片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// 消息内容：纯文本或多模态片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// 文本 + 内联 JPEG 图片的单轮用户消息
    pub fn user_with_image(text: impl Into<String>, jpeg_base64: &str) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/jpeg;base64,{}", jpeg_base64),
                    },
                },
            ]),
        }
    }

    /// 是否包含图片
    pub fn has_image(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
        }
    }
}

/// 对话补全请求
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_completion_tokens: u32,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            max_completion_tokens: 1024,
        }
    }

    /// 单条纯文本用户消息
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(model, vec![ChatMessage::user(prompt)])
    }

    /// 单条图文用户消息
    pub fn vision(model: impl Into<String>, prompt: impl Into<String>, jpeg_base64: &str) -> Self {
        Self::new(model, vec![ChatMessage::user_with_image(prompt, jpeg_base64)])
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_completion_tokens: u32) -> Self {
        self.max_completion_tokens = max_completion_tokens;
        self
    }

    /// 最后一条用户消息的文本
    pub fn prompt_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match &m.content {
            MessageContent::Text(text) if m.role == Role::User => Some(text.as_str()),
            MessageContent::Parts(parts) if m.role == Role::User => {
                parts.iter().find_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
            }
            _ => None,
        })
    }
}

/// 推理调用错误
#[derive(Clone, Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API Key 未配置")]
    MissingApiKey,
    #[error("API 调用失败 ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("请求超时（{after_secs} 秒）")]
    Timeout { after_secs: u64 },
    #[error("网络错误: {0}")]
    Transport(String),
    #[error("响应格式错误: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    fn lowercase_message(&self) -> String {
        self.to_string().to_lowercase()
    }

    /// 服务端是否报告模型已下线/不再支持/不存在
    pub fn is_model_decommissioned(&self) -> bool {
        let message = self.lowercase_message();
        message.contains("decommissioned")
            || message.contains("no longer supported")
            || message.contains("model_not_found")
    }

    /// 错误信息是否暗示模型不支持图片输入
    pub fn suggests_missing_vision(&self) -> bool {
        let message = self.lowercase_message();
        message.contains("vision") || message.contains("image")
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// 流式片段回调
pub type ChunkSink<'a> = dyn for<'c> Fn(&'c str) + Send + Sync + 'a;

/// LLM提供商接口
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 提供商名称
    fn name(&self) -> &str;

    /// 一次性返回完整回复
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;

    /// 流式返回，每收到一段文本调用一次 `on_chunk`，最终返回拼接后的全文
    async fn complete_stream(
        &self,
        request: ChatRequest,
        on_chunk: &ChunkSink,
    ) -> Result<String, LlmError>;
}
