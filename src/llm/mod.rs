// LLM模块 - 远程视觉语言模型推理服务

pub mod groq;
pub mod plugin;
pub mod sse;

pub use groq::GroqProvider;
pub use plugin::{
    ChatMessage, ChatRequest, ChunkSink, ContentPart, LLMProvider, LlmError, MessageContent,
};

use std::time::Duration;

/// 默认主模型
pub const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

/// 主模型下线时使用的备用模型
pub const FALLBACK_MODEL: &str = "llama-3.1-70b-versatile";

/// 报告问答使用的模型
pub const CHAT_MODEL: &str = "openai/gpt-oss-120b";

/// LLM配置
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 单次调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_fallback_model() -> String {
    FALLBACK_MODEL.to_string()
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            fallback_model: default_fallback_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl LlmConfig {
    /// 根据运行参数构建配置，未指定模型时使用默认主模型
    pub fn for_run(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(default_model),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 构建带超时的 HTTP 客户端，可在多次运行间共享连接池
    pub fn build_http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()
    }
}
