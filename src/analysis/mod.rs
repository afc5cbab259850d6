//! 视频分析模块
//!
//! 负责核心的采样-分析-汇总流程，包括：
//! - 单帧的视觉模型分析（frame_analyzer）
//! - 逐帧结果的汇总报告与执行摘要（aggregator）
//! - 文件/实时两种模式的流水线驱动（pipeline）

pub mod aggregator;
pub mod frame_analyzer;
pub mod pipeline;

pub use aggregator::Aggregator;
pub use frame_analyzer::{FrameAnalyzer, FrameContext};
pub use pipeline::{run_file, run_live, run_with_config, PipelineError, PipelineOptions};

use crate::llm::LlmError;
use std::future::Future;
use std::time::Duration;

/// 为推理调用加上超时，超时转为 `LlmError::Timeout`
pub(crate) async fn with_timeout<F>(limit: Duration, call: F) -> Result<String, LlmError>
where
    F: Future<Output = Result<String, LlmError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout {
            after_secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试用的脚本化推理服务

    use crate::llm::{ChatRequest, ChunkSink, LLMProvider, LlmError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 记录下来的一次调用
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub model: String,
        pub prompt: String,
        pub max_tokens: u32,
        pub temperature: f64,
        pub streamed: bool,
        pub has_image: bool,
    }

    type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync>;

    /// 按脚本应答的推理服务
    pub struct ScriptedProvider {
        responder: Responder,
        delay: Option<Duration>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedProvider {
        pub fn new(
            responder: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                responder: Box::new(responder),
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// 每次调用都返回同一段文本
        pub fn always(text: &str) -> Self {
            let text = text.to_string();
            Self::new(move |_| Ok(text.clone()))
        }

        /// 每次调用前等待一段时间（配合暂停的时钟使用）
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_for(&self, model: &str) -> usize {
            self.calls().iter().filter(|c| c.model == model).count()
        }

        async fn respond(&self, request: &ChatRequest, streamed: bool) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(RecordedCall {
                model: request.model.clone(),
                prompt: request.prompt_text().unwrap_or_default().to_string(),
                max_tokens: request.max_completion_tokens,
                temperature: request.temperature,
                streamed,
                has_image: request.messages.iter().any(|m| m.has_image()),
            });
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.responder)(request)
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
            self.respond(&request, false).await
        }

        async fn complete_stream(
            &self,
            request: ChatRequest,
            on_chunk: &ChunkSink,
        ) -> Result<String, LlmError> {
            let text = self.respond(&request, true).await?;
            for piece in text.split_inclusive(' ') {
                on_chunk(piece);
            }
            Ok(text)
        }
    }

    pub fn api_error(message: &str) -> LlmError {
        LlmError::Api {
            status: 400,
            message: message.to_string(),
        }
    }
}
