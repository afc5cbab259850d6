//! 单帧分析
//!
//! 将一帧 JPEG 与固定提示词发送给视觉模型，返回带标签的结果。
//! 该步骤不会失败：任何错误（包括超时）都会转为降级结果写入批次。

use super::with_timeout;
use crate::llm::{ChatRequest, LLMProvider, LlmError};
use crate::models::{AnalysisOutcome, DegradeReason, FrameSample};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const FRAME_MAX_TOKENS: u32 = 512;
const FRAME_TEMPERATURE: f64 = 0.7;

/// 单帧分析上下文
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// 帧序号
    pub position: u64,
    /// 总帧数（文件模式）
    pub total: Option<u64>,
    /// 已运行时间（实时模式）
    pub elapsed_seconds: Option<f64>,
}

impl FrameContext {
    pub fn file(position: u64, total: Option<u64>) -> Self {
        Self {
            position,
            total,
            elapsed_seconds: None,
        }
    }

    pub fn live(position: u64, elapsed_seconds: f64) -> Self {
        Self {
            position,
            total: None,
            elapsed_seconds: Some(elapsed_seconds),
        }
    }

    fn progress(&self) -> String {
        match self.total {
            Some(total) if total > 0 => format!(" ({}/{})", self.position, total),
            _ => format!(" (Frame {})", self.position),
        }
    }
}

/// 构建单帧分析提示词
pub fn frame_prompt(context: &FrameContext) -> String {
    format!(
        "Analyze this video frame and describe:\n\
         1. What actions or activities are visible\n\
         2. Who or what is in the frame\n\
         3. Any notable movements or gestures\n\
         4. The context or setting\n\
         \n\
         Frame{}:",
        context.progress()
    )
}

/// 单帧分析器
pub struct FrameAnalyzer {
    provider: Arc<dyn LLMProvider>,
    model: String,
    request_timeout: Duration,
}

impl FrameAnalyzer {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            request_timeout,
        }
    }

    /// 分析一帧
    pub async fn analyze(&self, sample: &FrameSample, context: &FrameContext) -> AnalysisOutcome {
        let request = ChatRequest::vision(&self.model, frame_prompt(context), &sample.to_base64())
            .with_temperature(FRAME_TEMPERATURE)
            .with_max_tokens(FRAME_MAX_TOKENS);

        match context.elapsed_seconds {
            Some(elapsed) => debug!(
                "分析第 {} 帧 (已运行 {:.1}s, {} 字节)",
                sample.index,
                elapsed,
                sample.encoded_bytes.len()
            ),
            None => debug!(
                "分析第 {} 帧 ({} 字节)",
                sample.index,
                sample.encoded_bytes.len()
            ),
        }

        match with_timeout(self.request_timeout, self.provider.complete(request)).await {
            Ok(text) => AnalysisOutcome::Described { text },
            Err(e) => {
                warn!("第 {} 帧分析失败: {}", sample.index, e);
                self.degrade(e)
            }
        }
    }

    fn degrade(&self, error: LlmError) -> AnalysisOutcome {
        let reason = if error.suggests_missing_vision() {
            DegradeReason::VisionUnsupported {
                model: self.model.clone(),
            }
        } else if let LlmError::Timeout { after_secs } = error {
            DegradeReason::Timeout {
                seconds: after_secs,
            }
        } else {
            DegradeReason::CallFailed
        };

        AnalysisOutcome::Degraded {
            reason,
            detail: error.to_string(),
        }
    }
}
