// 数据模型模块 - 定义流水线中流转的数据结构

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 分隔横幅宽度
const BANNER_WIDTH: usize = 60;

/// 执行摘要段落标题
pub const EXECUTIVE_SUMMARY_HEADING: &str = "EXECUTIVE SUMMARY";

/// 执行摘要生成失败时的占位文本
pub const DIGEST_PLACEHOLDER: &str =
    "Summary generation unavailable. Please refer to the detailed report above.";

/// 空批次哨兵报告正文
pub const EMPTY_BATCH_BODY: &str = "No frames were analyzed.";

/// 降级分析文本的统一前缀
pub const ERROR_MARKER: &str = "Error";

/// 模型不支持视觉时建议切换的模型
pub const VISION_MODEL_HINT: &str = "llama-3.2-11b-vision-preview";

/// 生成运行ID（时间戳 + 短UUID，避免并发运行冲突）
pub fn new_run_id() -> String {
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().timestamp(), &short[..8])
}

/// 采样帧（编码后的静态图片）
#[derive(Clone)]
pub struct FrameSample {
    /// 源视频中的帧序号
    pub index: u64,
    /// 时间戳（秒）
    pub timestamp_seconds: f64,
    /// JPEG 编码数据
    pub encoded_bytes: Vec<u8>,
}

impl FrameSample {
    /// 转为 base64，用于内联到请求体
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.encoded_bytes)
    }
}

impl fmt::Debug for FrameSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSample")
            .field("index", &self.index)
            .field("timestamp_seconds", &self.timestamp_seconds)
            .field("encoded_len", &self.encoded_bytes.len())
            .finish()
    }
}

/// 单帧分析降级原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradeReason {
    /// 模型不支持图片输入
    VisionUnsupported { model: String },
    /// 调用超时
    Timeout { seconds: u64 },
    /// 其他推理调用失败
    CallFailed,
    /// 帧编码失败，未发起调用
    EncodeFailed,
}

/// 单帧分析结果（显式区分成功与降级）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// 模型给出的描述
    Described { text: String },
    /// 调用失败，保留原始错误信息
    Degraded { reason: DegradeReason, detail: String },
}

impl AnalysisOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// 展平为文本；降级结果以 `Error` 前缀标注
    pub fn to_text(&self) -> String {
        match self {
            Self::Described { text } => text.clone(),
            Self::Degraded { reason, detail } => match reason {
                DegradeReason::VisionUnsupported { model } => format!(
                    "{}: Model '{}' may not support vision. Try using --model {}",
                    ERROR_MARKER, model, VISION_MODEL_HINT
                ),
                DegradeReason::Timeout { seconds } => format!(
                    "{} analyzing frame: request timed out after {}s",
                    ERROR_MARKER, seconds
                ),
                DegradeReason::CallFailed => {
                    format!("{} analyzing frame: {}", ERROR_MARKER, detail)
                }
                DegradeReason::EncodeFailed => {
                    format!("{} encoding frame: {}", ERROR_MARKER, detail)
                }
            },
        }
    }
}

/// 单帧分析记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub frame_index: u64,
    pub timestamp_seconds: f64,
    pub outcome: AnalysisOutcome,
}

impl FrameAnalysis {
    pub fn text(&self) -> String {
        self.outcome.to_text()
    }

    /// 汇总输入中的一条记录
    pub fn combined_entry(&self) -> String {
        format!(
            "[Frame {} at {:.1}s]: {}",
            self.frame_index,
            self.timestamp_seconds,
            self.text()
        )
    }
}

/// 追加顺序错误
#[derive(Debug, thiserror::Error)]
#[error("帧序号必须严格递增: 上一帧 {last}, 新帧 {got}")]
pub struct OutOfOrderFrame {
    pub last: u64,
    pub got: u64,
}

/// 分析批次（只追加，按帧序号严格递增）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisBatch {
    entries: Vec<FrameAnalysis>,
}

impl AnalysisBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, analysis: FrameAnalysis) -> Result<(), OutOfOrderFrame> {
        if let Some(last) = self.entries.last() {
            if analysis.frame_index <= last.frame_index {
                return Err(OutOfOrderFrame {
                    last: last.frame_index,
                    got: analysis.frame_index,
                });
            }
        }
        self.entries.push(analysis);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FrameAnalysis] {
        &self.entries
    }

    pub fn degraded_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome.is_degraded())
            .count()
    }

    /// 按帧顺序拼接所有分析，作为汇总请求的输入
    pub fn combined_text(&self) -> String {
        self.entries
            .iter()
            .map(FrameAnalysis::combined_entry)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// 模型角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Primary,
    Fallback,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// 报告状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// 报告生成成功（执行摘要可能缺失）
    Completed,
    /// 没有任何帧被分析
    Empty,
    /// 主模型与备用模型均生成失败
    Failed,
}

/// 最终报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub status: ReportStatus,
    /// 完整报告正文（含执行摘要段落）
    pub body: String,
    pub executive_summary: Option<String>,
    /// 实际生成报告的模型
    pub model: Option<String>,
    pub frames_analyzed: usize,
    pub duration_seconds: f64,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// 空批次哨兵报告
    pub fn empty(run_id: &str, duration_seconds: f64) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: ReportStatus::Empty,
            body: EMPTY_BATCH_BODY.to_string(),
            executive_summary: None,
            model: None,
            frames_analyzed: 0,
            duration_seconds,
            generated_at: Utc::now(),
        }
    }

    /// 带错误说明的失败报告
    pub fn failed(
        run_id: &str,
        message: String,
        frames_analyzed: usize,
        duration_seconds: f64,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: ReportStatus::Failed,
            body: message,
            executive_summary: None,
            model: None,
            frames_analyzed,
            duration_seconds,
            generated_at: Utc::now(),
        }
    }

    /// 成功报告：正文后追加执行摘要段落，摘要缺失时写入占位文本
    pub fn completed(
        run_id: &str,
        model: &str,
        report_text: &str,
        digest: Option<String>,
        frames_analyzed: usize,
        duration_seconds: f64,
    ) -> Self {
        let banner = "=".repeat(BANNER_WIDTH);
        let digest_text = digest.as_deref().unwrap_or(DIGEST_PLACEHOLDER);
        let body = format!(
            "{}\n\n{}\n{}\n{}\n\n{}\n\n{}\n",
            report_text, banner, EXECUTIVE_SUMMARY_HEADING, banner, digest_text, banner
        );

        Self {
            run_id: run_id.to_string(),
            status: ReportStatus::Completed,
            body,
            executive_summary: digest,
            model: Some(model.to_string()),
            frames_analyzed,
            duration_seconds,
            generated_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ReportStatus::Failed
    }
}
