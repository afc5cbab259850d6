//! 汇总报告生成
//!
//! 两阶段汇总：先流式生成完整报告，再基于报告生成 2-3 句的执行摘要。
//! 主模型被下线时整套流程在备用模型上重跑一次。
//!
//! 状态流转：
//! ```text
//! Report(Primary) -> Digest(Primary) -> 完成
//! Report(Primary) --下线--> Report(Fallback) -> Digest(Fallback) -> 完成
//! Report(*) --其他错误--> 失败
//! ```
//! 执行摘要失败不影响报告状态，使用占位文本。

use super::with_timeout;
use crate::event_bus::{EventBus, PipelineEvent};
use crate::llm::{ChatRequest, LLMProvider, LlmConfig, LlmError};
use crate::models::{AnalysisBatch, ModelRole, Report};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const REPORT_MAX_TOKENS: u32 = 1024;
const DIGEST_MAX_TOKENS: u32 = 256;
const SUMMARY_TEMPERATURE: f64 = 0.7;

/// 完整报告提示词
pub fn report_prompt(combined_analysis: &str, duration_seconds: f64) -> String {
    format!(
        "Based on the following frame-by-frame analysis of a video ({:.1} seconds), create a comprehensive summary report:\n\
         \n\
         {}\n\
         \n\
         Please provide:\n\
         1. Overall summary of the actions and activities observed\n\
         2. Key moments and notable events\n\
         3. Description of participants/objects\n\
         4. Timeline of main activities\n\
         5. Any patterns or trends noticed\n\
         \n\
         Format as a clear, structured report.",
        duration_seconds, combined_analysis
    )
}

/// 执行摘要提示词
pub fn digest_prompt(report_text: &str) -> String {
    format!(
        "Based on the following comprehensive video analysis report, create a brief executive summary (2-3 sentences) that captures the most important points:\n\
         \n\
         {}\n\
         \n\
         Provide a concise summary that highlights:\n\
         - Main activities and actions\n\
         - Key participants or objects\n\
         - Most notable events or moments\n\
         \n\
         Keep it brief and to the point.",
        report_text
    )
}

enum Stage {
    Report(ModelRole),
    Digest { role: ModelRole, report_text: String },
    Failed(String),
}

/// 单次运行的汇总器
pub struct Aggregator {
    run_id: String,
    provider: Arc<dyn LLMProvider>,
    primary_model: String,
    fallback_model: String,
    request_timeout: Duration,
    events: Option<EventBus>,
}

impl Aggregator {
    pub fn new(run_id: impl Into<String>, provider: Arc<dyn LLMProvider>, config: &LlmConfig) -> Self {
        Self {
            run_id: run_id.into(),
            provider,
            primary_model: config.model.clone(),
            fallback_model: config.fallback_model.clone(),
            request_timeout: config.request_timeout(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Primary => &self.primary_model,
            ModelRole::Fallback => &self.fallback_model,
        }
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// 生成最终报告；不会返回错误，失败体现在报告状态中
    pub async fn aggregate(&self, batch: &AnalysisBatch, duration_seconds: f64) -> Report {
        let report = self.run_stages(batch, duration_seconds).await;
        self.publish(PipelineEvent::ReportFinished {
            run_id: self.run_id.clone(),
            status: report.status,
        });
        report
    }

    async fn run_stages(&self, batch: &AnalysisBatch, duration_seconds: f64) -> Report {
        if batch.is_empty() {
            info!("没有可汇总的帧分析，跳过报告生成");
            return Report::empty(&self.run_id, duration_seconds);
        }

        info!(
            "开始生成汇总报告: {} 帧 ({} 帧降级), 时长 {:.1}s",
            batch.len(),
            batch.degraded_count(),
            duration_seconds
        );

        let prompt = report_prompt(&batch.combined_text(), duration_seconds);
        let mut stage = Stage::Report(ModelRole::Primary);

        loop {
            stage = match stage {
                Stage::Report(role) => match self.generate_report(role, &prompt).await {
                    Ok(report_text) => Stage::Digest { role, report_text },
                    Err(e) => self.after_report_failure(role, e),
                },
                Stage::Digest { role, report_text } => {
                    let model = self.model_for(role);
                    let digest = self.generate_digest(model, &report_text).await;
                    info!("汇总报告生成完成 (model={}, role={})", model, role);
                    return Report::completed(
                        &self.run_id,
                        model,
                        &report_text,
                        digest,
                        batch.len(),
                        duration_seconds,
                    );
                }
                Stage::Failed(message) => {
                    error!("汇总报告生成失败: {}", message);
                    return Report::failed(&self.run_id, message, batch.len(), duration_seconds);
                }
            };
        }
    }

    fn after_report_failure(&self, role: ModelRole, e: LlmError) -> Stage {
        match role {
            ModelRole::Primary
                if e.is_model_decommissioned() && self.fallback_model != self.primary_model =>
            {
                warn!(
                    "模型 {} 已下线，改用备用模型 {}: {}",
                    self.primary_model, self.fallback_model, e
                );
                Stage::Report(ModelRole::Fallback)
            }
            ModelRole::Primary => Stage::Failed(format!("Error generating summary: {}", e)),
            ModelRole::Fallback => Stage::Failed(format!(
                "Error generating summary with alternative model: {}",
                e
            )),
        }
    }

    async fn generate_report(&self, role: ModelRole, prompt: &str) -> Result<String, LlmError> {
        let model = self.model_for(role);
        self.publish(PipelineEvent::ReportStarted {
            run_id: self.run_id.clone(),
            model: model.to_string(),
            role,
        });

        let request = ChatRequest::text(model, prompt)
            .with_temperature(SUMMARY_TEMPERATURE)
            .with_max_tokens(REPORT_MAX_TOKENS);

        let on_chunk = |text: &str| {
            self.publish(PipelineEvent::ReportChunk {
                run_id: self.run_id.clone(),
                text: text.to_string(),
            });
        };

        with_timeout(
            self.request_timeout,
            self.provider.complete_stream(request, &on_chunk),
        )
        .await
    }

    /// 执行摘要失败时返回 `None`
    async fn generate_digest(&self, model: &str, report_text: &str) -> Option<String> {
        self.publish(PipelineEvent::DigestStarted {
            run_id: self.run_id.clone(),
            model: model.to_string(),
        });

        let request = ChatRequest::text(model, digest_prompt(report_text))
            .with_temperature(SUMMARY_TEMPERATURE)
            .with_max_tokens(DIGEST_MAX_TOKENS);

        match with_timeout(self.request_timeout, self.provider.complete(request)).await {
            Ok(digest) => {
                let digest = digest.trim();
                if digest.is_empty() {
                    warn!("执行摘要为空，使用占位文本");
                    None
                } else {
                    Some(digest.to_string())
                }
            }
            Err(e) => {
                warn!("无法生成执行摘要: {}", e);
                None
            }
        }
    }
}
