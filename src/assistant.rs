// 报告问答 - 基于已生成报告回答问题

use crate::llm::{ChatMessage, ChatRequest, LLMProvider, LlmError, CHAT_MODEL};
use std::sync::Arc;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a precise assistant that answers questions about video analysis reports. \
Use the provided report content to answer. If the question is outside the report, \
say you only know what is in the report. Keep answers concise and actionable.";

const CHAT_TEMPERATURE: f64 = 0.3;
const CHAT_MAX_TOKENS: u32 = 800;

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("问题不能为空")]
    EmptyQuestion,
    #[error("问答失败: {0}")]
    Llm(#[from] LlmError),
}

/// 报告问答助手
pub struct ReportAssistant {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl ReportAssistant {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: CHAT_MODEL.to_string(),
        }
    }

    /// 构建对话消息；报告为空时不附带报告内容
    pub fn build_request(&self, report_text: &str, question: &str) -> ChatRequest {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        if !report_text.trim().is_empty() {
            messages.push(ChatMessage::user(format!(
                "Here is the report to use:\n\n{}",
                report_text
            )));
        }
        messages.push(ChatMessage::user(question.trim()));

        ChatRequest::new(&self.model, messages)
            .with_temperature(CHAT_TEMPERATURE)
            .with_max_tokens(CHAT_MAX_TOKENS)
    }

    pub async fn ask(&self, report_text: &str, question: &str) -> Result<String, AssistantError> {
        if question.trim().is_empty() {
            return Err(AssistantError::EmptyQuestion);
        }
        let request = self.build_request(report_text, question);
        debug!("报告问答: {} 条消息, model={}", request.messages.len(), self.model);
        Ok(self.provider.complete(request).await?)
    }
}
