// 事件总线 - 流水线进度通知
//
// 实现发布/订阅模式，流水线只负责发布，CLI 等消费者按需订阅
// 使用 tokio::sync::broadcast 实现事件分发

use crate::models::{ModelRole, ReportStatus};
use crate::settings::RunMode;
use tokio::sync::broadcast;

/// 流水线事件
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    // --- 采样与分析 ---

    /// 运行开始
    RunStarted { run_id: String, mode: RunMode },

    /// 单帧分析完成（含降级）
    FrameAnalyzed {
        run_id: String,
        frame_index: u64,
        timestamp_seconds: f64,
        degraded: bool,
    },

    /// 采样结束，进入汇总
    SamplingFinished {
        run_id: String,
        frames_analyzed: usize,
        elapsed_seconds: f64,
    },

    // --- 汇总 ---

    /// 开始用某个模型生成报告
    ReportStarted {
        run_id: String,
        model: String,
        role: ModelRole,
    },

    /// 报告流式片段
    ReportChunk { run_id: String, text: String },

    /// 开始生成执行摘要
    DigestStarted { run_id: String, model: String },

    /// 报告生成结束
    ReportFinished { run_id: String, status: ReportStatus },
}

/// 事件总线
///
/// 支持多个订阅者同时接收事件，克隆后共享同一通道
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    ///
    /// # 参数
    /// - `capacity`: 事件缓冲区大小。流式报告片段较多，建议不低于 256
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件
    ///
    /// 如果没有订阅者，事件会被丢弃（这是正常的）
    pub fn publish(&self, event: PipelineEvent) {
        match self.sender.send(event) {
            Ok(receiver_count) => {
                tracing::trace!("事件已发布，订阅者数量: {}", receiver_count);
            }
            Err(_) => {
                tracing::trace!("事件已发布但无订阅者");
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// 获取当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_basic() {
        let bus = EventBus::new(16);
        let mut receiver = bus.subscribe();

        bus.publish(PipelineEvent::ReportChunk {
            run_id: "r1".to_string(),
            text: "Overall".to_string(),
        });

        match receiver.recv().await {
            Ok(PipelineEvent::ReportChunk { run_id, text }) => {
                assert_eq!(run_id, "r1");
                assert_eq!(text, "Overall");
            }
            _ => panic!("未收到预期事件"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_share_clone() {
        let bus = EventBus::new(16);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(PipelineEvent::RunStarted {
            run_id: "r1".to_string(),
            mode: RunMode::Live,
        });

        assert!(receiver1.try_recv().is_ok());
        assert!(receiver2.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(PipelineEvent::ReportFinished {
            run_id: "r1".to_string(),
            status: ReportStatus::Empty,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
