// 视频动作识别 - 帧采样、视觉模型逐帧分析与汇总报告

// 声明模块
pub mod analysis;
pub mod assistant;
pub mod event_bus;
pub mod llm;
pub mod logger;
pub mod models;
pub mod report;
pub mod settings;
pub mod storage;
pub mod utils;
pub mod video;

// 重新导出常用类型
pub use analysis::{run_with_config, PipelineError};
pub use event_bus::{EventBus, PipelineEvent};
pub use models::{Report, ReportStatus};
pub use settings::{RunConfig, RunMode};
