// 运行配置 - 单次流水线运行的全部显式参数

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// API Key 环境变量
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// 默认采样步长（每 N 帧分析一帧）
pub const DEFAULT_FRAME_INTERVAL: u64 = 30;

/// 实时模式默认时长（秒）
pub const DEFAULT_LIVE_DURATION_SECS: u64 = 30;

/// 每分析一帧后的节流间隔
pub const PACING_DELAY: Duration = Duration::from_millis(500);

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// 摄像头实时采集
    Live,
    /// 本地视频文件
    File,
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("缺少 API Key，请通过 --api-key 参数或 GROQ_API_KEY 环境变量提供")]
    MissingApiKey,
    #[error("文件模式需要提供 --video 路径")]
    MissingVideoPath,
    #[error("视频文件不存在: {0}")]
    VideoNotFound(PathBuf),
    #[error("帧间隔必须为正整数")]
    InvalidInterval,
    #[error("实时模式时长必须大于 0 秒")]
    InvalidDuration,
}

fn default_frame_interval() -> u64 {
    DEFAULT_FRAME_INTERVAL
}

fn default_duration() -> u64 {
    DEFAULT_LIVE_DURATION_SECS
}

/// 单次运行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub mode: RunMode,
    /// 视频路径（仅文件模式）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(default = "default_frame_interval")]
    pub frame_interval: u64,
    /// 时长预算（仅实时模式）
    #[serde(default = "default_duration")]
    pub duration_seconds: u64,
    /// 覆盖主模型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// 摄像头设备（为空时使用平台默认设备）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
}

impl RunConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: RunMode::File,
            video_path: Some(path.into()),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            duration_seconds: DEFAULT_LIVE_DURATION_SECS,
            model: None,
            api_key: None,
            camera: None,
        }
    }

    pub fn live() -> Self {
        Self {
            mode: RunMode::Live,
            video_path: None,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            duration_seconds: DEFAULT_LIVE_DURATION_SECS,
            model: None,
            api_key: None,
            camera: None,
        }
    }

    /// 时长预算
    pub fn duration_budget(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    /// 校验配置，返回已确认存在的 API Key
    pub fn validate(&self) -> Result<String, ConfigError> {
        if self.frame_interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        match self.mode {
            RunMode::File => {
                let path = self
                    .video_path
                    .as_ref()
                    .ok_or(ConfigError::MissingVideoPath)?;
                if !path.exists() {
                    return Err(ConfigError::VideoNotFound(path.clone()));
                }
            }
            RunMode::Live => {
                if self.duration_seconds == 0 {
                    return Err(ConfigError::InvalidDuration);
                }
            }
        }

        self.api_key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
            .cloned()
            .ok_or(ConfigError::MissingApiKey)
    }
}

/// 解析 API Key：显式参数优先，其次环境变量
pub fn resolve_api_key(explicit: Option<String>) -> Option<String> {
    resolve_api_key_from(explicit, std::env::var(API_KEY_ENV).ok())
}

fn resolve_api_key_from(explicit: Option<String>, env_value: Option<String>) -> Option<String> {
    explicit
        .filter(|k| !k.trim().is_empty())
        .or_else(|| env_value.filter(|k| !k.trim().is_empty()))
}
