// 视频模块 - 负责视频源解码与帧采样

pub mod decoder;
pub mod ffmpeg_helper;
pub mod sampler;

pub use decoder::{CameraDevice, FfmpegFrameSource};
pub use sampler::{eligible_indices, FrameSampler, SamplerStep};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::path::Path;

/// 默认 JPEG 质量
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// 视频源无法打开
#[derive(Debug, thiserror::Error)]
#[error("无法打开视频源 {target}: {reason}")]
pub struct SourceUnavailable {
    pub target: String,
    pub reason: String,
}

impl SourceUnavailable {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// 解码后的一帧（RGB24）
#[derive(Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// 编码为 JPEG
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            return Err(anyhow!(
                "帧数据长度不匹配: 期望 {} 字节, 实际 {} 字节",
                expected,
                self.data.len()
            ));
        }

        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
        encoder.encode(&self.data, self.width, self.height, ColorType::Rgb8)?;
        Ok(buffer)
    }
}

/// 帧来源：文件解码或摄像头采集
#[async_trait]
pub trait FrameSource: Send {
    /// 名义帧率
    fn frame_rate(&self) -> f64;

    /// 总帧数（实时源未知）
    fn total_frames(&self) -> Option<u64>;

    /// 读取下一帧；`None` 表示流结束，读取失败同样视为结束
    async fn read_frame(&mut self) -> Option<RawFrame>;
}

/// 视频信息
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VideoInfo {
    pub duration: f64,
    pub resolution: (u32, u32),
    pub fps: f64,
    pub total_frames: Option<u64>,
    pub codec: String,
    pub format: String,
    /// 显示时的旋转角度（度），来自容器的旋转元数据
    #[serde(default)]
    pub rotation: i32,
}

impl VideoInfo {
    /// 应用旋转后的显示分辨率，ffmpeg 默认按此尺寸输出
    pub fn display_resolution(&self) -> (u32, u32) {
        let (width, height) = self.resolution;
        if self.rotation.rem_euclid(180) == 90 {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// 通过 ffprobe 获取视频文件信息
    pub async fn probe(video_path: &Path) -> Result<Self> {
        let ffprobe_path = ffmpeg_helper::get_ffprobe_path()?;

        let output = tokio::process::Command::new(&ffprobe_path)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(video_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe 执行失败: {}", output.status));
        }

        let json_str = String::from_utf8(output.stdout)?;
        Self::from_ffprobe_json(&json_str)
    }

    /// 解析 ffprobe 的 JSON 输出
    pub fn from_ffprobe_json(json_str: &str) -> Result<Self> {
        let info: serde_json::Value = serde_json::from_str(json_str)?;

        // 解析视频流信息
        let streams = info["streams"]
            .as_array()
            .ok_or_else(|| anyhow!("无法解析视频流信息"))?;

        let video_stream = streams
            .iter()
            .find(|s| s["codec_type"] == "video")
            .ok_or_else(|| anyhow!("未找到视频流"))?;

        let width = video_stream["width"].as_u64().unwrap_or(0) as u32;
        let height = video_stream["height"].as_u64().unwrap_or(0) as u32;
        if width == 0 || height == 0 {
            return Err(anyhow!("视频分辨率无效: {}x{}", width, height));
        }

        // 优先使用平均帧率，部分容器的 r_frame_rate 是时基倍数
        let fps = video_stream["avg_frame_rate"]
            .as_str()
            .map(parse_frame_rate)
            .filter(|fps| *fps > 0.0)
            .unwrap_or_else(|| parse_frame_rate(video_stream["r_frame_rate"].as_str().unwrap_or("0/1")));

        // 解析格式信息
        let format = &info["format"];
        let duration = video_stream["duration"]
            .as_str()
            .or_else(|| format["duration"].as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        let total_frames = video_stream["nb_frames"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .or_else(|| {
                if duration > 0.0 && fps > 0.0 {
                    Some((duration * fps).round() as u64)
                } else {
                    None
                }
            });

        // 新版 ffprobe 放在 side_data_list，旧版放在 tags.rotate
        let rotation = video_stream["side_data_list"]
            .as_array()
            .and_then(|list| list.iter().find_map(|d| d["rotation"].as_i64()))
            .or_else(|| {
                video_stream["tags"]["rotate"]
                    .as_str()
                    .and_then(|s| s.trim().parse::<i64>().ok())
            })
            .unwrap_or(0) as i32;

        Ok(VideoInfo {
            duration,
            resolution: (width, height),
            fps,
            total_frames,
            codec: video_stream["codec_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            format: format["format_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            rotation,
        })
    }
}

/// 解析帧率字符串（如 "30/1" -> 30.0）
fn parse_frame_rate(rate_str: &str) -> f64 {
    let parts: Vec<&str> = rate_str.split('/').collect();
    if parts.len() == 2 {
        let numerator = parts[0].parse::<f64>().unwrap_or(0.0);
        let denominator = parts[1].parse::<f64>().unwrap_or(1.0);
        if denominator != 0.0 {
            return numerator / denominator;
        }
    } else if parts.len() == 1 {
        return parts[0].parse::<f64>().unwrap_or(0.0);
    }
    0.0
}
