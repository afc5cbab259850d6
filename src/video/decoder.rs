//! FFmpeg 帧解码
//!
//! 通过 ffmpeg 子进程把文件或摄像头解码成 RGB24 原始帧，从 stdout 逐帧读取。
//! 进程随 `FfmpegFrameSource` 一起释放（kill_on_drop）。

use super::{ffmpeg_helper, FrameSource, RawFrame, SourceUnavailable, VideoInfo};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// 摄像头默认帧率
const CAMERA_FPS: u32 = 30;

/// 摄像头输出分辨率
const CAMERA_RESOLUTION: (u32, u32) = (640, 480);

/// 等待摄像头第一帧的时间
const CAMERA_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// 保留的 ffmpeg 错误输出行数
const STDERR_TAIL_LINES: usize = 20;

/// 摄像头设备描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// ffmpeg 输入格式（v4l2 / avfoundation / dshow）
    pub input_format: String,
    /// 设备标识
    pub device: String,
}

impl CameraDevice {
    /// 当前平台的默认摄像头
    pub fn platform_default() -> Self {
        let (input_format, device) = if cfg!(target_os = "macos") {
            ("avfoundation", "0")
        } else if cfg!(target_os = "windows") {
            ("dshow", "video=Integrated Camera")
        } else {
            ("v4l2", "/dev/video0")
        };
        Self {
            input_format: input_format.to_string(),
            device: device.to_string(),
        }
    }

    /// 使用指定设备，输入格式沿用平台默认
    pub fn with_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::platform_default()
        }
    }
}

/// 基于 ffmpeg 子进程的帧源
pub struct FfmpegFrameSource {
    _child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frame_rate: f64,
    total_frames: Option<u64>,
    /// 打开摄像头时预读的第一帧
    pending: Option<RawFrame>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl FfmpegFrameSource {
    /// 打开视频文件
    pub async fn open_file(path: &Path) -> Result<Self, SourceUnavailable> {
        let target = path.display().to_string();
        if !path.exists() {
            return Err(SourceUnavailable::new(target, "文件不存在"));
        }

        let info = VideoInfo::probe(path)
            .await
            .map_err(|e| SourceUnavailable::new(&target, e.to_string()))?;

        let resolution = info.display_resolution();
        info!(
            "视频信息: {} 帧, {:.2} FPS, {:.2} 秒, {}x{}, 旋转 {}°",
            info.total_frames
                .map(|n| n.to_string())
                .unwrap_or_else(|| "未知".to_string()),
            info.fps,
            info.duration,
            resolution.0,
            resolution.1,
            info.rotation
        );

        let input_args = vec!["-i".to_string(), path.to_string_lossy().to_string()];
        Self::spawn(&target, input_args, resolution, info.fps, info.total_frames)
    }

    /// 打开摄像头，读到第一帧才算打开成功
    pub async fn open_camera(camera: &CameraDevice) -> Result<Self, SourceUnavailable> {
        let target = format!("{}:{}", camera.input_format, camera.device);
        let (width, height) = CAMERA_RESOLUTION;

        let input_args = vec![
            "-f".to_string(),
            camera.input_format.clone(),
            "-framerate".to_string(),
            CAMERA_FPS.to_string(),
            "-video_size".to_string(),
            format!("{}x{}", width, height),
            "-i".to_string(),
            camera.device.clone(),
        ];

        let mut source =
            Self::spawn(&target, input_args, CAMERA_RESOLUTION, CAMERA_FPS as f64, None)?;

        match tokio::time::timeout(CAMERA_OPEN_TIMEOUT, source.read_raw()).await {
            Ok(Some(frame)) => {
                info!("摄像头已打开: {}", target);
                source.pending = Some(frame);
                Ok(source)
            }
            Ok(None) => Err(SourceUnavailable::new(target, source.stderr_summary())),
            Err(_) => Err(SourceUnavailable::new(
                target,
                format!("{} 秒内未读取到画面", CAMERA_OPEN_TIMEOUT.as_secs()),
            )),
        }
    }

    fn spawn(
        target: &str,
        input_args: Vec<String>,
        resolution: (u32, u32),
        frame_rate: f64,
        total_frames: Option<u64>,
    ) -> Result<Self, SourceUnavailable> {
        let ffmpeg_path = ffmpeg_helper::get_ffmpeg_path()
            .map_err(|e| SourceUnavailable::new(target, e.to_string()))?;

        let (width, height) = resolution;
        let mut command = Command::new(&ffmpeg_path);
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .args(&input_args)
            .args(output_args(width, height))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("FFmpeg命令: {:?}", command);

        let mut child = command
            .spawn()
            .map_err(|e| SourceUnavailable::new(target, format!("无法启动 ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceUnavailable::new(target, "无法获取 ffmpeg 输出"))?;

        // 持续读取 stderr，避免管道写满阻塞 ffmpeg
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg: {}", line);
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            });
        }

        Ok(Self {
            _child: child,
            stdout,
            width,
            height,
            frame_rate,
            total_frames,
            pending: None,
            stderr_tail,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    async fn read_raw(&mut self) -> Option<RawFrame> {
        let mut data = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut data).await {
            Ok(_) => Some(RawFrame {
                width: self.width,
                height: self.height,
                data,
            }),
            Err(e) => {
                debug!("帧读取结束: {}", e);
                None
            }
        }
    }

    fn stderr_summary(&self) -> String {
        let tail = self
            .stderr_tail
            .lock()
            .map(|t| t.iter().cloned().collect::<Vec<_>>().join("; "))
            .unwrap_or_default();
        if tail.is_empty() {
            warn!("ffmpeg 未输出任何画面");
            "ffmpeg 未输出任何画面（设备可能被占用）".to_string()
        } else {
            tail
        }
    }
}

/// ffmpeg 输出参数
///
/// 输出尺寸固定为读取时使用的帧大小，逐帧输出保证帧序号与源一致。
fn output_args(width: u32, height: u32) -> Vec<String> {
    vec![
        "-vf".to_string(),
        format!("scale={}:{}", width, height),
        "-vsync".to_string(),
        "0".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "pipe:1".to_string(),
    ]
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    async fn read_frame(&mut self) -> Option<RawFrame> {
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }
        self.read_raw().await
    }
}
