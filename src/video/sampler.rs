// 帧采样器 - 从帧源中每隔 N 帧取一帧，打时间戳并编码为 JPEG

use super::{FrameSource, DEFAULT_JPEG_QUALITY};
use crate::models::FrameSample;
use tokio::time::Instant;
use tracing::warn;

/// 时间戳来源
#[derive(Debug, Clone, Copy)]
enum Clock {
    /// 帧序号 / 帧率（文件）
    SourceRate(f64),
    /// 距离开始采集的挂钟时间（摄像头）
    WallClock(Instant),
}

impl Clock {
    fn timestamp(&self, index: u64) -> f64 {
        match *self {
            Clock::SourceRate(fps) if fps > 0.0 => index as f64 / fps,
            Clock::SourceRate(_) => 0.0,
            Clock::WallClock(started) => started.elapsed().as_secs_f64(),
        }
    }
}

/// 每读取一帧产生一步
#[derive(Debug)]
pub enum SamplerStep {
    /// 非采样帧
    Skipped { index: u64 },
    /// 采样帧，已编码
    Sample(FrameSample),
    /// 采样帧编码失败
    EncodeFailed {
        index: u64,
        timestamp_seconds: f64,
        reason: String,
    },
}

impl SamplerStep {
    pub fn index(&self) -> u64 {
        match self {
            SamplerStep::Skipped { index } => *index,
            SamplerStep::Sample(sample) => sample.index,
            SamplerStep::EncodeFailed { index, .. } => *index,
        }
    }
}

/// 帧采样器
///
/// 读取到的每一帧都会产生一个 [`SamplerStep`]，调用方可以在每帧之后检查停止条件。
pub struct FrameSampler<S: FrameSource> {
    source: S,
    stride: u64,
    next_index: u64,
    clock: Clock,
}

impl<S: FrameSource> FrameSampler<S> {
    /// 文件模式：时间戳按源帧率计算
    pub fn for_file(source: S, stride: u64) -> Self {
        let fps = source.frame_rate();
        Self::with_clock(source, stride, Clock::SourceRate(fps))
    }

    /// 实时模式：时间戳按挂钟计算
    pub fn for_live(source: S, stride: u64, started: Instant) -> Self {
        Self::with_clock(source, stride, Clock::WallClock(started))
    }

    fn with_clock(source: S, stride: u64, clock: Clock) -> Self {
        Self {
            source,
            stride: stride.max(1),
            next_index: 0,
            clock,
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// 已读取的帧数
    pub fn frames_read(&self) -> u64 {
        self.next_index
    }

    /// 读取下一帧；源耗尽时返回 `None`
    pub async fn advance(&mut self) -> Option<SamplerStep> {
        let frame = self.source.read_frame().await?;
        let index = self.next_index;
        self.next_index += 1;

        if index % self.stride != 0 {
            return Some(SamplerStep::Skipped { index });
        }

        let timestamp_seconds = self.clock.timestamp(index);
        match frame.encode_jpeg(DEFAULT_JPEG_QUALITY) {
            Ok(encoded_bytes) => Some(SamplerStep::Sample(FrameSample {
                index,
                timestamp_seconds,
                encoded_bytes,
            })),
            Err(e) => {
                warn!("第 {} 帧编码失败: {}", index, e);
                Some(SamplerStep::EncodeFailed {
                    index,
                    timestamp_seconds,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 跳过非采样帧，返回下一个采样结果
    pub async fn next_sample(&mut self) -> Option<SamplerStep> {
        loop {
            match self.advance().await? {
                SamplerStep::Skipped { .. } => continue,
                step => return Some(step),
            }
        }
    }
}

/// 给定总帧数与步长时会被采样的帧序号
pub fn eligible_indices(total_frames: u64, stride: u64) -> impl Iterator<Item = u64> {
    (0..total_frames).step_by(stride.max(1) as usize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::video::RawFrame;
    use async_trait::async_trait;
    use std::time::Duration;

    /// 内存帧源，可指定损坏帧与每帧读取耗时
    pub(crate) struct FakeSource {
        pub fps: f64,
        pub total: Option<u64>,
        pub remaining: u64,
        pub broken: Vec<u64>,
        pub read_delay: Option<Duration>,
        read: u64,
    }

    impl FakeSource {
        pub fn file(frames: u64, fps: f64) -> Self {
            Self {
                fps,
                total: Some(frames),
                remaining: frames,
                broken: Vec::new(),
                read_delay: None,
                read: 0,
            }
        }

        /// 以 `fps` 节奏无限产出帧的摄像头
        pub fn camera(fps: f64) -> Self {
            Self {
                fps,
                total: None,
                remaining: u64::MAX,
                broken: Vec::new(),
                read_delay: Some(Duration::from_secs_f64(1.0 / fps)),
                read: 0,
            }
        }
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        fn frame_rate(&self) -> f64 {
            self.fps
        }

        fn total_frames(&self) -> Option<u64> {
            self.total
        }

        async fn read_frame(&mut self) -> Option<RawFrame> {
            if self.remaining == 0 {
                return None;
            }
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            self.remaining -= 1;
            let index = self.read;
            self.read += 1;

            let data = if self.broken.contains(&index) {
                vec![0; 3]
            } else {
                vec![200; 2 * 2 * 3]
            };
            Some(RawFrame {
                width: 2,
                height: 2,
                data,
            })
        }
    }

    #[tokio::test]
    async fn test_stride_selects_every_nth_frame() {
        let mut sampler = FrameSampler::for_file(FakeSource::file(150, 30.0), 30);
        let mut sampled = Vec::new();
        while let Some(step) = sampler.next_sample().await {
            match step {
                SamplerStep::Sample(sample) => {
                    sampled.push((sample.index, sample.timestamp_seconds))
                }
                other => panic!("unexpected step: {:?}", other),
            }
        }
        assert_eq!(
            sampled,
            vec![(0, 0.0), (30, 1.0), (60, 2.0), (90, 3.0), (120, 4.0)]
        );
        assert_eq!(sampler.frames_read(), 150);
    }

    #[tokio::test]
    async fn test_advance_reports_every_frame() {
        let mut sampler = FrameSampler::for_file(FakeSource::file(4, 30.0), 2);
        let mut steps = Vec::new();
        while let Some(step) = sampler.advance().await {
            steps.push(step);
        }
        assert_eq!(steps.len(), 4);
        assert!(matches!(steps[1], SamplerStep::Skipped { index: 1 }));
        assert!(matches!(steps[2], SamplerStep::Sample(ref s) if s.index == 2));
    }

    #[tokio::test]
    async fn test_zero_fps_gives_zero_timestamp() {
        let mut sampler = FrameSampler::for_file(FakeSource::file(3, 0.0), 1);
        while let Some(step) = sampler.next_sample().await {
            if let SamplerStep::Sample(sample) = step {
                assert_eq!(sample.timestamp_seconds, 0.0);
            }
        }
    }

    #[tokio::test]
    async fn test_zero_stride_treated_as_one() {
        let mut sampler = FrameSampler::for_file(FakeSource::file(3, 30.0), 0);
        assert_eq!(sampler.stride(), 1);
        let mut count = 0;
        while sampler.next_sample().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_encode_failure_is_reported_not_dropped() {
        let mut source = FakeSource::file(3, 30.0);
        source.broken = vec![1];
        let mut sampler = FrameSampler::for_file(source, 1);

        let mut indices = Vec::new();
        let mut failed = Vec::new();
        while let Some(step) = sampler.next_sample().await {
            indices.push(step.index());
            if let SamplerStep::EncodeFailed { index, .. } = step {
                failed.push(index);
            }
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(failed, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_timestamps_follow_wall_clock() {
        let started = Instant::now();
        let mut sampler = FrameSampler::for_live(FakeSource::camera(10.0), 10, started);

        let first = sampler.next_sample().await.unwrap();
        let second = sampler.next_sample().await.unwrap();
        match (first, second) {
            (SamplerStep::Sample(a), SamplerStep::Sample(b)) => {
                assert_eq!(a.index, 0);
                assert_eq!(b.index, 10);
                assert!((a.timestamp_seconds - 0.1).abs() < 1e-6);
                assert!((b.timestamp_seconds - 1.1).abs() < 1e-6);
            }
            other => panic!("unexpected steps: {:?}", other),
        }
    }

    #[test]
    fn test_eligible_indices() {
        assert_eq!(eligible_indices(150, 30).count(), 5);
        assert_eq!(eligible_indices(151, 30).last(), Some(150));
        assert_eq!(eligible_indices(0, 30).count(), 0);
        assert_eq!(eligible_indices(5, 0).count(), 5);
    }
}
