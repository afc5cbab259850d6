//! 流水线驱动
//!
//! 打开视频源，逐帧驱动采样器与分析器，按模式判断停止条件，最后交给汇总器。
//! 单次运行严格串行：当前帧分析返回之前不会读取下一帧。

use super::{Aggregator, FrameAnalyzer, FrameContext};
use crate::event_bus::{EventBus, PipelineEvent};
use crate::llm::{GroqProvider, LLMProvider, LlmConfig};
use crate::models::{new_run_id, AnalysisBatch, AnalysisOutcome, DegradeReason, FrameAnalysis, Report};
use crate::settings::{ConfigError, RunConfig, RunMode, PACING_DELAY};
use crate::video::{
    CameraDevice, FfmpegFrameSource, FrameSampler, FrameSource, SamplerStep, SourceUnavailable,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 在分析任何帧之前发生的致命错误
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailable),
}

/// 单次运行参数
#[derive(Clone)]
pub struct PipelineOptions {
    pub run_id: String,
    pub llm: LlmConfig,
    /// 采样步长
    pub stride: u64,
    /// 每分析一帧后的等待时间
    pub pacing: Duration,
    pub events: Option<EventBus>,
}

impl PipelineOptions {
    pub fn new(llm: LlmConfig, stride: u64) -> Self {
        Self {
            run_id: new_run_id(),
            llm,
            stride,
            pacing: PACING_DELAY,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// 采样阶段的结果
pub struct Collected {
    pub batch: AnalysisBatch,
    pub duration_seconds: f64,
}

/// 单次运行中的逐帧记录
struct FrameLoop<'a> {
    options: &'a PipelineOptions,
    analyzer: FrameAnalyzer,
    batch: AnalysisBatch,
}

impl<'a> FrameLoop<'a> {
    fn new(options: &'a PipelineOptions, provider: Arc<dyn LLMProvider>) -> Self {
        let analyzer = FrameAnalyzer::new(
            provider,
            options.llm.model.clone(),
            options.llm.request_timeout(),
        );
        Self {
            options,
            analyzer,
            batch: AnalysisBatch::new(),
        }
    }

    /// 处理一步；返回是否发起了分析调用
    async fn handle(&mut self, step: SamplerStep, total: Option<u64>, elapsed: Option<f64>) -> bool {
        let (analysis, analyzed) = match step {
            SamplerStep::Skipped { .. } => return false,
            SamplerStep::Sample(sample) => {
                match elapsed {
                    Some(elapsed) => info!("[ANALYZING] Frame {} (Time: {:.1}s)", sample.index, elapsed),
                    None => info!("[ANALYZING] Frame {}", sample.index),
                }
                let context = match elapsed {
                    Some(elapsed) => FrameContext::live(sample.index, elapsed),
                    None => FrameContext::file(sample.index, total),
                };
                let outcome = self.analyzer.analyze(&sample, &context).await;
                let analysis = FrameAnalysis {
                    frame_index: sample.index,
                    timestamp_seconds: sample.timestamp_seconds,
                    outcome,
                };
                (analysis, true)
            }
            SamplerStep::EncodeFailed {
                index,
                timestamp_seconds,
                reason,
            } => {
                let analysis = FrameAnalysis {
                    frame_index: index,
                    timestamp_seconds,
                    outcome: AnalysisOutcome::Degraded {
                        reason: DegradeReason::EncodeFailed,
                        detail: reason,
                    },
                };
                (analysis, false)
            }
        };

        self.options.publish(PipelineEvent::FrameAnalyzed {
            run_id: self.options.run_id.clone(),
            frame_index: analysis.frame_index,
            timestamp_seconds: analysis.timestamp_seconds,
            degraded: analysis.outcome.is_degraded(),
        });

        if let Err(e) = self.batch.push(analysis) {
            warn!("丢弃乱序帧: {}", e);
        }
        analyzed
    }

    fn finish(self, duration_seconds: f64) -> Collected {
        info!(
            "采样结束: 共分析 {} 帧 ({} 帧降级), 时长 {:.1}s",
            self.batch.len(),
            self.batch.degraded_count(),
            duration_seconds
        );
        self.options.publish(PipelineEvent::SamplingFinished {
            run_id: self.options.run_id.clone(),
            frames_analyzed: self.batch.len(),
            elapsed_seconds: duration_seconds,
        });
        Collected {
            batch: self.batch,
            duration_seconds,
        }
    }
}

/// 文件模式采样：读到流结束为止
pub async fn collect_file<S: FrameSource>(
    source: S,
    provider: Arc<dyn LLMProvider>,
    options: &PipelineOptions,
) -> Collected {
    let total = source.total_frames();
    let fps = source.frame_rate();
    info!(
        "[VIDEO] 开始分析视频文件: 每 {} 帧分析一帧, 共 {} 帧",
        options.stride.max(1),
        total.map(|n| n.to_string()).unwrap_or_else(|| "未知".to_string())
    );

    let mut sampler = FrameSampler::for_file(source, options.stride);
    let mut frames = FrameLoop::new(options, provider);

    while let Some(step) = sampler.advance().await {
        if frames.handle(step, total, None).await {
            tokio::time::sleep(options.pacing).await;
        }
    }

    let frame_count = total.unwrap_or_else(|| sampler.frames_read());
    let duration_seconds = if fps > 0.0 {
        frame_count as f64 / fps
    } else {
        0.0
    };
    frames.finish(duration_seconds)
}

/// 实时模式采样：超出时长预算或收到取消后停止，每读一帧检查一次
pub async fn collect_live<S: FrameSource>(
    source: S,
    provider: Arc<dyn LLMProvider>,
    options: &PipelineOptions,
    budget: Duration,
    cancel: &CancellationToken,
) -> Collected {
    info!(
        "[LIVE] 开始实时采集: 时长 {}s, 每 {} 帧分析一帧",
        budget.as_secs_f64(),
        options.stride.max(1)
    );

    let started = Instant::now();
    let mut sampler = FrameSampler::for_live(source, options.stride, started);
    let mut frames = FrameLoop::new(options, provider);

    let deadline = started
        .checked_add(budget)
        .unwrap_or_else(|| started + Duration::from_secs(u64::from(u32::MAX)));
    loop {
        // 读帧可能卡住（摄像头无画面），与截止时间和取消信号竞争
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("采集已取消");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!("已达到时长预算 {:.1}s，停止采集", budget.as_secs_f64());
                break;
            }
            step = sampler.advance() => step,
        };
        let Some(step) = step else { break };

        let elapsed = started.elapsed();
        if elapsed >= budget {
            info!("已达到时长预算 {:.1}s，停止采集", budget.as_secs_f64());
            break;
        }
        if cancel.is_cancelled() {
            info!("采集已取消");
            break;
        }

        if frames.handle(step, None, Some(elapsed.as_secs_f64())).await {
            tokio::select! {
                _ = tokio::time::sleep(options.pacing) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    frames.finish(started.elapsed().as_secs_f64())
}

/// 文件模式完整运行
pub async fn run_file<S: FrameSource>(
    source: S,
    provider: Arc<dyn LLMProvider>,
    options: &PipelineOptions,
) -> Report {
    options.publish(PipelineEvent::RunStarted {
        run_id: options.run_id.clone(),
        mode: RunMode::File,
    });
    let collected = collect_file(source, provider.clone(), options).await;
    aggregate(collected, provider, options).await
}

/// 实时模式完整运行
pub async fn run_live<S: FrameSource>(
    source: S,
    provider: Arc<dyn LLMProvider>,
    options: &PipelineOptions,
    budget: Duration,
    cancel: &CancellationToken,
) -> Report {
    options.publish(PipelineEvent::RunStarted {
        run_id: options.run_id.clone(),
        mode: RunMode::Live,
    });
    let collected = collect_live(source, provider.clone(), options, budget, cancel).await;
    aggregate(collected, provider, options).await
}

async fn aggregate(
    collected: Collected,
    provider: Arc<dyn LLMProvider>,
    options: &PipelineOptions,
) -> Report {
    let mut aggregator = Aggregator::new(options.run_id.clone(), provider, &options.llm);
    if let Some(events) = &options.events {
        aggregator = aggregator.with_events(events.clone());
    }
    aggregator
        .aggregate(&collected.batch, collected.duration_seconds)
        .await
}

/// 按运行配置打开视频源并执行完整流水线
pub async fn run_with_config(
    config: &RunConfig,
    events: Option<EventBus>,
    cancel: &CancellationToken,
) -> Result<Report, PipelineError> {
    let api_key = config.validate()?;
    let llm = LlmConfig::for_run(api_key, config.model.clone());

    let client = llm.build_http_client().unwrap_or_else(|e| {
        warn!("HTTP 客户端构建失败，使用默认配置: {}", e);
        reqwest::Client::new()
    });
    let provider: Arc<dyn LLMProvider> = Arc::new(GroqProvider::new(client, &llm));

    let mut options = PipelineOptions::new(llm, config.frame_interval);
    if let Some(events) = events {
        options = options.with_events(events);
    }
    info!(
        "运行 {} 使用 {} 模型 {}",
        options.run_id,
        provider.name(),
        options.llm.model
    );

    match config.mode {
        RunMode::File => {
            let path = config.video_path.as_ref().ok_or(ConfigError::MissingVideoPath)?;
            let source = FfmpegFrameSource::open_file(path).await?;
            Ok(run_file(source, provider, &options).await)
        }
        RunMode::Live => {
            let camera = config
                .camera
                .as_ref()
                .map(|device| CameraDevice::with_device(device.clone()))
                .unwrap_or_else(CameraDevice::platform_default);
            let source = FfmpegFrameSource::open_camera(&camera).await?;
            Ok(run_live(source, provider, &options, config.duration_budget(), cancel).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::{api_error, ScriptedProvider};
    use crate::llm::DEFAULT_MODEL;
    use crate::models::{ReportStatus, ERROR_MARKER};
    use crate::video::sampler::tests::FakeSource;
    use crate::video::eligible_indices;

    fn options(stride: u64) -> PipelineOptions {
        PipelineOptions::new(LlmConfig::for_run("k".into(), None), stride)
    }

    fn frame_calls(provider: &ScriptedProvider) -> usize {
        provider.calls().iter().filter(|c| c.has_image).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_run_samples_every_stride() {
        let provider = Arc::new(ScriptedProvider::always("a person walks"));
        let started = Instant::now();
        let report = run_file(FakeSource::file(150, 30.0), provider.clone(), &options(30)).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.frames_analyzed, 5);
        assert!((report.duration_seconds - 5.0).abs() < 1e-9);
        assert_eq!(frame_calls(&provider), 5);
        // 每帧之后 0.5s 节流
        assert!(started.elapsed() >= Duration::from_millis(2500));

        let calls = provider.calls();
        let report_call = &calls[5];
        assert!(report_call.streamed);
        let mut last_pos = 0;
        for (index, seconds) in [(0, "0.0"), (30, "1.0"), (60, "2.0"), (90, "3.0"), (120, "4.0")] {
            let entry = format!("[Frame {} at {}s]: a person walks", index, seconds);
            let pos = report_call.prompt.find(&entry).unwrap();
            assert!(pos >= last_pos);
            last_pos = pos;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_count_matches_eligible_frames() {
        let provider = Arc::new(ScriptedProvider::always("ok"));
        let collected =
            collect_file(FakeSource::file(100, 25.0), provider, &options(7)).await;

        let indices: Vec<u64> = collected
            .batch
            .entries()
            .iter()
            .map(|e| e.frame_index)
            .collect();
        assert_eq!(indices, eligible_indices(100, 7).collect::<Vec<_>>());
        assert_eq!(indices.len(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vision_failures_still_aggregate() {
        let provider = Arc::new(ScriptedProvider::new(|request| {
            if request.messages.iter().any(|m| m.has_image()) {
                Err(api_error("this model does not support vision"))
            } else {
                Ok("report from degraded frames".to_string())
            }
        }));
        let opts = options(30);
        let collected = collect_file(FakeSource::file(150, 30.0), provider.clone(), &opts).await;

        assert_eq!(collected.batch.len(), 5);
        assert_eq!(collected.batch.degraded_count(), 5);
        for entry in collected.batch.entries() {
            let text = entry.text();
            assert!(text.starts_with(ERROR_MARKER));
            assert!(text.contains(&format!("Model '{}' may not support vision", DEFAULT_MODEL)));
        }

        let report = aggregate(collected, provider, &opts).await;
        assert_eq!(report.status, ReportStatus::Completed);
        assert!(report.body.starts_with("report from degraded frames"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_failure_is_degraded_without_call() {
        let mut source = FakeSource::file(90, 30.0);
        source.broken = vec![30];
        let provider = Arc::new(ScriptedProvider::always("fine"));
        let started = Instant::now();
        let collected = collect_file(source, provider.clone(), &options(30)).await;

        assert_eq!(collected.batch.len(), 3);
        let broken = &collected.batch.entries()[1];
        assert_eq!(broken.frame_index, 30);
        assert!(broken.text().starts_with("Error encoding frame"));
        assert_eq!(frame_calls(&provider), 2);
        // 编码失败的帧不计节流
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_file_gives_empty_report() {
        let provider = Arc::new(ScriptedProvider::always("unused"));
        let report = run_file(FakeSource::file(0, 30.0), provider.clone(), &options(30)).await;

        assert_eq!(report.status, ReportStatus::Empty);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_run_respects_budget() {
        let call = Duration::from_millis(800);
        let provider = Arc::new(ScriptedProvider::always("someone typing").with_delay(call));
        let budget = Duration::from_secs(10);
        let cancel = CancellationToken::new();

        let collected = collect_live(
            FakeSource::camera(30.0),
            provider.clone(),
            &options(30),
            budget,
            &cancel,
        )
        .await;

        let read = 1.0 / 30.0;
        let overshoot = read + call.as_secs_f64() + PACING_DELAY.as_secs_f64();
        assert!(collected.duration_seconds >= 10.0);
        assert!(collected.duration_seconds <= 10.0 + overshoot + 0.01);
        assert!(!collected.batch.is_empty());
        assert_eq!(collected.batch.len(), frame_calls(&provider));

        let timestamps: Vec<f64> = collected
            .batch
            .entries()
            .iter()
            .map(|e| e.timestamp_seconds)
            .collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert!(timestamps.iter().all(|t| *t < 10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_run_stops_on_cancel() {
        let provider = Arc::new(ScriptedProvider::always("ok").with_delay(Duration::from_millis(200)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let report = run_live(
            FakeSource::camera(30.0),
            provider,
            &options(30),
            Duration::from_secs(60),
            &cancel,
        )
        .await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert!(report.duration_seconds >= 3.0);
        assert!(report.duration_seconds < 4.0);
        assert!(report.frames_analyzed > 0);
    }

    fn stalled_camera() -> FakeSource {
        let mut source = FakeSource::camera(30.0);
        source.read_delay = Some(Duration::from_secs(3600));
        source
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_camera_stops_at_budget() {
        let provider = Arc::new(ScriptedProvider::always("unused"));
        let cancel = CancellationToken::new();

        let collected = collect_live(
            stalled_camera(),
            provider.clone(),
            &options(1),
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert!(collected.batch.is_empty());
        assert!((collected.duration_seconds - 5.0).abs() < 0.01);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_camera_stops_on_cancel() {
        let provider = Arc::new(ScriptedProvider::always("unused"));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let collected = collect_live(
            stalled_camera(),
            provider,
            &options(1),
            Duration::from_secs(60),
            &cancel,
        )
        .await;

        assert!(collected.batch.is_empty());
        assert!((collected.duration_seconds - 2.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_is_empty() {
        let provider = Arc::new(ScriptedProvider::always("unused"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = run_live(
            FakeSource::camera(30.0),
            provider.clone(),
            &options(30),
            Duration::from_secs(30),
            &cancel,
        )
        .await;

        assert_eq!(report.status, ReportStatus::Empty);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_config_errors_surface_before_analysis() {
        let config = RunConfig::file("/no/such/clip.mp4");
        let err = run_with_config(&config, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(ConfigError::VideoNotFound(_))));
    }
}
