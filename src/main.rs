//! action-recognizer 命令行入口
//!
//! 用法:
//!   action-recognizer --mode live --duration 30          摄像头实时分析
//!   action-recognizer --mode file --video clip.mp4       分析视频文件
//!   action-recognizer --list-reports                     列出已保存的报告
//!   action-recognizer --ask "问题" [--report FILE]        基于报告问答

use action_recognizer_lib::assistant::ReportAssistant;
use action_recognizer_lib::llm::{GroqProvider, LLMProvider, LlmConfig};
use action_recognizer_lib::models::ReportStatus;
use action_recognizer_lib::report::summary_excerpt;
use action_recognizer_lib::settings::{
    resolve_api_key, ConfigError, RunConfig, RunMode, DEFAULT_FRAME_INTERVAL,
    DEFAULT_LIVE_DURATION_SECS,
};
use action_recognizer_lib::storage::ReportStore;
use action_recognizer_lib::utils::is_allowed_video;
use action_recognizer_lib::video::ffmpeg_helper::check_ffmpeg_available;
use action_recognizer_lib::{logger, run_with_config, EventBus, PipelineEvent};
use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const BANNER: &str = "============================================================";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// 摄像头实时采集
    Live,
    /// 本地视频文件
    File,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Live => RunMode::Live,
            ModeArg::File => RunMode::File,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "action-recognizer",
    version,
    about = "Action recognition over video frames using a vision LLM"
)]
struct Cli {
    /// 运行模式
    #[arg(long, value_enum, default_value_t = ModeArg::Live)]
    mode: ModeArg,

    /// 视频文件路径（文件模式必填）
    #[arg(long)]
    video: Option<PathBuf>,

    /// Groq API Key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// 每 N 帧分析一帧
    #[arg(long, default_value_t = DEFAULT_FRAME_INTERVAL)]
    interval: u64,

    /// 实时模式时长（秒）
    #[arg(long, default_value_t = DEFAULT_LIVE_DURATION_SECS)]
    duration: u64,

    /// 覆盖主模型
    #[arg(long)]
    model: Option<String>,

    /// 报告保存目录
    #[arg(long, default_value = "reports")]
    reports_dir: PathBuf,

    /// 摄像头设备（默认使用平台默认设备）
    #[arg(long)]
    camera: Option<String>,

    /// 列出已保存的报告
    #[arg(long, conflicts_with = "ask")]
    list_reports: bool,

    /// 基于报告提问
    #[arg(long, value_name = "QUESTION")]
    ask: Option<String>,

    /// 问答使用的报告文件名（默认最新一份）
    #[arg(long, value_name = "FILE", requires = "ask")]
    report: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logger::init()?;

    let store = ReportStore::new(&cli.reports_dir);

    if cli.list_reports {
        return list_reports(&store).await;
    }
    if let Some(question) = &cli.ask {
        return ask_about_report(&cli, &store, question).await;
    }

    analyze(cli, &store).await
}

async fn list_reports(store: &ReportStore) -> Result<()> {
    let reports = store.list().await?;
    if reports.is_empty() {
        println!("{:?} 中没有报告", store.dir());
    }
    for report in reports {
        println!("{}", report.file_name);
    }
    Ok(())
}

async fn ask_about_report(cli: &Cli, store: &ReportStore, question: &str) -> Result<()> {
    let api_key = resolve_api_key(cli.api_key.clone()).ok_or(ConfigError::MissingApiKey)?;

    let file_name = match &cli.report {
        Some(name) => name.clone(),
        None => store
            .list()
            .await?
            .into_iter()
            .next()
            .map(|r| r.file_name)
            .ok_or_else(|| anyhow!("{:?} 中没有可用的报告", store.dir()))?,
    };
    let report_text = store.load(&file_name).await?;
    info!("使用报告 {} 回答问题", file_name);

    let config = LlmConfig::for_run(api_key, None);
    let provider: Arc<dyn LLMProvider> =
        Arc::new(GroqProvider::new(config.build_http_client()?, &config));
    let reply = ReportAssistant::new(provider)
        .ask(&report_text, question)
        .await?;

    println!("{}", reply);
    Ok(())
}

async fn analyze(cli: Cli, store: &ReportStore) -> Result<()> {
    if !check_ffmpeg_available().await {
        warn!("ffmpeg 不可用，视频源将无法打开");
    }

    let config = RunConfig {
        mode: cli.mode.into(),
        video_path: cli.video,
        frame_interval: cli.interval,
        duration_seconds: cli.duration,
        model: cli.model,
        api_key: resolve_api_key(cli.api_key),
        camera: cli.camera,
    };

    if let Some(path) = &config.video_path {
        if !is_allowed_video(&path.to_string_lossy()) {
            warn!("不常见的视频扩展名，仍尝试解码: {:?}", path);
        }
    }

    let cancel = CancellationToken::new();
    // 只有实时模式支持提前结束
    if config.mode == RunMode::Live {
        let trigger = cancel.clone();
        tokio::spawn(async move {
            let mut count = 0;
            while tokio::signal::ctrl_c().await.is_ok() {
                count += 1;
                if on_interrupt(count, &trigger) {
                    std::process::exit(130);
                }
            }
        });
    }

    let events = EventBus::default();
    let printer = tokio::spawn(print_events(events.subscribe()));

    let result = run_with_config(&config, Some(events.clone()), &cancel).await;
    drop(events);
    if let Err(e) = printer.await {
        warn!("事件输出任务异常结束: {}", e);
    }
    let report = result?;

    match report.status {
        ReportStatus::Completed => {
            println!("\n{}\n", BANNER);
            println!("{}", summary_excerpt(&report.body));
        }
        ReportStatus::Empty | ReportStatus::Failed => println!("\n{}", report.body),
    }

    let path = store.save(&report).await?;
    println!("[SAVED] Report saved to: {}", path.display());
    Ok(())
}

/// 处理第 `count` 次 Ctrl-C，返回 true 表示应立即退出
///
/// 第一次只取消采集，流水线仍会汇总已分析的帧；汇总期间再按一次直接退出。
fn on_interrupt(count: u32, cancel: &CancellationToken) -> bool {
    if count <= 1 {
        info!("收到 Ctrl-C，结束采集并生成报告（再按一次立即退出）");
        cancel.cancel();
        false
    } else {
        warn!("再次收到 Ctrl-C，放弃报告并退出");
        true
    }
}

/// 在终端输出进度与流式报告
async fn print_events(mut receiver: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("事件输出落后，丢弃 {} 条", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            PipelineEvent::FrameAnalyzed {
                frame_index,
                timestamp_seconds,
                degraded,
                ..
            } => {
                let mark = if degraded { "[DEGRADED]" } else { "[OK]" };
                println!("Frame {} at {:.1}s {}", frame_index, timestamp_seconds, mark);
            }
            PipelineEvent::ReportStarted { model, .. } => {
                println!("{}\nFINAL VIDEO REPORT ({})\n{}", BANNER, model, BANNER);
            }
            PipelineEvent::ReportChunk { text, .. } => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            PipelineEvent::DigestStarted { .. } => {
                println!("\n\n[SUMMARY] Generating executive summary...");
            }
            _ => {}
        }
    }
}
