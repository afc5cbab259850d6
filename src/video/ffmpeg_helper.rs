// FFmpeg辅助模块 - 定位系统中的 ffmpeg / ffprobe 可执行文件

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 常见安装路径
const COMMON_DIRS: &[&str] = &[
    "/opt/homebrew/bin", // Apple Silicon Homebrew
    "/usr/local/bin",    // Intel Homebrew / 手动安装
    "/opt/local/bin",    // MacPorts
    "/usr/bin",          // Linux 发行版
];

fn executable_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

/// 执行 `-version` 验证工具可用
fn is_runnable(path: &Path) -> bool {
    let mut command = std::process::Command::new(path);
    command.arg("-version");

    // Windows下隐藏控制台窗口
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    matches!(command.output(), Ok(output) if output.status.success())
}

/// 查找工具：先尝试常见路径，再尝试 PATH
fn locate_tool(tool: &str) -> Result<PathBuf> {
    let name = executable_name(tool);

    for dir in COMMON_DIRS {
        let path = Path::new(dir).join(&name);
        if path.exists() && is_runnable(&path) {
            debug!("使用系统{}: {:?}", tool, path);
            return Ok(path);
        }
    }

    let from_path = PathBuf::from(&name);
    if is_runnable(&from_path) {
        debug!("使用PATH中的{}", tool);
        return Ok(from_path);
    }

    Err(anyhow!(
        "未找到{}。请先安装 FFmpeg（例如 brew install ffmpeg 或 apt install ffmpeg）",
        tool
    ))
}

/// 获取FFmpeg可执行文件的路径
pub fn get_ffmpeg_path() -> Result<PathBuf> {
    locate_tool("ffmpeg")
}

/// 获取ffprobe可执行文件的路径
pub fn get_ffprobe_path() -> Result<PathBuf> {
    locate_tool("ffprobe")
}

/// 检查FFmpeg是否可用
pub async fn check_ffmpeg_available() -> bool {
    match tokio::task::spawn_blocking(|| (get_ffmpeg_path(), get_ffprobe_path())).await {
        Ok((Ok(ffmpeg), Ok(ffprobe))) => {
            info!("FFmpeg可用: {:?}, {:?}", ffmpeg, ffprobe);
            true
        }
        Ok((Err(e), _)) | Ok((_, Err(e))) => {
            warn!("FFmpeg不可用: {}", e);
            false
        }
        Err(e) => {
            warn!("FFmpeg检测任务失败: {}", e);
            false
        }
    }
}
