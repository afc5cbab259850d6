//! 输入验证工具函数
//!
//! 文件模式的视频输入在交给解码器之前先按扩展名过滤

use std::path::Path;

/// 支持的视频扩展名
pub const ALLOWED_VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "avi", "mov", "mkv", "flv", "wmv", "webm", "m4v"];

/// 验证文件名是否为支持的视频格式（扩展名不区分大小写）
///
/// # 参数
/// - `name`: 文件名或路径
pub fn is_allowed_video(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_VIDEO_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}
