// 存储模块 - 报告文本文件的保存、列举与读取

use crate::models::Report;
use anyhow::{anyhow, Result};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

const REPORT_PREFIX: &str = "video_report_";
const REPORT_EXTENSION: &str = "txt";

/// 已保存的报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub file_name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// 报告文件存储
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 报告文件名
    pub fn file_name_for(run_id: &str) -> String {
        format!("{}{}.{}", REPORT_PREFIX, run_id, REPORT_EXTENSION)
    }

    /// 保存报告正文，返回文件路径
    pub async fn save(&self, report: &Report) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name_for(&report.run_id));
        tokio::fs::write(&path, report.body.as_bytes()).await?;
        info!("报告已保存: {:?}", path);
        Ok(path)
    }

    /// 列出所有报告，最新的在前
    pub async fn list(&self) -> Result<Vec<StoredReport>> {
        let mut reports = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(reports),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !is_report_file(&file_name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            reports.push(StoredReport {
                file_name,
                path: entry.path(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        reports.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        debug!("共找到 {} 份报告", reports.len());
        Ok(reports)
    }

    /// 按文件名读取报告正文
    pub async fn load(&self, file_name: &str) -> Result<String> {
        let path = self.resolve(file_name)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow!("读取报告失败 {}: {}", file_name, e))?;
        Ok(text)
    }

    /// 只接受存储目录下的单层文件名
    fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        let candidate = Path::new(file_name);
        let mut components = candidate.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(candidate)),
            _ => Err(anyhow!("无效的报告文件名: {}", file_name)),
        }
    }
}

fn is_report_file(file_name: &str) -> bool {
    file_name.starts_with(REPORT_PREFIX)
        && Path::new(file_name)
            .extension()
            .map(|ext| ext == REPORT_EXTENSION)
            .unwrap_or(false)
}
