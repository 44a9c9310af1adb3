use common::recording::is_recording_path;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 在数据集根目录下发现的实验
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentInfo {
    /// 握手中使用的实验名称（相对根目录、去掉扩展名）
    pub name: String,
    pub path: PathBuf,
    pub file_size: u64,
}

pub struct ExperimentScanner {
    root: PathBuf,
}

impl ExperimentScanner {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// 扫描根目录（最多两层）下的录制文件，按名称排序
    pub fn scan(&self) -> Vec<ExperimentInfo> {
        let mut experiments = Vec::new();

        if !self.root.exists() {
            warn!("Dataset root does not exist: {:?}", self.root);
            return experiments;
        }

        for entry in WalkDir::new(&self.root)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || !is_recording_path(entry.path()) {
                continue;
            }

            match self.describe(entry.path()) {
                Some(info) => {
                    debug!("Found experiment {} at {:?}", info.name, info.path);
                    experiments.push(info);
                }
                None => warn!("Skipping unreadable recording {:?}", entry.path()),
            }
        }

        experiments.sort_by(|a, b| a.name.cmp(&b.name));
        experiments
    }

    fn describe(&self, path: &Path) -> Option<ExperimentInfo> {
        let relative = path.strip_prefix(&self.root).ok()?.with_extension("");
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let file_size = std::fs::metadata(path).ok()?.len();

        Some(ExperimentInfo {
            name,
            path: path.to_path_buf(),
            file_size,
        })
    }
}
