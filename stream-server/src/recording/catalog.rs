use common::recording::recording_file_name;
use common::{Dataset, RawRecordingReader, RecordingReader, Result, StreamError, DEFAULT_EXPERIMENT, DEFAULT_SAMPLE_RATE};
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::scanner::{ExperimentInfo, ExperimentScanner};

/// 实验数据集目录
///
/// 每个实验在进程内只加载一次，之后以 `Arc<Dataset>` 在会话间只读共享。
#[derive(Clone)]
pub struct DatasetCatalog {
    root: PathBuf,
    default_dataset: Option<PathBuf>,
    synthetic_seconds: f64,
    reader: Arc<dyn RecordingReader>,
    cache: Arc<DashMap<String, Arc<Dataset>>>,
}

impl DatasetCatalog {
    pub fn new(root: PathBuf, default_dataset: Option<PathBuf>, synthetic_seconds: f64) -> Self {
        Self::with_reader(
            root,
            default_dataset,
            synthetic_seconds,
            Arc::new(RawRecordingReader::new()),
        )
    }

    /// 使用其他录制格式读取器
    pub fn with_reader(
        root: PathBuf,
        default_dataset: Option<PathBuf>,
        synthetic_seconds: f64,
        reader: Arc<dyn RecordingReader>,
    ) -> Self {
        info!("Initializing dataset catalog at: {:?}", root);
        Self {
            root,
            default_dataset,
            synthetic_seconds,
            reader,
            cache: Arc::new(DashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 实验名称对应的文件；`None` 表示使用合成数据
    pub fn resolve(&self, experiment: &str) -> Result<Option<PathBuf>> {
        if experiment == DEFAULT_EXPERIMENT {
            return Ok(self.default_dataset.clone());
        }

        let relative = recording_file_name(experiment);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if experiment.is_empty() || escapes {
            return Err(StreamError::Dataset(format!(
                "invalid experiment name: {:?}",
                experiment
            )));
        }

        Ok(Some(self.root.join(relative)))
    }

    /// 加载实验（已缓存则直接返回）
    pub async fn load(&self, experiment: &str) -> Result<Arc<Dataset>> {
        if let Some(dataset) = self.cache.get(experiment) {
            return Ok(dataset.value().clone());
        }

        let dataset = match self.resolve(experiment)? {
            Some(path) => {
                let reader = self.reader.clone();
                tokio::task::spawn_blocking(move || reader.read_dataset(&path))
                    .await
                    .map_err(|e| StreamError::Dataset(format!("loader task failed: {}", e)))??
            }
            None => {
                let samples = (self.synthetic_seconds * DEFAULT_SAMPLE_RATE as f64) as usize;
                info!(
                    "No default dataset configured, using {:.1}s of synthetic data",
                    self.synthetic_seconds
                );
                Dataset::synthetic(DEFAULT_SAMPLE_RATE as f64, samples)
            }
        };

        let dataset = Arc::new(dataset);
        // 并发加载同一实验时保留先写入的一份
        let entry = self
            .cache
            .entry(experiment.to_string())
            .or_insert(dataset)
            .value()
            .clone();
        Ok(entry)
    }

    /// 直接登记内存中的数据集
    pub fn insert(&self, experiment: impl Into<String>, dataset: Dataset) {
        self.cache.insert(experiment.into(), Arc::new(dataset));
    }

    /// 列出根目录下可用的实验
    pub fn list(&self) -> Vec<ExperimentInfo> {
        ExperimentScanner::new(self.root.clone()).scan()
    }
}
