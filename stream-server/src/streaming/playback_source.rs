// 回放数据源
//
// 从内存中的数据集按tick切片。所有通道共享一个读游标，每个tick前进
// segment_length 个采样；下一个tick会越过最短通道末尾时游标回到0（循环回放）。

use super::source::{SourceInfo, SourceKind, StreamSource};
use async_trait::async_trait;
use common::{ChannelId, Dataset, Result, Segment, StreamError};
use std::sync::Arc;
use tracing::debug;

/// 回放数据源
///
/// 数据集以 `Arc` 共享，多个会话同时回放同一实验时不复制数据。
///
/// # 示例
///
/// ```rust,ignore
/// let dataset = catalog.load("default").await?;
/// let mut source = PlaybackSource::new("default", dataset, 100)?;
/// let segment = source.segment(ChannelId::new(5)?).await?;
/// source.end_tick().await?;
/// ```
pub struct PlaybackSource {
    experiment: String,
    dataset: Arc<Dataset>,
    segment_length: usize,
    /// 当前tick的起始采样
    cursor: usize,
    /// 已回放的完整轮数
    loops: u64,
}

impl PlaybackSource {
    /// 创建回放数据源
    ///
    /// 数据集短于一个分片时返回 `Dataset` 错误。
    pub fn new(
        experiment: impl Into<String>,
        dataset: Arc<Dataset>,
        segment_length: usize,
    ) -> Result<Self> {
        if segment_length == 0 {
            return Err(StreamError::InvalidParameter(
                "segment length must be positive".to_string(),
            ));
        }
        if dataset.len() < segment_length {
            return Err(StreamError::Dataset(format!(
                "dataset has {} samples per channel, shorter than one segment ({})",
                dataset.len(),
                segment_length
            )));
        }

        let experiment = experiment.into();
        debug!(
            "Creating PlaybackSource for {}: {} samples/channel, segment_length={}",
            experiment,
            dataset.len(),
            segment_length
        );

        Ok(Self {
            experiment,
            dataset,
            segment_length,
            cursor: 0,
            loops: 0,
        })
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn loops(&self) -> u64 {
        self.loops
    }
}

#[async_trait]
impl StreamSource for PlaybackSource {
    async fn segment(&mut self, channel: ChannelId) -> Result<Segment> {
        let end = self.cursor + self.segment_length;
        Ok(Segment::new(
            self.dataset.channel(channel)[self.cursor..end].to_vec(),
        ))
    }

    async fn end_tick(&mut self) -> Result<()> {
        self.cursor += self.segment_length;
        if self.cursor + self.segment_length > self.dataset.len() {
            self.cursor = 0;
            self.loops += 1;
            debug!("Playback of {} wrapped (loop {})", self.experiment, self.loops);
        }
        Ok(())
    }

    fn change_channel(&mut self, channel: ChannelId) {
        debug!("Playback channel changed to {}, cursor reset", channel);
        self.cursor = 0;
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            kind: SourceKind::Playback,
            segment_length: self.segment_length,
            sample_rate: self.dataset.sample_rate(),
            experiment: Some(self.experiment.clone()),
        }
    }
}
