// 流会话 - 单个客户端连接的推流循环
//
// 每个tick：检查通道切换 -> 多路复用器写出一个tick -> 节拍器睡眠剩余时间。
// 取消在每个等待点生效：tick边界、等待数据源、等待对端读取、节拍睡眠。
// 由上游决定节奏的数据源（直采）不额外睡眠。

use common::{ChannelId, ChannelSelection, Result, TickPacer};
use serde::Serialize;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::multiplexer::ChannelMultiplexer;
use super::source::{SourceInfo, StreamSource};

/// 会话结束时的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub source: Option<SourceInfo>,
    pub ticks: u64,
    pub segments: u64,
    pub bytes: u64,
    /// 因停止信号结束
    pub cancelled: bool,
}

/// 流会话
pub struct StreamSession {
    id: Uuid,
    source: Box<dyn StreamSource>,
    multiplexer: ChannelMultiplexer,
    pacer: Option<TickPacer>,
    channel_rx: watch::Receiver<ChannelId>,
}

impl StreamSession {
    /// 创建会话
    ///
    /// # 参数
    ///
    /// - `selection`: 反射模式（全部通道）或单通道
    /// - `tick_rate`: tick周期（秒），上游定节奏时忽略
    /// - `channel_rx`: 运行中切换通道
    pub fn new(
        id: Uuid,
        source: Box<dyn StreamSource>,
        selection: ChannelSelection,
        tick_rate: f64,
        io_timeout: Duration,
        mut channel_rx: watch::Receiver<ChannelId>,
    ) -> Result<Self> {
        let pacer = if source.paced_by_upstream() {
            None
        } else {
            Some(TickPacer::new(tick_rate)?)
        };

        // 初始通道已经体现在 selection 中
        channel_rx.borrow_and_update();

        Ok(Self {
            id,
            source,
            multiplexer: ChannelMultiplexer::new(selection, io_timeout),
            pacer,
            channel_rx,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn info(&self) -> SourceInfo {
        self.source.info()
    }

    /// 推流直到取消、对端断开或出错；无论结果如何都会关闭数据源
    pub async fn run<W>(mut self, sink: &mut W, cancel: &CancellationToken) -> Result<SessionSummary>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let result = self.stream(sink, cancel).await;
        self.source.close().await;
        result
    }

    async fn stream<W>(&mut self, sink: &mut W, cancel: &CancellationToken) -> Result<SessionSummary>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut summary = SessionSummary {
            source: Some(self.source.info()),
            ..SessionSummary::default()
        };

        if let Some(pacer) = self.pacer.as_mut() {
            pacer.start();
        }

        loop {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            if self.channel_rx.has_changed().unwrap_or(false) {
                let channel = *self.channel_rx.borrow_and_update();
                self.source.change_channel(channel);
                self.multiplexer.select(channel);
                info!("Session {} changed channel to {}", self.id, channel);
            }

            let stats = match self
                .multiplexer
                .write_tick(self.source.as_mut(), sink, cancel)
                .await?
            {
                Some(stats) => stats,
                None => {
                    summary.cancelled = true;
                    break;
                }
            };
            summary.ticks += 1;
            summary.segments += stats.segments as u64;
            summary.bytes += stats.bytes as u64;
            debug!(
                "Session {} tick {}: {} segments, {} bytes",
                self.id, summary.ticks, stats.segments, stats.bytes
            );

            if let Some(pacer) = self.pacer.as_mut() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        summary.cancelled = true;
                        break;
                    }
                    _ = pacer.wait_for_next_tick() => {}
                }
            }
        }

        Ok(summary)
    }
}
