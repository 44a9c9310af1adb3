// 通道多路复用器
//
// 每个tick按通道0..59升序向数据源请求分片，选中的通道立即编码写出，
// 最后调用 end_tick。线上不带通道标签，接收端只靠位置恢复通道。
// 只复用一个分片大小的编码缓冲区。

use bytes::BytesMut;
use common::{codec, ChannelId, ChannelSelection, Result, SampleFormat};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::source::StreamSource;

/// 单个tick的写出统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub segments: usize,
    pub bytes: usize,
}

pub struct ChannelMultiplexer {
    selection: ChannelSelection,
    io_timeout: Duration,
    buffer: BytesMut,
}

impl ChannelMultiplexer {
    pub fn new(selection: ChannelSelection, io_timeout: Duration) -> Self {
        Self {
            selection,
            io_timeout,
            buffer: BytesMut::new(),
        }
    }

    pub fn selection(&self) -> ChannelSelection {
        self.selection
    }

    /// 单通道模式下切换通道，反射模式不受影响
    pub fn select(&mut self, channel: ChannelId) {
        if let ChannelSelection::Single(_) = self.selection {
            self.selection = ChannelSelection::Single(channel);
        }
    }

    /// 写出一个完整tick
    ///
    /// 每个分片整体写出；写入超时或对端断开时返回错误。
    /// 等待数据源或对端期间取消返回 `Ok(None)`：等待分片时取消不会写出任何残缺数据，
    /// 写入被对端阻塞时取消则放弃该分片，会话随即关闭连接。
    pub async fn write_tick<S, W>(
        &mut self,
        source: &mut S,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Option<TickStats>>
    where
        S: StreamSource + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut stats = TickStats::default();

        for channel in ChannelId::all() {
            let segment = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                segment = source.segment(channel) => segment?,
            };
            if !self.selection.includes(channel) {
                continue;
            }

            self.buffer.clear();
            codec::encode_into(&segment.samples, SampleFormat::Float32, &mut self.buffer);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Write of channel {} abandoned on cancel", channel);
                    return Ok(None);
                }
                written = timeout(self.io_timeout, sink.write_all(&self.buffer)) => written??,
            }

            stats.segments += 1;
            stats.bytes += self.buffer.len();
            trace!("Wrote channel {} ({} bytes)", channel, self.buffer.len());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            ended = source.end_tick() => ended?,
        }
        Ok(Some(stats))
    }
}
