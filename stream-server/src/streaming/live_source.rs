// 直采数据源
//
// 持有到远程采集仪器的上游连接。上游每个tick依次发送60个通道的int32分片，
// 不带通道标签；本数据源用分片读取器逐个取出，按请求通道返回，其余丢弃。
// end_tick 会读掉本tick中未被请求的剩余通道，保证与上游对齐。

use super::source::{SourceInfo, SourceKind, StreamSource};
use async_trait::async_trait;
use common::{ChannelId, Result, SampleFormat, Segment, SegmentReader, StreamError, CHANNEL_COUNT};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::DaqConfig;
use crate::instrument::InstrumentClient;

/// 仪器采集占用
///
/// 从发出启动请求起持有，显式 `release` 时通知仪器停止。未释放就被丢弃时
/// （建立连接的过程被取消、数据源未关闭就被丢弃）在后台发出停止请求。
#[derive(Debug)]
struct Acquisition {
    instrument: InstrumentClient,
    held: bool,
}

impl Acquisition {
    fn new(instrument: InstrumentClient) -> Self {
        Self {
            instrument,
            held: true,
        }
    }

    fn instrument(&self) -> &InstrumentClient {
        &self.instrument
    }

    async fn release(&mut self) {
        if std::mem::take(&mut self.held) {
            self.instrument.stop_daq().await;
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if !self.held || self.instrument.is_mock() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("DAQ acquisition dropped without release, stopping in background");
                let instrument = self.instrument.clone();
                let _ = handle.spawn(async move { instrument.stop_daq().await });
            }
            Err(_) => warn!("DAQ acquisition dropped outside the runtime, remote DAQ left running"),
        }
    }
}

/// 直采数据源
///
/// 每个会话独占一个上游连接；关闭时断开连接并通知仪器停止采集。
#[derive(Debug)]
pub struct LiveSource {
    addr: String,
    upstream: TcpStream,
    reader: SegmentReader,
    acquisition: Acquisition,
    sample_rate: u32,
    /// 上游下一个分片所属的通道
    next_upstream: usize,
    io_timeout: Duration,
    closed: bool,
}

impl LiveSource {
    /// 启动远程采集并连接数据端口
    ///
    /// 仪器拒绝连接时返回 `UnresponsiveSource`，不自动重试；返回前通知仪器停止采集。
    pub async fn connect(config: &DaqConfig, io_timeout: Duration) -> Result<Self> {
        let mut acquisition = Acquisition::new(InstrumentClient::new(config));
        if !acquisition
            .instrument()
            .initialize_daq(config.sample_rate, config.segment_length)
            .await
        {
            warn!("Remote DAQ setup failed, trying the data port anyway");
        }

        let addr = config.data_addr();
        let reason = match timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(upstream)) => {
                upstream.set_nodelay(true)?;
                info!(
                    "Connected to DAQ at {} ({} Hz, segment_length={}{})",
                    addr,
                    config.sample_rate,
                    config.segment_length,
                    if config.mock { ", mock" } else { "" }
                );
                return Ok(Self {
                    addr,
                    upstream,
                    reader: SegmentReader::new(config.segment_length, SampleFormat::Int32)?,
                    acquisition,
                    sample_rate: config.sample_rate,
                    next_upstream: 0,
                    io_timeout,
                    closed: false,
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "connect timed out".to_string(),
        };

        acquisition.release().await;
        Err(StreamError::UnresponsiveSource { addr, reason })
    }

    pub fn upstream_addr(&self) -> &str {
        &self.addr
    }

    /// 从上游读取下一个分片
    async fn pump(&mut self) -> Result<Segment> {
        let segment = timeout(self.io_timeout, self.reader.read_segment(&mut self.upstream)).await??;
        self.next_upstream += 1;
        Ok(segment)
    }
}

#[async_trait]
impl StreamSource for LiveSource {
    async fn segment(&mut self, channel: ChannelId) -> Result<Segment> {
        if channel.index() < self.next_upstream {
            return Err(StreamError::InvalidParameter(format!(
                "channel {} requested after channel {} in the same tick",
                channel,
                self.next_upstream - 1
            )));
        }

        loop {
            let upstream_channel = self.next_upstream;
            let segment = self.pump().await?;
            if upstream_channel == channel.index() {
                return Ok(segment);
            }
        }
    }

    async fn end_tick(&mut self) -> Result<()> {
        while self.next_upstream < CHANNEL_COUNT {
            self.pump().await?;
        }
        self.next_upstream = 0;
        Ok(())
    }

    fn change_channel(&mut self, channel: ChannelId) {
        debug!("Live source now serving channel {}", channel);
    }

    fn paced_by_upstream(&self) -> bool {
        true
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            kind: SourceKind::Live,
            segment_length: self.reader.segment_length(),
            sample_rate: self.sample_rate as f64,
            experiment: None,
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.upstream.shutdown().await {
            debug!("Upstream shutdown: {}", e);
        }
        self.acquisition.release().await;
        info!("Disconnected from DAQ at {}", self.addr);
    }
}
