// 模拟采集仪器
//
// 把数据集前若干秒当作循环缓冲区，按真实采样率向每个连接发送
// 60通道多路复用的int32流：每个tick依次为通道0..59各一个分片，不带通道标签。

use bytes::BytesMut;
use common::{
    codec, ChannelId, Dataset, Result, SampleFormat, StreamError, TickPacer, CHANNEL_COUNT,
    SAMPLE_WIDTH,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SimulatorConfig;

pub struct MockDaq {
    listener: TcpListener,
    dataset: Arc<Dataset>,
    segment_length: usize,
    tick_rate: f64,
    io_timeout: Duration,
}

impl MockDaq {
    /// 截取数据集并绑定数据端口
    pub async fn new(config: SimulatorConfig, dataset: Dataset) -> Result<Self> {
        if config.segment_length == 0 {
            return Err(StreamError::InvalidParameter(
                "segment length must be positive".to_string(),
            ));
        }

        let retained = (config.seconds * dataset.sample_rate()) as usize;
        let dataset = dataset.truncated(retained);
        if dataset.len() < config.segment_length {
            return Err(StreamError::Dataset(format!(
                "{} retained samples is shorter than one segment ({})",
                dataset.len(),
                config.segment_length
            )));
        }

        let tick_rate = config.segment_length as f64 / dataset.sample_rate();

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| StreamError::Bind {
                addr: config.bind_addr.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            "Mock DAQ listening on {}: {:.1}s of data, segment_length={}, tick={:.1}ms",
            listener.local_addr()?,
            dataset.duration_secs(),
            config.segment_length,
            tick_rate * 1000.0
        );

        Ok(Self {
            listener,
            dataset: Arc::new(dataset),
            segment_length: config.segment_length,
            tick_rate,
            io_timeout: config.io_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 接受连接直到取消
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut streams = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        info!("Connection from {}", peer);
                        let feed = Feed {
                            dataset: self.dataset.clone(),
                            segment_length: self.segment_length,
                            tick_rate: self.tick_rate,
                            io_timeout: self.io_timeout,
                        };
                        let cancel = cancel.child_token();
                        streams.spawn(async move {
                            match feed.stream_to(socket, &cancel).await {
                                Ok(ticks) => info!("Stopped streaming to {} after {} ticks", peer, ticks),
                                Err(e) if e.is_disconnect() => info!("Connection from {} closed", peer),
                                Err(e) => error!("Streaming to {} failed: {}", peer, e),
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(joined) = streams.join_next(), if !streams.is_empty() => {
                    if let Err(e) = joined {
                        error!("Stream task failed: {}", e);
                    }
                }
            }
        }

        drop(self.listener);
        while streams.join_next().await.is_some() {}
        info!("Mock DAQ stopped");
        Ok(())
    }
}

/// 单个连接的发送状态
struct Feed {
    dataset: Arc<Dataset>,
    segment_length: usize,
    tick_rate: f64,
    io_timeout: Duration,
}

impl Feed {
    async fn stream_to(&self, mut socket: TcpStream, cancel: &CancellationToken) -> Result<u64> {
        socket.set_nodelay(true)?;

        let mut pacer = TickPacer::new(self.tick_rate)?;
        let mut buf = BytesMut::with_capacity(CHANNEL_COUNT * self.segment_length * SAMPLE_WIDTH);
        let mut cursor = 0;
        let mut ticks = 0u64;

        pacer.start();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if cursor + self.segment_length > self.dataset.len() {
                debug!("Reached end of data after {} ticks, wrapping", ticks);
                cursor = 0;
            }

            buf.clear();
            for channel in ChannelId::all() {
                let samples = &self.dataset.channel(channel)[cursor..cursor + self.segment_length];
                codec::encode_into(samples, SampleFormat::Int32, &mut buf);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                written = timeout(self.io_timeout, socket.write_all(&buf)) => written??,
            }

            cursor += self.segment_length;
            ticks += 1;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = pacer.wait_for_next_tick() => {}
            }
        }

        let _ = socket.shutdown().await;
        Ok(ticks)
    }
}
