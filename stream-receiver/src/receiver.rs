//! Client side of the stream: connect, optionally send the handshake, then
//! read fixed-size segments and hand them to a consumer tick by tick.

use common::{Result, SegmentReader, StreamError};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::consumer::FrameConsumer;
use crate::demux::Demultiplexer;
use crate::history::ChannelHistory;
use crate::watchdog::{platform_probe, LagWarning, LagWatchdog};

/// Totals for one receive run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiverSummary {
    pub ticks: u64,
    pub segments: u64,
    pub bytes: u64,
    pub lag_warnings: u64,
    pub cancelled: bool,
}

pub struct StreamReceiver {
    stream: TcpStream,
    config: ReceiverConfig,
    warnings: Option<mpsc::UnboundedSender<LagWarning>>,
}

impl StreamReceiver {
    /// Connects and sends the configured handshake, if any.
    ///
    /// A refused or timed-out connection is `UnresponsiveSource`.
    pub async fn connect(config: ReceiverConfig) -> Result<Self> {
        let addr = config.server_addr;
        let mut stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(StreamError::UnresponsiveSource {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(StreamError::UnresponsiveSource {
                    addr: addr.to_string(),
                    reason: "connect timed out".to_string(),
                })
            }
        };
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);

        if let Some(handshake) = &config.handshake {
            let bytes = handshake.to_bytes()?;
            timeout(config.io_timeout, stream.write_all(&bytes)).await??;
            info!(
                "Sent handshake: experiment={}, channel={}",
                handshake.experiment, handshake.channel
            );
        }

        Ok(Self {
            stream,
            config,
            warnings: None,
        })
    }

    /// Forward lag warnings to an observer as well as the log
    pub fn with_lag_warnings(mut self, warnings: mpsc::UnboundedSender<LagWarning>) -> Self {
        self.warnings = Some(warnings);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Receives until cancelled, the server closes the stream, or an error.
    ///
    /// The lag watchdog runs alongside and is stopped and joined before the
    /// socket is dropped.
    pub async fn run<C>(self, consumer: &mut C, cancel: &CancellationToken) -> Result<ReceiverSummary>
    where
        C: FrameConsumer + ?Sized,
    {
        let StreamReceiver {
            mut stream,
            config,
            warnings,
        } = self;

        let watchdog_cancel = cancel.child_token();
        let watchdog = if config.watchdog.enabled {
            let mut watchdog = LagWatchdog::for_receiver(platform_probe(&stream), &config);
            if let Some(tx) = warnings {
                watchdog = watchdog.with_warnings(tx);
            }
            Some(watchdog.spawn(watchdog_cancel.clone()))
        } else {
            None
        };

        let outcome = receive(&mut stream, &config, consumer, cancel).await;

        watchdog_cancel.cancel();
        let lag_warnings = match watchdog {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!("Lag watchdog task failed: {}", e);
                0
            }),
            None => 0,
        };
        drop(stream);
        consumer.on_close();

        outcome.map(|summary| ReceiverSummary {
            lag_warnings,
            ..summary
        })
    }
}

/// Segment loop over any byte stream
pub async fn receive<R, C>(
    reader: &mut R,
    config: &ReceiverConfig,
    consumer: &mut C,
    cancel: &CancellationToken,
) -> Result<ReceiverSummary>
where
    R: AsyncRead + Unpin + ?Sized,
    C: FrameConsumer + ?Sized,
{
    let mut segments = SegmentReader::new(config.segment_length, config.format)?;
    let mut demux = Demultiplexer::new(config.layout);
    let mut history = ChannelHistory::new(config.sample_rate, config.window_seconds, config.decimation);
    let mut summary = ReceiverSummary::default();

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            }
            read = timeout(config.io_timeout, segments.read_segment(reader)) => read,
        };

        let segment = match read {
            Ok(Ok(segment)) => segment,
            // EOF between segments is the server ending the stream
            Ok(Err(StreamError::ConnectionClosed)) if segments.bytes_received() == 0 => {
                info!("Server closed the stream after {} ticks", demux.ticks());
                break;
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(StreamError::TransmissionTimeout),
        };

        let slot = demux.assign();
        history.push(slot.channel, &segment.samples);
        summary.segments += 1;
        summary.bytes += segment.byte_len() as u64;

        if slot.end_of_tick {
            summary.ticks += 1;
            consumer.on_tick(slot.tick, &history);
        }
    }

    debug!(
        "Received {} segments ({} bytes) in {} ticks",
        summary.segments, summary.bytes, summary.ticks
    );
    Ok(summary)
}
