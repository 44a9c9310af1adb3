// TCP流服务器
//
// 每个连接一个独立任务：CONNECTING -> （可选）HANDSHAKE -> STREAMING -> CLOSED。
// 单个会话的任何错误只结束该会话，结果通过广播通道以 SessionReport 发布。
// 取消服务令牌后停止接受连接，取消所有会话并等待它们结束。

use common::{
    ChannelId, ChannelSelection, Result, StreamError, DEFAULT_EXPERIMENT, DEFAULT_SAMPLE_RATE,
};
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::control;
use crate::config::{ServerConfig, SourceMode};
use crate::recording::DatasetCatalog;
use crate::streaming::{
    LiveSource, PlaybackSource, SawtoothSource, SessionSummary, StreamSession, StreamSource,
};

/// 会话结束报告
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub outcome: std::result::Result<SessionSummary, StreamError>,
}

/// 活动会话信息
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub channel: ChannelId,
    pub uptime: Duration,
}

struct SessionHandle {
    peer: SocketAddr,
    channel_tx: watch::Sender<ChannelId>,
    cancel: CancellationToken,
    started_at: Instant,
}

/// 会话如何建立
enum SessionOrigin {
    /// 客户端连入
    Accepted,
    /// 服务端主动连出，固定回放默认实验的某个通道
    Forward { channel: ChannelId },
}

/// 会话参数（握手或默认配置）
struct SessionSettings {
    experiment: String,
    channel: ChannelId,
    segment_length: usize,
    reflect: bool,
}

struct ServerContext {
    config: ServerConfig,
    catalog: DatasetCatalog,
    sessions: DashMap<Uuid, SessionHandle>,
    reports: broadcast::Sender<SessionReport>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
}

/// TCP流服务器
pub struct StreamServer {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

/// 运行中服务器的控制句柄
#[derive(Clone)]
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
}

impl StreamServer {
    /// 绑定监听端口；失败时返回 `Bind`，服务无法启动
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let catalog = DatasetCatalog::new(
            config.dataset_root.clone(),
            config.default_dataset.clone(),
            config.synthetic_seconds,
        );
        Self::bind_with_catalog(config, catalog).await
    }

    pub async fn bind_with_catalog(config: ServerConfig, catalog: DatasetCatalog) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| StreamError::Bind {
                addr: config.bind_addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let (reports, _) = broadcast::channel(config.report_capacity.max(1));

        info!("Server started on {} ({:?} mode)", local_addr, config.mode);

        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext {
                config,
                catalog,
                sessions: DashMap::new(),
                reports,
                cancel: CancellationToken::new(),
                local_addr,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.ctx.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ctx: self.ctx.clone(),
        }
    }

    /// 接受连接直到服务令牌被取消
    pub async fn run(self) -> Result<()> {
        let StreamServer { listener, ctx } = self;
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Received connection from {}", peer);
                        let ctx = ctx.clone();
                        sessions.spawn(async move {
                            let _ = drive_session(ctx, stream, peer, SessionOrigin::Accepted).await;
                        });
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        info!(
            "Shutdown request detected, waiting for {} sessions",
            sessions.len()
        );
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }
        info!("Server on {} stopped", ctx.local_addr);
        Ok(())
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.ctx.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.ctx.catalog
    }

    /// 订阅会话结束报告
    pub fn subscribe(&self) -> broadcast::Receiver<SessionReport> {
        self.ctx.reports.subscribe()
    }

    /// 停止服务：不再接受连接，所有会话在下一个tick边界结束
    pub fn shutdown(&self) {
        self.ctx.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.ctx
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                session_id: *entry.key(),
                peer: entry.peer,
                channel: *entry.channel_tx.borrow(),
                uptime: entry.started_at.elapsed(),
            })
            .collect()
    }

    /// 切换会话的通道，在下一个tick边界生效（回放游标复位）
    pub fn change_channel(&self, session_id: Uuid, channel: ChannelId) -> Result<()> {
        let handle = self.ctx.sessions.get(&session_id).ok_or_else(|| {
            StreamError::InvalidParameter(format!("unknown session {}", session_id))
        })?;
        handle.channel_tx.send_replace(channel);
        info!("Changed channel of session {} to {}", session_id, channel);
        Ok(())
    }

    /// 结束单个会话
    pub fn stop_session(&self, session_id: Uuid) -> bool {
        match self.ctx.sessions.get(&session_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 主动连接远程消费者并向其回放默认实验的一个通道，直到连接断开或服务停止
    pub async fn forward_channel(&self, addr: SocketAddr, channel: ChannelId) -> Result<SessionSummary> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| StreamError::UnresponsiveSource {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        info!("Forwarding channel {} to {}", channel, addr);
        drive_session(self.ctx.clone(), stream, addr, SessionOrigin::Forward { channel }).await
    }
}

/// 注册、运行、注销一个会话并发布报告
async fn drive_session(
    ctx: Arc<ServerContext>,
    mut stream: TcpStream,
    peer: SocketAddr,
    origin: SessionOrigin,
) -> Result<SessionSummary> {
    let session_id = Uuid::new_v4();
    let cancel = ctx.cancel.child_token();
    let (channel_tx, channel_rx) = watch::channel(ctx.config.initial_channel());

    ctx.sessions.insert(
        session_id,
        SessionHandle {
            peer,
            channel_tx,
            cancel: cancel.clone(),
            started_at: Instant::now(),
        },
    );

    let outcome = serve(&ctx, &mut stream, session_id, origin, channel_rx, &cancel).await;

    if let Err(e) = stream.shutdown().await {
        debug!("Socket shutdown for {}: {}", peer, e);
    }
    drop(stream);
    ctx.sessions.remove(&session_id);

    match &outcome {
        Ok(summary) => info!(
            "Session {} from {} closed: {} ticks, {} bytes{}",
            session_id,
            peer,
            summary.ticks,
            summary.bytes,
            if summary.cancelled { " (stopped)" } else { "" }
        ),
        Err(e) if e.is_disconnect() => {
            info!("Closing connection from {} (broken pipe)", peer)
        }
        Err(StreamError::MalformedHandshake(reason)) => {
            info!("Received malformed handshake from {}, disconnecting: {}", peer, reason)
        }
        Err(e) => error!("Error handling connection from {}: {}", peer, e),
    }

    // 没有订阅者时发送失败是正常情况
    let _ = ctx.reports.send(SessionReport {
        session_id,
        peer,
        outcome: outcome.clone(),
    });

    outcome
}

async fn serve(
    ctx: &ServerContext,
    stream: &mut TcpStream,
    session_id: Uuid,
    origin: SessionOrigin,
    channel_rx: watch::Receiver<ChannelId>,
    cancel: &CancellationToken,
) -> Result<SessionSummary> {
    stream.set_nodelay(true)?;

    // 取消时丢弃建立中的数据源，已启动的远程采集在丢弃时停止
    let setup = tokio::select! {
        _ = cancel.cancelled() => {
            return Ok(SessionSummary { cancelled: true, ..SessionSummary::default() });
        }
        setup = open_source(ctx, stream, &origin) => setup?,
    };
    let (source, settings, tick_rate) = setup;

    if let Some(handle) = ctx.sessions.get(&session_id) {
        handle.channel_tx.send_replace(settings.channel);
    }

    let selection = ChannelSelection::from_reflect(settings.reflect, settings.channel);
    info!(
        "Session {} streaming {:?} (segment_length={}, {:?})",
        session_id,
        source.info().kind,
        settings.segment_length,
        selection
    );

    let session = StreamSession::new(
        session_id,
        source,
        selection,
        tick_rate,
        ctx.config.io_timeout,
        channel_rx,
    )?;
    session.run(stream, cancel).await
}

/// 根据服务模式构建数据源（回放非自动配置模式下先读握手）
async fn open_source(
    ctx: &ServerContext,
    stream: &mut TcpStream,
    origin: &SessionOrigin,
) -> Result<(Box<dyn StreamSource>, SessionSettings, f64)> {
    let config = &ctx.config;
    let defaults = SessionSettings {
        experiment: DEFAULT_EXPERIMENT.to_string(),
        channel: config.initial_channel(),
        segment_length: config.segment_length,
        reflect: config.reflect,
    };

    let mode = match origin {
        SessionOrigin::Forward { .. } => SourceMode::Playback,
        SessionOrigin::Accepted => config.mode,
    };

    match mode {
        SourceMode::Playback => {
            let settings = match origin {
                SessionOrigin::Forward { channel } => SessionSettings {
                    channel: *channel,
                    reflect: false,
                    ..defaults
                },
                SessionOrigin::Accepted if config.auto_setup => defaults,
                SessionOrigin::Accepted => {
                    let handshake = control::read_handshake(stream, config.io_timeout).await?;
                    SessionSettings {
                        experiment: handshake.experiment,
                        channel: handshake.channel,
                        segment_length: handshake.segment_length.unwrap_or(defaults.segment_length),
                        reflect: handshake.reflect.unwrap_or(defaults.reflect),
                    }
                }
            };

            let dataset = ctx.catalog.load(&settings.experiment).await?;
            let tick_rate = config.tick_rate_for(settings.segment_length, dataset.sample_rate());
            let source = PlaybackSource::new(
                settings.experiment.clone(),
                dataset,
                settings.segment_length,
            )?;
            Ok((Box::new(source), settings, tick_rate))
        }
        SourceMode::Live => {
            let source = LiveSource::connect(&config.daq, config.io_timeout).await?;
            let settings = SessionSettings {
                segment_length: config.daq.segment_length,
                ..defaults
            };
            let tick_rate =
                config.tick_rate_for(settings.segment_length, config.daq.sample_rate as f64);
            Ok((Box::new(source), settings, tick_rate))
        }
        SourceMode::Sawtooth => {
            let source = SawtoothSource::new(defaults.segment_length);
            let tick_rate =
                config.tick_rate_for(defaults.segment_length, DEFAULT_SAMPLE_RATE as f64);
            Ok((Box::new(source), defaults, tick_rate))
        }
    }
}
