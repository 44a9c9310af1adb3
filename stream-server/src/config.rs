use common::channel_map;
use common::{ChannelId, DEFAULT_IO_TIMEOUT, DEFAULT_SAMPLE_RATE, LIVE_SEGMENT_LENGTH, PLAYBACK_SEGMENT_LENGTH};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// 服务端默认监听端口
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// 远程采集仪器地址
pub const DEFAULT_DAQ_HOST: &str = "10.20.92.130";

/// 采集仪器HTTP控制端口
pub const DEFAULT_DAQ_HTTP_PORT: u16 = 8888;

/// 采集仪器数据端口（模拟器使用同一端口）
pub const DEFAULT_DAQ_DATA_PORT: u16 = 12340;

/// 数据源模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// 回放录制数据集
    Playback,
    /// 转发远程采集仪器
    Live,
    /// 锯齿波测试信号
    Sawtooth,
}

/// 远程采集仪器配置
#[derive(Debug, Clone)]
pub struct DaqConfig {
    /// 仪器主机
    pub host: String,
    /// HTTP控制端口
    pub http_port: u16,
    /// 数据端口
    pub data_port: u16,
    /// 连接模拟器：跳过所有HTTP控制调用，数据取自本机
    pub mock: bool,
    pub sample_rate: u32,
    pub segment_length: usize,
    /// HTTP请求超时
    pub request_timeout: Duration,
    /// 启动采集后等待仪器就绪的时间
    pub settle_delay: Duration,
    /// 数据连接建立超时
    pub connect_timeout: Duration,
}

impl DaqConfig {
    /// 模拟器配置（本机 12340）
    pub fn mock() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            mock: true,
            ..Self::default()
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }

    pub fn data_addr(&self) -> String {
        format!("{}:{}", self.host, self.data_port)
    }
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DAQ_HOST.to_string(),
            http_port: DEFAULT_DAQ_HTTP_PORT,
            data_port: DEFAULT_DAQ_DATA_PORT,
            mock: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
            segment_length: LIVE_SEGMENT_LENGTH,
            request_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// 服务端配置，启动前确定，运行期间只读
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub mode: SourceMode,
    /// 跳过握手，直接使用默认实验与默认通道
    pub auto_setup: bool,
    /// 转发全部60个通道
    pub reflect: bool,
    /// 默认通道；未设置时回放为通道0，直采为电极22对应的通道
    pub default_channel: Option<ChannelId>,
    /// 回放分片长度（握手可覆盖）
    pub segment_length: usize,
    /// tick周期（秒）；未设置时为 segment_length / sample_rate
    pub tick_rate: Option<f64>,
    /// 实验数据集根目录
    pub dataset_root: PathBuf,
    /// `default` 实验对应的文件；未设置时使用合成数据
    pub default_dataset: Option<PathBuf>,
    /// 合成数据集的时长（秒）
    pub synthetic_seconds: f64,
    /// 每个连接的读写超时
    pub io_timeout: Duration,
    /// 会话报告广播通道容量
    pub report_capacity: usize,
    pub daq: DaqConfig,
}

impl ServerConfig {
    /// 会话未指定通道时使用的通道
    pub fn initial_channel(&self) -> ChannelId {
        match (self.default_channel, self.mode) {
            (Some(channel), _) => channel,
            (None, SourceMode::Live) => channel_map::default_live_channel(),
            (None, _) => ChannelId::FIRST,
        }
    }

    /// 给定分片长度与采样率下的tick周期
    pub fn tick_rate_for(&self, segment_length: usize, sample_rate: f64) -> f64 {
        self.tick_rate
            .unwrap_or(segment_length as f64 / sample_rate)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_SERVER_PORT)),
            mode: SourceMode::Playback,
            auto_setup: false,
            reflect: false,
            default_channel: None,
            segment_length: PLAYBACK_SEGMENT_LENGTH,
            tick_rate: None,
            dataset_root: PathBuf::from("mea_data"),
            default_dataset: None,
            synthetic_seconds: 15.0,
            io_timeout: DEFAULT_IO_TIMEOUT,
            report_capacity: 64,
            daq: DaqConfig::default(),
        }
    }
}
