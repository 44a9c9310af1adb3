use common::{DEFAULT_IO_TIMEOUT, LIVE_SEGMENT_LENGTH};
use std::net::SocketAddr;
use std::time::Duration;

/// 默认数据端口（与真实仪器一致）
pub const DEFAULT_DATA_PORT: u16 = 12340;

/// 默认保留的数据时长（秒）
pub const DEFAULT_RETAINED_SECONDS: f64 = 15.0;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub bind_addr: SocketAddr,
    /// 只回放数据集的前若干秒，循环发送
    pub seconds: f64,
    pub segment_length: usize,
    /// 单次写出的超时，对端长时间不读时断开该连接
    pub io_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_DATA_PORT)),
            seconds: DEFAULT_RETAINED_SECONDS,
            segment_length: LIVE_SEGMENT_LENGTH,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}
