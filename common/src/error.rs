use std::io;
use thiserror::Error;

use crate::types::SAMPLE_WIDTH;

/// 流错误类型
///
/// 每一类错误只影响产生它的会话，监听循环与其他会话不受影响。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    // ========== 协议错误 ==========
    /// 接收到的字节数不是采样宽度的整数倍
    #[error("Malformed segment: {len} bytes is not a multiple of {SAMPLE_WIDTH}")]
    MalformedSegment { len: usize },

    /// 握手不是合法JSON或缺少必填字段
    #[error("Malformed handshake: {0}")]
    MalformedHandshake(String),

    // ========== 连接错误 ==========
    /// 对端在分片中途断开
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// 上游采集仪器拒绝连接
    #[error("Upstream source at {addr} is unresponsive: {reason}")]
    UnresponsiveSource { addr: String, reason: String },

    /// 监听端口绑定失败
    #[error("Could not bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// 读写超时
    #[error("Transmission timeout")]
    TransmissionTimeout,

    // ========== 参数错误 ==========
    #[error("Invalid channel: {0}")]
    InvalidChannel(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // ========== 数据源错误 ==========
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// 远程仪器HTTP调用失败（调用方按非致命处理）
    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl StreamError {
    /// 是否属于对端断开一类（断管、重置、EOF）
    pub fn is_disconnect(&self) -> bool {
        matches!(self, StreamError::ConnectionClosed)
    }
}

/// 错误转换：从 std::io::Error
impl From<io::Error> for StreamError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => StreamError::ConnectionClosed,
            io::ErrorKind::TimedOut => StreamError::TransmissionTimeout,
            _ => StreamError::Io(error.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for StreamError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StreamError::TransmissionTimeout
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            StreamError::MalformedSegment { len: 7 },
            StreamError::MalformedHandshake("missing field `channel`".to_string()),
            StreamError::ConnectionClosed,
            StreamError::UnresponsiveSource {
                addr: "10.20.92.130:12340".to_string(),
                reason: "connection refused".to_string(),
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let broken: StreamError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(broken.is_disconnect());

        let reset: StreamError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(reset.is_disconnect());

        let timeout: StreamError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(timeout, StreamError::TransmissionTimeout);

        match StreamError::from(io::Error::new(io::ErrorKind::Other, "boom")) {
            StreamError::Io(msg) => assert!(msg.contains("boom")),
            other => panic!("Expected Io error, got {:?}", other),
        }
    }
}
