// 控制通道 - 会话开始前读取一次JSON握手
//
// 协议没有定义错误响应：握手非法时服务端只记录日志并断开，不发送任何数据。

use common::{Handshake, HandshakeParse, Result, StreamError, MAX_HANDSHAKE_BYTES};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

/// 读取并解析握手
///
/// 只在已收到的字节是不完整JSON前缀且不足2048字节时继续读取。
pub async fn read_handshake<R>(reader: &mut R, io_timeout: Duration) -> Result<Handshake>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];

    loop {
        let room = (MAX_HANDSHAKE_BYTES - buf.len()).min(chunk.len());
        let n = timeout(io_timeout, reader.read(&mut chunk[..room])).await??;
        if n == 0 {
            return Err(if buf.is_empty() {
                StreamError::ConnectionClosed
            } else {
                StreamError::MalformedHandshake(
                    "connection closed before handshake completed".to_string(),
                )
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        match Handshake::parse(&buf)? {
            HandshakeParse::Complete(handshake) => {
                debug!(
                    "Handshake: experiment={}, channel={}",
                    handshake.experiment, handshake.channel
                );
                return Ok(handshake);
            }
            HandshakeParse::Incomplete => {
                if buf.len() >= MAX_HANDSHAKE_BYTES {
                    return Err(StreamError::MalformedHandshake(format!(
                        "handshake exceeds {} bytes",
                        MAX_HANDSHAKE_BYTES
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_single_read() {
        let mut mock = Builder::new()
            .read(br#"{"experiment": "default", "channel": 12}"#)
            .build();
        let handshake = read_handshake(&mut mock, TIMEOUT).await.unwrap();
        assert_eq!(handshake.channel.index(), 12);
    }

    #[tokio::test]
    async fn test_fragmented_handshake() {
        let mut mock = Builder::new()
            .read(br#"{"experiment": "#)
            .read(br#""rat-1", "chan"#)
            .read(br#"nel": 3}"#)
            .build();
        let handshake = read_handshake(&mut mock, TIMEOUT).await.unwrap();
        assert_eq!(handshake.experiment, "rat-1");
        assert_eq!(handshake.channel.index(), 3);
    }

    #[tokio::test]
    async fn test_missing_channel_rejected_without_more_reads() {
        // 完整但缺少channel的JSON立即失败，不再等待后续字节
        let mut mock = Builder::new().read(br#"{"experiment":"default"}"#).build();
        let err = read_handshake(&mut mock, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, StreamError::MalformedHandshake(_)));
    }

    #[tokio::test]
    async fn test_closed_mid_handshake() {
        let mut mock = Builder::new().read(br#"{"experiment":"#).build();
        let err = read_handshake(&mut mock, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, StreamError::MalformedHandshake(_)));
    }

    #[tokio::test]
    async fn test_closed_before_handshake() {
        let mut mock = Builder::new().build();
        assert_eq!(
            read_handshake(&mut mock, TIMEOUT).await.unwrap_err(),
            StreamError::ConnectionClosed
        );
    }

    #[tokio::test]
    async fn test_oversized_prefix() {
        let mut payload = br#"{"experiment":""#.to_vec();
        payload.resize(MAX_HANDSHAKE_BYTES + 100, b'a');
        let mut reader: &[u8] = &payload;
        let err = read_handshake(&mut reader, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, StreamError::MalformedHandshake(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_times_out() {
        let mut mock = Builder::new().wait(Duration::from_secs(120)).build();
        assert_eq!(
            read_handshake(&mut mock, Duration::from_secs(60)).await.unwrap_err(),
            StreamError::TransmissionTimeout
        );
    }
}
