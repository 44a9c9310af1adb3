use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::types::{ChannelId, MAX_HANDSHAKE_BYTES};

/// 默认实验名称
pub const DEFAULT_EXPERIMENT: &str = "default";

/// 会话开始前客户端发送的握手（仅回放模式、非自动配置）
///
/// ```json
/// {"experiment": "default", "channel": 12}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub experiment: String,
    pub channel: ChannelId,
    /// 覆盖服务端默认分片长度
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_length: Option<usize>,
    /// 覆盖服务端默认反射模式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflect: Option<bool>,
}

/// 握手解析结果
#[derive(Debug)]
pub enum HandshakeParse {
    /// 解析成功
    Complete(Handshake),
    /// 目前收到的是合法JSON的前缀，需要继续读取
    Incomplete,
}

impl Handshake {
    pub fn new(experiment: impl Into<String>, channel: ChannelId) -> Self {
        Self {
            experiment: experiment.into(),
            channel,
            segment_length: None,
            reflect: None,
        }
    }

    /// 编码为UTF-8 JSON
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| StreamError::MalformedHandshake(e.to_string()))?;
        if bytes.len() > MAX_HANDSHAKE_BYTES {
            return Err(StreamError::MalformedHandshake(format!(
                "handshake is {} bytes, limit is {}",
                bytes.len(),
                MAX_HANDSHAKE_BYTES
            )));
        }
        Ok(bytes)
    }

    /// 解析已收到的握手字节
    ///
    /// 缺少 `channel` 或 `experiment`、通道越界、非UTF-8或非法JSON均返回
    /// `MalformedHandshake`。
    pub fn parse(bytes: &[u8]) -> Result<HandshakeParse> {
        if bytes.len() > MAX_HANDSHAKE_BYTES {
            return Err(StreamError::MalformedHandshake(format!(
                "handshake exceeds {} bytes",
                MAX_HANDSHAKE_BYTES
            )));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|e| StreamError::MalformedHandshake(format!("invalid UTF-8: {}", e)))?;

        match serde_json::from_str::<Handshake>(text) {
            Ok(handshake) => {
                if handshake.segment_length == Some(0) {
                    return Err(StreamError::MalformedHandshake(
                        "segment_length must be positive".to_string(),
                    ));
                }
                Ok(HandshakeParse::Complete(handshake))
            }
            Err(e) if e.is_eof() && bytes.len() < MAX_HANDSHAKE_BYTES => Ok(HandshakeParse::Incomplete),
            Err(e) => Err(StreamError::MalformedHandshake(e.to_string())),
        }
    }
}

/// `POST /DAQ/connect` 请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaqConnectRequest {
    pub samplerate: u32,
    #[serde(rename = "segmentLength")]
    pub segment_length: usize,
}
