use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, StreamError};

/// 逻辑通道数（MEA电极阵列，会话期间不变）
pub const CHANNEL_COUNT: usize = 60;

/// 单个采样在线上的字节宽度
pub const SAMPLE_WIDTH: usize = 4;

/// 原始DAQ整数单位到伏特的换算系数
pub const CONVERSION_CONSTANT: f64 = 5.9605e-8;

/// 默认采样率（Hz）
pub const DEFAULT_SAMPLE_RATE: u32 = 10_000;

/// 默认tick周期（秒）
pub const DEFAULT_TICK_RATE: f64 = 0.01;

/// 回放模式默认分片长度
pub const PLAYBACK_SEGMENT_LENGTH: usize = 100;

/// 直采模式默认分片长度
pub const LIVE_SEGMENT_LENGTH: usize = 1000;

/// 握手消息最大字节数
pub const MAX_HANDSHAKE_BYTES: usize = 2048;

/// 每个客户端连接的读写超时
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// 通道索引（0..59）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ChannelId(u8);

impl ChannelId {
    pub const FIRST: ChannelId = ChannelId(0);

    pub fn new(index: usize) -> Result<Self> {
        if index < CHANNEL_COUNT {
            Ok(Self(index as u8))
        } else {
            Err(StreamError::InvalidChannel(index))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// 按升序遍历全部通道
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..CHANNEL_COUNT as u8).map(ChannelId)
    }
}

impl TryFrom<usize> for ChannelId {
    type Error = StreamError;

    fn try_from(index: usize) -> Result<Self> {
        ChannelId::new(index)
    }
}

impl From<ChannelId> for usize {
    fn from(channel: ChannelId) -> usize {
        channel.index()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 线上采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// IEEE-754 float32（回放 / mock）
    Float32,
    /// 有符号int32，原始DAQ单位，需乘以换算系数
    Int32,
}

/// 通道选择：反射模式转发全部通道，否则只转发一个
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSelection {
    All,
    Single(ChannelId),
}

impl ChannelSelection {
    pub fn from_reflect(reflect: bool, channel: ChannelId) -> Self {
        if reflect {
            ChannelSelection::All
        } else {
            ChannelSelection::Single(channel)
        }
    }

    pub fn includes(&self, channel: ChannelId) -> bool {
        match self {
            ChannelSelection::All => true,
            ChannelSelection::Single(selected) => *selected == channel,
        }
    }

    /// 每个tick在线上出现的分片数
    pub fn channels_per_tick(&self) -> usize {
        match self {
            ChannelSelection::All => CHANNEL_COUNT,
            ChannelSelection::Single(_) => 1,
        }
    }
}

/// 单通道的定长采样序列，线协议的最小单元
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segment {
    pub samples: Vec<f32>,
}

impl Segment {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 编码后的字节数
    pub fn byte_len(&self) -> usize {
        self.samples.len() * SAMPLE_WIDTH
    }
}

impl From<Vec<f32>> for Segment {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}
