// StreamSource Trait定义
//
// 回放、直采、锯齿波三种数据源实现同一接口，会话与多路复用器只依赖此接口。
// 每个tick内，多路复用器按通道升序对每个通道各请求一次分片，然后调用 end_tick。

use async_trait::async_trait;
use common::{ChannelId, Result, Segment};
use serde::{Deserialize, Serialize};

/// 数据源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// 回放录制数据集
    Playback,
    /// 转发远程采集仪器
    Live,
    /// 锯齿波测试信号
    Sawtooth,
}

/// 数据源信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub kind: SourceKind,
    /// 每个分片的采样数
    pub segment_length: usize,
    /// 采样率（Hz）
    pub sample_rate: f64,
    /// 回放的实验名称
    pub experiment: Option<String>,
}

/// 统一的采样数据源抽象接口
///
/// # 实现
///
/// - `PlaybackSource`: 回放内存中的数据集
/// - `LiveSource`: 转发上游采集仪器的60通道复用流
/// - `SawtoothSource`: 生成锯齿波
#[async_trait]
pub trait StreamSource: Send {
    /// 当前tick中 `channel` 的分片
    ///
    /// 同一tick内的请求必须按通道升序。
    async fn segment(&mut self, channel: ChannelId) -> Result<Segment>;

    /// 结束当前tick，推进到下一个tick
    async fn end_tick(&mut self) -> Result<()>;

    /// 切换选中通道（回放源会把游标复位到0）
    fn change_channel(&mut self, channel: ChannelId);

    /// 是否由上游决定节奏（此时会话不再额外睡眠）
    fn paced_by_upstream(&self) -> bool {
        false
    }

    fn info(&self) -> SourceInfo;

    /// 释放上游资源
    async fn close(&mut self) {}
}
