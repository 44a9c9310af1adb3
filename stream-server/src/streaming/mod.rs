// 流处理模块
//
// # 核心组件
//
// - `StreamSource`: 统一的数据源抽象接口
// - `PlaybackSource` / `LiveSource` / `SawtoothSource`: 三种数据源
// - `ChannelMultiplexer`: 按通道升序写出每个tick
// - `StreamSession`: 单个连接的推流循环

pub mod live_source;
pub mod multiplexer;
pub mod playback_source;
pub mod sawtooth_source;
pub mod session;
pub mod source;

// 重新导出核心类型
pub use live_source::LiveSource;
pub use multiplexer::{ChannelMultiplexer, TickStats};
pub use playback_source::PlaybackSource;
pub use sawtooth_source::SawtoothSource;
pub use session::{SessionSummary, StreamSession};
pub use source::{SourceInfo, SourceKind, StreamSource};
