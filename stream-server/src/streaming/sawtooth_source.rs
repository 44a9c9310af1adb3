// 锯齿波数据源：第 t 个tick的所有分片都填充 t % 100，用于联调接收端

use super::source::{SourceInfo, SourceKind, StreamSource};
use async_trait::async_trait;
use common::{ChannelId, Result, Segment, DEFAULT_SAMPLE_RATE};

/// 锯齿波周期（tick）
pub const SAWTOOTH_PERIOD: u64 = 100;

pub struct SawtoothSource {
    segment_length: usize,
    tick: u64,
}

impl SawtoothSource {
    pub fn new(segment_length: usize) -> Self {
        Self {
            segment_length,
            tick: 0,
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }
}

#[async_trait]
impl StreamSource for SawtoothSource {
    async fn segment(&mut self, _channel: ChannelId) -> Result<Segment> {
        let value = (self.tick % SAWTOOTH_PERIOD) as f32;
        Ok(Segment::new(vec![value; self.segment_length]))
    }

    async fn end_tick(&mut self) -> Result<()> {
        self.tick += 1;
        Ok(())
    }

    fn change_channel(&mut self, _channel: ChannelId) {}

    fn info(&self) -> SourceInfo {
        SourceInfo {
            kind: SourceKind::Sawtooth,
            segment_length: self.segment_length,
            sample_rate: DEFAULT_SAMPLE_RATE as f64,
            experiment: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ramp_wraps_at_period() {
        let mut source = SawtoothSource::new(4);
        let channel = ChannelId::new(9).unwrap();

        assert_eq!(source.segment(channel).await.unwrap().samples, vec![0.0; 4]);
        for _ in 0..99 {
            source.end_tick().await.unwrap();
        }
        assert_eq!(source.segment(channel).await.unwrap().samples, vec![99.0; 4]);
        source.end_tick().await.unwrap();
        assert_eq!(source.segment(channel).await.unwrap().samples, vec![0.0; 4]);
        assert_eq!(source.current_tick(), 100);
    }
}
