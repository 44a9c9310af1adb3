// 分片读取器 - 从字节流中累积出一个完整分片
//
// 状态机：ACCUMULATING -> COMPLETE。每次 feed 只执行一次读取，最多读取
// 剩余所需字节数，因此对任意TCP分包都成立，不依赖操作系统缓冲行为。

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::codec;
use crate::error::{Result, StreamError};
use crate::types::{SampleFormat, Segment, SAMPLE_WIDTH};

/// 读取器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// 累积中
    Accumulating,
    /// 已收齐一个分片
    Complete,
}

/// 每连接一个的分片读取器
#[derive(Debug)]
pub struct SegmentReader {
    segment_length: usize,
    format: SampleFormat,
    buffer: Vec<u8>,
    bytes_received: usize,
    state: ReaderState,
}

impl SegmentReader {
    /// 创建分片读取器
    ///
    /// # 参数
    ///
    /// - `segment_length`: 每个分片的采样数（必须大于0）
    /// - `format`: 线上采样格式
    pub fn new(segment_length: usize, format: SampleFormat) -> Result<Self> {
        if segment_length == 0 {
            return Err(StreamError::InvalidParameter(
                "segment length must be positive".to_string(),
            ));
        }

        Ok(Self {
            segment_length,
            format,
            buffer: vec![0u8; segment_length * SAMPLE_WIDTH],
            bytes_received: 0,
            state: ReaderState::Accumulating,
        })
    }

    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// 一个完整分片的字节数
    pub fn target_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// 回到累积状态以读取下一个分片
    pub fn reset(&mut self) {
        self.bytes_received = 0;
        self.state = ReaderState::Accumulating;
    }

    /// 执行一次读取
    ///
    /// # 返回
    ///
    /// - `Ok(Some(segment))`: 本次读取凑齐了分片
    /// - `Ok(None)`: 仍在累积
    /// - `Err(ConnectionClosed)`: 对端关闭（读到0字节）
    pub async fn feed<R>(&mut self, reader: &mut R) -> Result<Option<Segment>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        // 已完成的读取器直接开始下一个分片
        if self.state == ReaderState::Complete {
            self.reset();
        }

        let n = reader.read(&mut self.buffer[self.bytes_received..]).await?;
        if n == 0 {
            return Err(StreamError::ConnectionClosed);
        }

        self.bytes_received += n;
        trace!(
            "Segment reader: {}/{} bytes",
            self.bytes_received,
            self.target_bytes()
        );

        if self.bytes_received < self.target_bytes() {
            return Ok(None);
        }

        self.state = ReaderState::Complete;
        let samples = codec::decode(&self.buffer, self.format)?;
        Ok(Some(Segment::new(samples)))
    }

    /// 读取直到得到一个完整分片，然后复位
    pub async fn read_segment<R>(&mut self, reader: &mut R) -> Result<Segment>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some(segment) = self.feed(reader).await? {
                self.reset();
                return Ok(segment);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio_test::io::Builder;

    fn samples(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32 * 0.25 - 3.0).collect()
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(SegmentReader::new(0, SampleFormat::Float32).is_err());
    }

    #[tokio::test]
    async fn test_single_read_completes() {
        let data = samples(100);
        let bytes = codec::encode(&data, SampleFormat::Float32);
        let mut mock = Builder::new().read(&bytes).build();

        let mut reader = SegmentReader::new(100, SampleFormat::Float32).unwrap();
        let segment = reader.feed(&mut mock).await.unwrap();

        assert_eq!(reader.state(), ReaderState::Complete);
        assert_eq!(segment.unwrap().samples, data);
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let data = samples(3);
        let bytes = codec::encode(&data, SampleFormat::Float32);
        let mut builder = Builder::new();
        for byte in bytes.iter() {
            builder.read(std::slice::from_ref(byte));
        }
        let mut mock = builder.build();

        let mut reader = SegmentReader::new(3, SampleFormat::Float32).unwrap();
        for fed in 1..bytes.len() {
            assert!(reader.feed(&mut mock).await.unwrap().is_none());
            assert_eq!(reader.bytes_received(), fed);
            assert_eq!(reader.state(), ReaderState::Accumulating);
        }
        let segment = reader.feed(&mut mock).await.unwrap().unwrap();
        assert_eq!(segment.samples, data);
    }

    #[tokio::test]
    async fn test_never_reads_past_segment() {
        // 两个分片在同一次到达：第一次feed只能取走第一个分片的字节
        let first = samples(4);
        let second: Vec<f32> = first.iter().map(|v| v * 10.0).collect();
        let mut joined = codec::encode(&first, SampleFormat::Float32).to_vec();
        joined.extend_from_slice(&codec::encode(&second, SampleFormat::Float32));
        let mut stream: &[u8] = &joined;

        let mut reader = SegmentReader::new(4, SampleFormat::Float32).unwrap();
        assert_eq!(reader.read_segment(&mut stream).await.unwrap().samples, first);
        assert_eq!(reader.read_segment(&mut stream).await.unwrap().samples, second);
    }

    #[tokio::test]
    async fn test_peer_closed_mid_segment() {
        let bytes = codec::encode(&samples(10), SampleFormat::Float32);
        let mut mock = Builder::new().read(&bytes[..13]).build();

        let mut reader = SegmentReader::new(10, SampleFormat::Float32).unwrap();
        assert!(reader.feed(&mut mock).await.unwrap().is_none());
        let err = reader.feed(&mut mock).await.unwrap_err();
        assert_eq!(err, StreamError::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_reset_matches_fresh_reader() {
        let first = codec::encode(&samples(8), SampleFormat::Int32);
        let second_data: Vec<f32> = samples(8).iter().map(|v| v * 1e-5).collect();
        let second = codec::encode(&second_data, SampleFormat::Int32);

        let mut reused = SegmentReader::new(8, SampleFormat::Int32).unwrap();
        let mut mock = Builder::new().read(&first).read(&second[..5]).read(&second[5..]).build();
        reused.feed(&mut mock).await.unwrap().unwrap();
        reused.reset();
        assert!(reused.feed(&mut mock).await.unwrap().is_none());
        let from_reused = reused.feed(&mut mock).await.unwrap().unwrap();

        let mut fresh = SegmentReader::new(8, SampleFormat::Int32).unwrap();
        let mut mock = Builder::new().read(&second[..5]).read(&second[5..]).build();
        assert!(fresh.feed(&mut mock).await.unwrap().is_none());
        let from_fresh = fresh.feed(&mut mock).await.unwrap().unwrap();

        assert_eq!(from_reused, from_fresh);
        assert_eq!(reused.bytes_received(), fresh.bytes_received());
        assert_eq!(reused.state(), fresh.state());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_arbitrary_fragmentation(
            data in prop::collection::vec(-1.0e3f32..1.0e3, 1..64),
            cuts in prop::collection::vec(1usize..16, 1..32),
        ) {
            let bytes = codec::encode(&data, SampleFormat::Float32);

            // 按cuts切分字节流，剩余部分一次送达
            let mut builder = Builder::new();
            let mut offset = 0;
            for cut in cuts {
                if offset >= bytes.len() {
                    break;
                }
                let end = (offset + cut).min(bytes.len());
                builder.read(&bytes[offset..end]);
                offset = end;
            }
            if offset < bytes.len() {
                builder.read(&bytes[offset..]);
            }
            let mut mock = builder.build();

            let result = tokio_test::block_on(async {
                let mut reader = SegmentReader::new(data.len(), SampleFormat::Float32).unwrap();
                loop {
                    match reader.feed(&mut mock).await.unwrap() {
                        Some(segment) => return (segment, reader.bytes_received()),
                        None => assert!(reader.bytes_received() < bytes.len()),
                    }
                }
            });

            prop_assert_eq!(result.1, bytes.len());
            prop_assert_eq!(result.0.samples, data);
        }
    }
}
