// 录制数据集 - 60通道采样历史与二进制录制文件格式
//
// 文件格式（小端）：
//
// | 字段 | 类型 |
// |---|---|
// | magic `MEAR` | 4字节 |
// | version (=1) | u16 |
// | channel_count (=60) | u16 |
// | sample_rate | f64 |
// | samples_per_channel | u64 |
// | 数据（按通道连续存放） | f32 * 60 * samples_per_channel |

use bytes::{Buf, BufMut, BytesMut};
use std::f32::consts::TAU;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, StreamError};
use crate::types::{ChannelId, CHANNEL_COUNT, SAMPLE_WIDTH};

/// 录制文件扩展名
pub const RECORDING_EXTENSION: &str = "mear";

const MAGIC: &[u8; 4] = b"MEAR";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 8;

/// 单通道完整采样序列
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSeries {
    pub samples: Vec<f32>,
    pub sample_rate: f64,
}

/// 60通道的内存数据集，构造后不可变，可在会话间只读共享
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    sample_rate: f64,
    channels: [Vec<f32>; CHANNEL_COUNT],
}

impl Dataset {
    pub fn new(sample_rate: f64, channels: [Vec<f32>; CHANNEL_COUNT]) -> Result<Self> {
        if !(sample_rate > 0.0) {
            return Err(StreamError::Dataset(format!(
                "invalid sample rate: {}",
                sample_rate
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// 生成确定性的合成数据：每个通道一条频率不同的正弦波（伏特量级）
    pub fn synthetic(sample_rate: f64, samples: usize) -> Self {
        let channels = std::array::from_fn(|ch| {
            let frequency = 5.0 + ch as f32;
            let amplitude = 2.0e-5 + ch as f32 * 1.0e-6;
            (0..samples)
                .map(|i| amplitude * (TAU * frequency * i as f32 / sample_rate as f32).sin())
                .collect()
        });
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel(&self, channel: ChannelId) -> &[f32] {
        &self.channels[channel.index()]
    }

    /// 可回放的采样数（最短通道的长度）
    pub fn len(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 时长（秒）
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// 只保留前 `samples` 个采样
    pub fn truncated(mut self, samples: usize) -> Self {
        for channel in self.channels.iter_mut() {
            channel.truncate(samples);
        }
        self
    }
}

/// 录制文件读取器（专有格式读取器在此边界接入）
pub trait RecordingReader: Send + Sync {
    /// 读取单个通道的完整采样序列
    fn read_channel(&self, path: &Path, channel: ChannelId) -> Result<ChannelSeries>;

    /// 读取全部60个通道
    fn read_dataset(&self, path: &Path) -> Result<Dataset> {
        let mut sample_rate = None;
        let mut channels: [Vec<f32>; CHANNEL_COUNT] = std::array::from_fn(|_| Vec::new());
        for channel in ChannelId::all() {
            let series = self.read_channel(path, channel)?;
            match sample_rate {
                None => sample_rate = Some(series.sample_rate),
                Some(rate) if rate != series.sample_rate => {
                    return Err(StreamError::Dataset(format!(
                        "channel {} has sample rate {} (expected {})",
                        channel, series.sample_rate, rate
                    )));
                }
                Some(_) => {}
            }
            channels[channel.index()] = series.samples;
        }
        Dataset::new(sample_rate.unwrap_or(0.0), channels)
    }
}

/// 本工作区二进制录制格式的读取器
#[derive(Debug, Clone, Default)]
pub struct RawRecordingReader;

struct Header {
    sample_rate: f64,
    samples_per_channel: usize,
}

impl RawRecordingReader {
    pub fn new() -> Self {
        Self
    }

    fn parse_header(path: &Path, mut bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(StreamError::Dataset(format!(
                "{} is not a recording file",
                path.display()
            )));
        }
        bytes.advance(4);

        let version = bytes.get_u16_le();
        if version != VERSION {
            return Err(StreamError::Dataset(format!(
                "unsupported recording version {}",
                version
            )));
        }

        let channel_count = bytes.get_u16_le() as usize;
        if channel_count != CHANNEL_COUNT {
            return Err(StreamError::Dataset(format!(
                "recording has {} channels (expected {})",
                channel_count, CHANNEL_COUNT
            )));
        }

        let sample_rate = bytes.get_f64_le();
        let declared = bytes.get_u64_le();

        // 头部声明的长度不可信，溢出按损坏文件处理
        let (samples_per_channel, expected) = usize::try_from(declared)
            .ok()
            .and_then(|samples| {
                samples
                    .checked_mul(CHANNEL_COUNT * SAMPLE_WIDTH)
                    .and_then(|body| body.checked_add(HEADER_LEN))
                    .map(|expected| (samples, expected))
            })
            .ok_or_else(|| {
                StreamError::Dataset(format!(
                    "{} declares an impossible length of {} samples per channel",
                    path.display(),
                    declared
                ))
            })?;

        if bytes.len() + HEADER_LEN != expected {
            return Err(StreamError::Dataset(format!(
                "{} is truncated: {} bytes (expected {})",
                path.display(),
                bytes.len() + HEADER_LEN,
                expected
            )));
        }

        Ok(Header {
            sample_rate,
            samples_per_channel,
        })
    }

    fn read_file(path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| {
            StreamError::Dataset(format!("cannot read {}: {}", path.display(), e))
        })
    }

    fn channel_slice(bytes: &[u8], header: &Header, channel: ChannelId) -> Vec<f32> {
        let stride = header.samples_per_channel * SAMPLE_WIDTH;
        let start = HEADER_LEN + channel.index() * stride;
        let mut data = &bytes[start..start + stride];
        let mut samples = Vec::with_capacity(header.samples_per_channel);
        while data.has_remaining() {
            samples.push(data.get_f32_le());
        }
        samples
    }
}

impl RecordingReader for RawRecordingReader {
    fn read_channel(&self, path: &Path, channel: ChannelId) -> Result<ChannelSeries> {
        let bytes = Self::read_file(path)?;
        let header = Self::parse_header(path, &bytes)?;
        Ok(ChannelSeries {
            samples: Self::channel_slice(&bytes, &header, channel),
            sample_rate: header.sample_rate,
        })
    }

    /// 只读一次文件
    fn read_dataset(&self, path: &Path) -> Result<Dataset> {
        let bytes = Self::read_file(path)?;
        let header = Self::parse_header(path, &bytes)?;
        let channels = std::array::from_fn(|ch| {
            // from_fn 的索引必然小于 CHANNEL_COUNT
            let channel = ChannelId::new(ch).unwrap_or(ChannelId::FIRST);
            Self::channel_slice(&bytes, &header, channel)
        });
        info!(
            "Loaded recording {}: {} samples/channel @ {} Hz",
            path.display(),
            header.samples_per_channel,
            header.sample_rate
        );
        Dataset::new(header.sample_rate, channels)
    }
}

/// 写出录制文件
pub fn write_recording(path: &Path, dataset: &Dataset) -> Result<()> {
    let samples = dataset.len();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + CHANNEL_COUNT * samples * SAMPLE_WIDTH);
    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u16_le(CHANNEL_COUNT as u16);
    buf.put_f64_le(dataset.sample_rate());
    buf.put_u64_le(samples as u64);
    for channel in ChannelId::all() {
        for &sample in &dataset.channel(channel)[..samples] {
            buf.put_f32_le(sample);
        }
    }

    fs::write(path, &buf)
        .map_err(|e| StreamError::Dataset(format!("cannot write {}: {}", path.display(), e)))?;
    debug!("Wrote recording {} ({} bytes)", path.display(), buf.len());
    Ok(())
}

/// 录制文件路径是否带有正确扩展名
pub fn is_recording_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == RECORDING_EXTENSION)
        .unwrap_or(false)
}

/// 给名称补上录制文件扩展名
pub fn recording_file_name(name: &str) -> PathBuf {
    let path = PathBuf::from(name);
    if is_recording_path(&path) {
        path
    } else {
        path.with_extension(RECORDING_EXTENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_synthetic_is_deterministic() {
        let a = Dataset::synthetic(10_000.0, 500);
        let b = Dataset::synthetic(10_000.0, 500);
        assert_eq!(a, b);
        assert_eq!(a.len(), 500);
        assert_ne!(
            a.channel(ChannelId::new(0).unwrap()),
            a.channel(ChannelId::new(1).unwrap())
        );
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.mear");
        let dataset = Dataset::synthetic(10_000.0, 1234);

        write_recording(&path, &dataset).unwrap();
        let reader = RawRecordingReader::new();

        assert_eq!(reader.read_dataset(&path).unwrap(), dataset);

        let channel = ChannelId::new(17).unwrap();
        let series = reader.read_channel(&path, channel).unwrap();
        assert_eq!(series.sample_rate, 10_000.0);
        assert_eq!(series.samples, dataset.channel(channel));
    }

    #[test]
    fn test_default_read_dataset_matches_override() {
        struct PerChannel(RawRecordingReader);
        impl RecordingReader for PerChannel {
            fn read_channel(&self, path: &Path, channel: ChannelId) -> Result<ChannelSeries> {
                self.0.read_channel(path, channel)
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2.mear");
        let dataset = Dataset::synthetic(5_000.0, 64);
        write_recording(&path, &dataset).unwrap();

        assert_eq!(PerChannel(RawRecordingReader).read_dataset(&path).unwrap(), dataset);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.mear");
        fs::write(&path, b"not a recording at all, definitely not").unwrap();
        assert!(matches!(
            RawRecordingReader.read_dataset(&path),
            Err(StreamError::Dataset(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.mear");
        write_recording(&path, &Dataset::synthetic(10_000.0, 10)).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(RawRecordingReader.read_dataset(&path).is_err());
    }

    #[test]
    fn test_rejects_oversized_sample_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.mear");
        write_recording(&path, &Dataset::synthetic(10_000.0, 10)).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN - 8..HEADER_LEN].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            RawRecordingReader.read_dataset(&path),
            Err(StreamError::Dataset(_))
        ));
        assert!(matches!(
            RawRecordingReader.read_channel(&path, ChannelId::FIRST),
            Err(StreamError::Dataset(_))
        ));
    }

    #[test]
    fn test_truncated() {
        let dataset = Dataset::synthetic(10_000.0, 1000).truncated(150);
        assert_eq!(dataset.len(), 150);
        assert!((dataset.duration_secs() - 0.015).abs() < 1e-9);
    }

    #[test]
    fn test_recording_file_name() {
        assert_eq!(recording_file_name("1"), PathBuf::from("1.mear"));
        assert_eq!(recording_file_name("rat/2.mear"), PathBuf::from("rat/2.mear"));
    }
}
