// 线编解码 - 定宽采样与字节缓冲互转
//
// 无状态、无副作用。所有采样均为小端4字节，浮点或整数取决于会话格式。
// 整数格式是带换算系数的定点表示：raw = round(v / C)，v = raw * C。

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StreamError};
use crate::types::{SampleFormat, CONVERSION_CONSTANT, SAMPLE_WIDTH};

/// 将物理单位的采样值转换为原始DAQ整数
pub fn to_raw(sample: f32) -> i32 {
    (sample as f64 / CONVERSION_CONSTANT).round() as i32
}

/// 将原始DAQ整数转换为物理单位（伏特）
pub fn from_raw(raw: i32) -> f32 {
    (raw as f64 * CONVERSION_CONSTANT) as f32
}

/// 编码采样序列，输出恰好 `4 * samples.len()` 字节
pub fn encode(samples: &[f32], format: SampleFormat) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * SAMPLE_WIDTH);
    encode_into(samples, format, &mut buf);
    buf.freeze()
}

/// 追加编码到已有缓冲区（复用分配）
pub fn encode_into(samples: &[f32], format: SampleFormat, buf: &mut BytesMut) {
    buf.reserve(samples.len() * SAMPLE_WIDTH);
    match format {
        SampleFormat::Float32 => {
            for &sample in samples {
                buf.put_f32_le(sample);
            }
        }
        SampleFormat::Int32 => {
            for &sample in samples {
                buf.put_i32_le(to_raw(sample));
            }
        }
    }
}

/// 编码原始整数采样（模拟DAQ直接输出原始单位）
pub fn encode_raw(raw: &[i32], buf: &mut BytesMut) {
    buf.reserve(raw.len() * SAMPLE_WIDTH);
    for &value in raw {
        buf.put_i32_le(value);
    }
}

/// 解码字节缓冲，长度必须是采样宽度的整数倍
pub fn decode(bytes: &[u8], format: SampleFormat) -> Result<Vec<f32>> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(StreamError::MalformedSegment { len: bytes.len() });
    }

    let mut cursor = bytes;
    let mut samples = Vec::with_capacity(bytes.len() / SAMPLE_WIDTH);
    match format {
        SampleFormat::Float32 => {
            while cursor.has_remaining() {
                samples.push(cursor.get_f32_le());
            }
        }
        SampleFormat::Int32 => {
            while cursor.has_remaining() {
                samples.push(from_raw(cursor.get_i32_le()));
            }
        }
    }
    Ok(samples)
}
