// 电极映射 - 8x8 MEA网格坐标与逻辑通道索引互转
//
// 电极标签为 row*10 + col（行列从1开始），四个角（11, 18, 81, 88）没有电极。
// 通道索引按列优先顺序分配。

use crate::types::{ChannelId, CHANNEL_COUNT};

/// 网格边长
pub const GRID_SIZE: u8 = 8;

/// 直采模式默认选中的电极
pub const DEFAULT_LIVE_ELECTRODE: u8 = 22;

/// 通道索引 -> 电极标签
static ELECTRODE_LABELS: [u8; CHANNEL_COUNT] = build_labels();

const fn is_corner(row: u8, col: u8) -> bool {
    (row == 1 || row == GRID_SIZE) && (col == 1 || col == GRID_SIZE)
}

const fn build_labels() -> [u8; CHANNEL_COUNT] {
    let mut labels = [0u8; CHANNEL_COUNT];
    let mut index = 0;
    let mut col = 1;
    while col <= GRID_SIZE {
        let mut row = 1;
        while row <= GRID_SIZE {
            if !is_corner(row, col) {
                labels[index] = row * 10 + col;
                index += 1;
            }
            row += 1;
        }
        col += 1;
    }
    labels
}

/// 电极标签对应的通道
pub fn channel_for_label(label: u8) -> Option<ChannelId> {
    ELECTRODE_LABELS
        .iter()
        .position(|&l| l == label)
        .and_then(|index| ChannelId::new(index).ok())
}

/// 通道对应的电极标签
pub fn label_for_channel(channel: ChannelId) -> u8 {
    ELECTRODE_LABELS[channel.index()]
}

/// 网格坐标（从1开始）对应的通道，角落或越界返回None
pub fn channel_at(row: u8, col: u8) -> Option<ChannelId> {
    if !(1..=GRID_SIZE).contains(&row) || !(1..=GRID_SIZE).contains(&col) {
        return None;
    }
    channel_for_label(row * 10 + col)
}

/// 直采模式默认通道
pub fn default_live_channel() -> ChannelId {
    channel_for_label(DEFAULT_LIVE_ELECTRODE).unwrap_or(ChannelId::FIRST)
}
