use common::channel_map::{self, GRID_SIZE};
use common::{ChannelId, ChannelSelection};
use tracing::info;

use crate::history::ChannelHistory;

/// Receives the per-channel history after every complete tick.
///
/// A plotting front end implements this; `on_tick` runs on the receive loop, so
/// it should return quickly.
pub trait FrameConsumer: Send {
    fn on_tick(&mut self, tick: u64, history: &ChannelHistory);

    /// Stream ended (any reason)
    fn on_close(&mut self) {}
}

/// 8x8 electrode grid, row-major from the top left; corners are `None`
pub fn electrode_grid() -> [[Option<ChannelId>; GRID_SIZE as usize]; GRID_SIZE as usize] {
    std::array::from_fn(|row| {
        std::array::from_fn(|col| channel_map::channel_at(row as u8 + 1, col as u8 + 1))
    })
}

/// Summary of one channel's most recent window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLevel {
    pub channel: ChannelId,
    pub mean_abs: f32,
    pub peak: f32,
}

impl ChannelLevel {
    pub fn measure(history: &ChannelHistory, channel: ChannelId, values: usize) -> Self {
        let (sum, peak, count) = history
            .latest(channel, values)
            .fold((0.0f32, 0.0f32, 0usize), |(sum, peak, n), v| {
                (sum + v.abs(), peak.max(v.abs()), n + 1)
            });
        Self {
            channel,
            mean_abs: if count > 0 { sum / count as f32 } else { 0.0 },
            peak,
        }
    }
}

/// Logs signal levels once per second of received data
pub struct LoggingConsumer {
    channels: Vec<ChannelId>,
    ticks_per_report: u64,
    values_per_report: usize,
    last: Vec<ChannelLevel>,
}

impl LoggingConsumer {
    /// `ticks_per_second` = sample_rate / segment_length; `values_per_second`
    /// accounts for decimation in the history.
    pub fn new(layout: ChannelSelection, ticks_per_second: u64, values_per_second: usize) -> Self {
        let channels = match layout {
            ChannelSelection::All => ChannelId::all().collect(),
            ChannelSelection::Single(channel) => vec![channel],
        };
        Self {
            channels,
            ticks_per_report: ticks_per_second.max(1),
            values_per_report: values_per_second,
            last: Vec::new(),
        }
    }

    /// Levels logged in the last report
    pub fn last_report(&self) -> &[ChannelLevel] {
        &self.last
    }

    fn report(&mut self, tick: u64, history: &ChannelHistory) {
        self.last = self
            .channels
            .iter()
            .map(|&ch| ChannelLevel::measure(history, ch, self.values_per_report))
            .collect();

        if let [level] = self.last.as_slice() {
            info!(
                "t={}s electrode {}: mean |v| {:.3e} V, peak {:.3e} V",
                (tick + 1) / self.ticks_per_report,
                channel_map::label_for_channel(level.channel),
                level.mean_abs,
                level.peak
            );
            return;
        }

        let loudest = self
            .last
            .iter()
            .copied()
            .max_by(|a, b| a.peak.total_cmp(&b.peak));
        let mean = self.last.iter().map(|l| l.mean_abs).sum::<f32>() / self.last.len().max(1) as f32;
        if let Some(loudest) = loudest {
            info!(
                "t={}s {} channels: mean |v| {:.3e} V, loudest electrode {} peak {:.3e} V",
                (tick + 1) / self.ticks_per_report,
                self.last.len(),
                mean,
                channel_map::label_for_channel(loudest.channel),
                loudest.peak
            );
        }
    }
}

impl FrameConsumer for LoggingConsumer {
    fn on_tick(&mut self, tick: u64, history: &ChannelHistory) {
        if (tick + 1) % self.ticks_per_report == 0 {
            self.report(tick, history);
        }
    }

    fn on_close(&mut self) {
        info!("Stream closed");
    }
}
