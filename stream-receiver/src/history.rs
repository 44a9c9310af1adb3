use common::{ChannelId, CHANNEL_COUNT};
use std::collections::VecDeque;

use crate::decimate::decimate_min_max;

/// Bounded per-channel sample windows, what a plot would draw.
#[derive(Debug, Clone)]
pub struct ChannelHistory {
    windows: [VecDeque<f32>; CHANNEL_COUNT],
    capacity: usize,
    decimation: usize,
}

impl ChannelHistory {
    /// Window of `window_seconds` at `sample_rate`. With decimation each block
    /// of `decimation` samples is stored as a max/min pair.
    pub fn new(sample_rate: f64, window_seconds: f64, decimation: usize) -> Self {
        let samples = (sample_rate * window_seconds).max(0.0) as usize;
        let capacity = if decimation > 1 {
            2 * (samples / decimation)
        } else {
            samples
        };
        Self {
            windows: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
            capacity,
            decimation,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// Appends a segment, evicting the oldest values beyond capacity
    pub fn push(&mut self, channel: ChannelId, samples: &[f32]) {
        let window = &mut self.windows[channel.index()];
        if self.decimation > 1 {
            window.extend(decimate_min_max(samples, self.decimation));
        } else {
            window.extend(samples.iter().copied());
        }
        let excess = window.len().saturating_sub(self.capacity);
        window.drain(..excess);
    }

    pub fn window(&self, channel: ChannelId) -> &VecDeque<f32> {
        &self.windows[channel.index()]
    }

    /// The most recent `n` values (fewer if the window is shorter)
    pub fn latest(&self, channel: ChannelId, n: usize) -> impl Iterator<Item = f32> + '_ {
        let window = self.window(channel);
        window.iter().skip(window.len().saturating_sub(n)).copied()
    }

    pub fn clear(&mut self) {
        for window in self.windows.iter_mut() {
            window.clear();
        }
    }
}
