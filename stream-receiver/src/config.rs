use common::{
    ChannelId, ChannelSelection, Handshake, SampleFormat, DEFAULT_IO_TIMEOUT, DEFAULT_SAMPLE_RATE,
    PLAYBACK_SEGMENT_LENGTH,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Default stream server address
pub const DEFAULT_SERVER_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 8080);

/// Receiver configuration
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Stream server (or DAQ data port) to connect to
    pub server_addr: SocketAddr,

    /// Handshake to send right after connecting; `None` for auto-setup servers
    /// and raw instrument streams
    pub handshake: Option<Handshake>,

    /// Samples per segment, agreed out-of-band
    pub segment_length: usize,

    /// Which channels appear on the wire each tick
    pub layout: ChannelSelection,

    /// Float32 from the stream server, Int32 straight from an instrument
    pub format: SampleFormat,

    pub sample_rate: f64,

    /// Seconds of history kept per channel
    pub window_seconds: f64,

    /// Min/max decimation factor applied before storing history (1 = none)
    pub decimation: usize,

    pub connect_timeout: Duration,
    pub io_timeout: Duration,

    pub watchdog: WatchdogConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        let (ip, port) = DEFAULT_SERVER_ADDR;
        Self {
            server_addr: SocketAddr::from((ip, port)),
            handshake: None,
            segment_length: PLAYBACK_SEGMENT_LENGTH,
            layout: ChannelSelection::Single(ChannelId::FIRST),
            format: SampleFormat::Float32,
            sample_rate: DEFAULT_SAMPLE_RATE as f64,
            window_seconds: 2.0,
            decimation: 1,
            connect_timeout: Duration::from_secs(5),
            io_timeout: DEFAULT_IO_TIMEOUT,
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl ReceiverConfig {
    /// Use `handshake` and derive the wire layout from it.
    ///
    /// Overrides in the handshake win over the current values; the server falls
    /// back to its own defaults for fields the handshake leaves out, so those
    /// must already match the server here.
    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        if let Some(segment_length) = handshake.segment_length {
            self.segment_length = segment_length;
        }
        let reflect = handshake
            .reflect
            .unwrap_or(matches!(self.layout, ChannelSelection::All));
        self.layout = ChannelSelection::from_reflect(reflect, handshake.channel);
        self.handshake = Some(handshake);
        self
    }
}

/// Lag watchdog configuration
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub enabled: bool,

    /// How often the socket backlog is sampled
    pub interval: Duration,

    /// Backlog (seconds of data) at or above which a warning is emitted
    pub threshold_secs: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            threshold_secs: 20.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_handshake_layout() {
        let channel = ChannelId::new(12).unwrap();
        let config = ReceiverConfig::default().with_handshake(Handshake::new("default", channel));
        assert_eq!(config.layout, ChannelSelection::Single(channel));
        assert_eq!(config.segment_length, PLAYBACK_SEGMENT_LENGTH);

        let mut handshake = Handshake::new("default", channel);
        handshake.reflect = Some(true);
        handshake.segment_length = Some(250);
        let config = ReceiverConfig::default().with_handshake(handshake);
        assert_eq!(config.layout, ChannelSelection::All);
        assert_eq!(config.segment_length, 250);
        assert!(config.handshake.is_some());
    }
}
