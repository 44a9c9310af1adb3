//! Lag watchdog.
//!
//! Samples the number of unread bytes queued in the socket receive buffer and
//! converts it to seconds of data. A growing backlog means the consumer is
//! falling behind the sender. The watchdog only observes: it never reads from
//! the socket or drops data.

use common::SAMPLE_WIDTH;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ReceiverConfig, WatchdogConfig};

/// Source of the socket backlog measurement
pub trait BacklogProbe: Send {
    /// Unread bytes in the receive buffer, `None` when unavailable
    fn backlog_bytes(&self) -> Option<usize>;
}

/// Probe for platforms without a backlog query
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProbe;

impl BacklogProbe for NullProbe {
    fn backlog_bytes(&self) -> Option<usize> {
        None
    }
}

/// `ioctl(FIONREAD)` on a socket descriptor.
///
/// Holds the raw descriptor only; the owner must stop the watchdog before the
/// socket is closed.
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
pub struct FionreadProbe {
    fd: std::os::unix::io::RawFd,
}

#[cfg(unix)]
impl FionreadProbe {
    pub fn new<S: std::os::unix::io::AsRawFd>(socket: &S) -> Self {
        Self {
            fd: socket.as_raw_fd(),
        }
    }
}

#[cfg(unix)]
impl BacklogProbe for FionreadProbe {
    fn backlog_bytes(&self) -> Option<usize> {
        let mut available: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int through the pointer.
        let rc = unsafe { libc::ioctl(self.fd, libc::FIONREAD, &mut available as *mut libc::c_int) };
        if rc == 0 && available >= 0 {
            Some(available as usize)
        } else {
            None
        }
    }
}

/// Best probe available for `socket` on this platform
#[cfg(unix)]
pub fn platform_probe<S: std::os::unix::io::AsRawFd>(socket: &S) -> Box<dyn BacklogProbe> {
    Box::new(FionreadProbe::new(socket))
}

#[cfg(not(unix))]
pub fn platform_probe<S>(_socket: &S) -> Box<dyn BacklogProbe> {
    Box::new(NullProbe)
}

/// Emitted when the backlog reaches the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct LagWarning {
    pub backlog_bytes: usize,
    pub backlog_secs: f64,
}

pub struct LagWatchdog {
    probe: Box<dyn BacklogProbe>,
    config: WatchdogConfig,
    /// Bytes of wire data per second of signal
    bytes_per_second: f64,
    warnings: Option<mpsc::UnboundedSender<LagWarning>>,
}

impl LagWatchdog {
    /// Backlog is converted at the per-channel rate (4 bytes per sample) for
    /// every wire layout, so a reflected stream warns earlier in wall-clock
    /// terms than a single-channel one.
    pub fn new(probe: Box<dyn BacklogProbe>, config: WatchdogConfig, sample_rate: f64) -> Self {
        Self {
            probe,
            config,
            bytes_per_second: SAMPLE_WIDTH as f64 * sample_rate,
            warnings: None,
        }
    }

    pub fn for_receiver(probe: Box<dyn BacklogProbe>, config: &ReceiverConfig) -> Self {
        Self::new(probe, config.watchdog.clone(), config.sample_rate)
    }

    /// Also deliver warnings to an observer
    pub fn with_warnings(mut self, warnings: mpsc::UnboundedSender<LagWarning>) -> Self {
        self.warnings = Some(warnings);
        self
    }

    pub fn backlog_secs(&self, bytes: usize) -> f64 {
        if self.bytes_per_second > 0.0 {
            bytes as f64 / self.bytes_per_second
        } else {
            0.0
        }
    }

    /// One measurement; `Some` when the backlog is at or above the threshold
    pub fn check(&self) -> Option<LagWarning> {
        let bytes = self.probe.backlog_bytes()?;
        let secs = self.backlog_secs(bytes);
        debug!("Socket backlog: {} bytes ({:.2}s)", bytes, secs);
        if secs >= self.config.threshold_secs {
            Some(LagWarning {
                backlog_bytes: bytes,
                backlog_secs: secs,
            })
        } else {
            None
        }
    }

    /// Samples every interval until cancelled; returns the number of warnings
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut emitted = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Some(warning) = self.check() {
                        emitted += 1;
                        warn!(
                            "Receiver is falling behind: {:.1}s of data ({} bytes) waiting in the socket",
                            warning.backlog_secs,
                            warning.backlog_bytes
                        );
                        if let Some(tx) = &self.warnings {
                            let _ = tx.send(warning);
                        }
                    }
                }
            }
        }

        debug!("Lag watchdog stopped after {} warnings", emitted);
        emitted
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(cancel))
    }
}
