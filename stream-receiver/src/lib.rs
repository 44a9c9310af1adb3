pub mod config;
pub mod consumer;
pub mod decimate;
pub mod demux;
pub mod history;
pub mod receiver;
pub mod watchdog;

pub use config::{ReceiverConfig, WatchdogConfig};
pub use consumer::{FrameConsumer, LoggingConsumer};
pub use decimate::decimate_min_max;
pub use demux::{Demultiplexer, Slot};
pub use history::ChannelHistory;
pub use receiver::{ReceiverSummary, StreamReceiver};
pub use watchdog::{BacklogProbe, LagWarning, LagWatchdog, NullProbe};
#[cfg(unix)]
pub use watchdog::FionreadProbe;
