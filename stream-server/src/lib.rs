pub mod config;
pub mod instrument;
pub mod recording;
pub mod streaming;
pub mod tcp;

pub use config::{DaqConfig, ServerConfig, SourceMode};
pub use instrument::InstrumentClient;
pub use recording::DatasetCatalog;
pub use tcp::{ServerHandle, SessionInfo, SessionReport, StreamServer};

#[cfg(test)]
mod server_test;
