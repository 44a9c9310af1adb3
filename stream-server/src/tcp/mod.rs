pub mod control;
pub mod server;

pub use server::{ServerHandle, SessionInfo, SessionReport, StreamServer};
