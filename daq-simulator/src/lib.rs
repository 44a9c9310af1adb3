pub mod config;
pub mod daq;

pub use config::SimulatorConfig;
pub use daq::MockDaq;

#[cfg(test)]
mod live_test;
