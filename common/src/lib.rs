pub mod channel_map;
pub mod codec;
pub mod error;
pub mod pacer;
pub mod protocol;
pub mod recording;
pub mod segment_reader;
pub mod types;

pub use error::*;
pub use pacer::TickPacer;
pub use protocol::*;
pub use recording::{ChannelSeries, Dataset, RawRecordingReader, RecordingReader};
pub use segment_reader::{ReaderState, SegmentReader};
pub use types::*;
