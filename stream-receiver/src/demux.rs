use common::{ChannelId, ChannelSelection, CHANNEL_COUNT};

/// Where a received segment belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub channel: ChannelId,
    /// Tick the segment belongs to (0-based)
    pub tick: u64,
    /// Last segment of its tick
    pub end_of_tick: bool,
}

/// Recovers channel identity from stream position.
///
/// The wire format carries no channel tag: with an `All` layout each tick is 60
/// segments in ascending channel order, with `Single` every segment belongs to
/// the one selected channel.
#[derive(Debug, Clone)]
pub struct Demultiplexer {
    layout: ChannelSelection,
    position: usize,
    tick: u64,
}

impl Demultiplexer {
    pub fn new(layout: ChannelSelection) -> Self {
        Self {
            layout,
            position: 0,
            tick: 0,
        }
    }

    pub fn layout(&self) -> ChannelSelection {
        self.layout
    }

    /// Completed ticks
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Channel the next segment on the wire belongs to
    pub fn next_channel(&self) -> ChannelId {
        match self.layout {
            ChannelSelection::Single(channel) => channel,
            // position is always < CHANNEL_COUNT
            ChannelSelection::All => ChannelId::new(self.position).unwrap_or(ChannelId::FIRST),
        }
    }

    /// Assigns the segment just read and advances
    pub fn assign(&mut self) -> Slot {
        let channel = self.next_channel();
        let per_tick = self.layout.channels_per_tick();
        debug_assert!(per_tick <= CHANNEL_COUNT);

        self.position += 1;
        let end_of_tick = self.position == per_tick;
        let slot = Slot {
            channel,
            tick: self.tick,
            end_of_tick,
        };
        if end_of_tick {
            self.position = 0;
            self.tick += 1;
        }
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_layout_is_ascending() {
        let mut demux = Demultiplexer::new(ChannelSelection::All);
        for tick in 0..3u64 {
            for channel in ChannelId::all() {
                let slot = demux.assign();
                assert_eq!(slot.channel, channel);
                assert_eq!(slot.tick, tick);
                assert_eq!(slot.end_of_tick, channel.index() == CHANNEL_COUNT - 1);
            }
        }
        assert_eq!(demux.ticks(), 3);
    }

    #[test]
    fn test_single_layout_every_segment_is_a_tick() {
        let seven = ChannelId::new(7).unwrap();
        let mut demux = Demultiplexer::new(ChannelSelection::Single(seven));
        for tick in 0..5 {
            assert_eq!(
                demux.assign(),
                Slot {
                    channel: seven,
                    tick,
                    end_of_tick: true
                }
            );
        }
    }
}
