use crate::config::BaseType;

/// Ready/busy register per channel. A set bit means the way is ready.
#[derive(Debug, Clone)]
pub struct BusyTracker {
    ready_busy: Vec<u32>,
    ways: BaseType,
}

impl BusyTracker {
    pub fn new(channels: BaseType, ways: BaseType) -> Self {
        assert!(ways <= 32, "ready/busy register holds at most 32 ways");
        let all_ready = if ways == 32 { u32::MAX } else { (1u32 << ways) - 1 };
        BusyTracker { ready_busy: vec![all_ready; channels], ways }
    }

    pub fn mark_busy(&mut self, ch: BaseType, way: BaseType) {
        debug_assert!(way < self.ways);
        self.ready_busy[ch] &= !(1 << way);
    }

    pub fn mark_ready(&mut self, ch: BaseType, way: BaseType) {
        debug_assert!(way < self.ways);
        self.ready_busy[ch] |= 1 << way;
    }

    pub fn is_busy(&self, ch: BaseType, way: BaseType) -> bool {
        self.ready_busy[ch] & (1 << way) == 0
    }

    pub fn any_busy(&self) -> bool {
        (0..self.ready_busy.len()).any(|ch| (0..self.ways).any(|way| self.is_busy(ch, way)))
    }
}
