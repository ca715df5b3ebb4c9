/*
Timer event queue for the NAND backend.

Timed flash operations don't block the tick loop: each one becomes an event that
fires at `current_time + delay`.  When no channel can issue anything new, the
scheduler warps time to the earliest pending event and retires every event that
shares that trigger time, so parallel dies complete together.
*/

use std::collections::{HashMap, VecDeque};

use crate::busy::BusyTracker;
use crate::config::{BaseType, Tick};

pub type SlotTag = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub trigger_time: Tick,
    pub ch: BaseType,
    pub way: BaseType,
    pub notify: Option<SlotTag>,
    pub code: u32,
}

/// Completion words keyed by slot tag. Each posted code is read at most once.
#[derive(Debug, Default)]
pub struct CompletionBoard {
    posted: HashMap<SlotTag, u32>,
}

impl CompletionBoard {
    pub fn post(&mut self, slot: SlotTag, code: u32) {
        let prev = self.posted.insert(slot, code);
        debug_assert!(prev.is_none(), "slot {} completed twice", slot);
    }

    pub fn take(&mut self, slot: SlotTag) -> Option<u32> {
        self.posted.remove(&slot)
    }

    pub fn peek(&self, slot: SlotTag) -> Option<u32> {
        self.posted.get(&slot).copied()
    }

    pub fn len(&self) -> usize {
        self.posted.len()
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    current_time: Tick,
    ongoing: BaseType,
    events: VecDeque<TimerEvent>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Tick {
        self.current_time
    }

    #[cfg(test)]
    pub fn ongoing(&self) -> BaseType {
        self.ongoing
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn next_trigger(&self) -> Option<Tick> {
        self.events.front().map(|e| e.trigger_time)
    }

    /// Queue a completion for (ch, way) `delay` ticks from now and mark the way busy.
    /// A notification is only kept when it carries a non-zero code.
    pub fn schedule(
        &mut self,
        busy: &mut BusyTracker,
        ch: BaseType,
        way: BaseType,
        delay: Tick,
        notify: Option<SlotTag>,
        code: u32,
    ) {
        let event = TimerEvent {
            trigger_time: self.current_time + delay,
            ch,
            way,
            notify: if code != 0 { notify } else { None },
            code,
        };

        busy.mark_busy(ch, way);
        self.ongoing += 1;

        // first strictly-later entry, so equal trigger times keep arrival order
        let pos = self
            .events
            .iter()
            .position(|e| e.trigger_time > event.trigger_time)
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }

    /// Time warp: jump to the earliest trigger time and fire every event due then.
    /// Returns the fired events in order; empty when nothing is pending.
    pub fn advance(&mut self, busy: &mut BusyTracker, board: &mut CompletionBoard) -> Vec<TimerEvent> {
        let mut fired = Vec::new();
        let Some(first) = self.events.front() else {
            return fired;
        };
        let due = first.trigger_time;
        debug_assert!(due >= self.current_time, "time moved backward");

        while let Some(event) = self.events.front() {
            if event.trigger_time != due {
                break;
            }
            let Some(event) = self.events.pop_front() else { break };

            self.ongoing -= 1;
            self.current_time = event.trigger_time;
            busy.mark_ready(event.ch, event.way);
            if let Some(slot) = event.notify {
                board.post(slot, event.code);
            }
            fired.push(event);
        }

        fired
    }
}
