use log::{trace, warn};

use crate::busy::BusyTracker;
use crate::config::{BaseType, LatencyConfig, Tick};
use crate::timer::{CompletionBoard, SlotTag, TimerQueue};

pub const STATUS_READY: u32 = (0x60 << 1) | 1;
pub const FEATURES_DONE: u32 = 1;
pub const TRANSFER_DONE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NandCommand {
    #[default]
    Nop,
    Reset,
    SetFeatures,
    GetFeatures,
    ReadPageTrigger,
    ReadPageTransfer,
    ProgramPage,
    BlockErase,
    StatusCheck,
    ReadPageTransferRaw,
}

/// Simulated time, busy bits and completion words shared by every channel.
#[derive(Debug)]
pub struct NandContext {
    pub timer: TimerQueue,
    pub busy: BusyTracker,
    pub board: CompletionBoard,
}

impl NandContext {
    pub fn new(channels: BaseType, ways: BaseType) -> Self {
        NandContext {
            timer: TimerQueue::new(),
            busy: BusyTracker::new(channels, ways),
            board: CompletionBoard::default(),
        }
    }

    pub fn now(&self) -> Tick {
        self.timer.now()
    }
}

// Command register of one channel.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelCtl {
    cmd: NandCommand,
    way: BaseType,
    completion: Option<SlotTag>,
}

#[derive(Debug)]
pub struct NandScheduler {
    channels: Vec<ChannelCtl>,
    latency: LatencyConfig,
}

impl NandScheduler {
    pub fn new(channels: BaseType, latency: LatencyConfig) -> Self {
        NandScheduler { channels: vec![ChannelCtl::default(); channels], latency }
    }

    pub fn is_idle(&self, ch: BaseType) -> bool {
        self.channels[ch].cmd == NandCommand::Nop
    }

    pub fn selected(&self, ch: BaseType) -> NandCommand {
        self.channels[ch].cmd
    }

    /// Load a command into the channel's register. The channel must be idle.
    pub fn select(&mut self, ch: BaseType, way: BaseType, cmd: NandCommand, completion: Option<SlotTag>) {
        assert!(
            self.is_idle(ch),
            "channel {} already holds {:?}, cannot select {:?}",
            ch,
            self.channels[ch].cmd,
            cmd
        );
        self.channels[ch] = ChannelCtl { cmd, way, completion };
    }

    /// One pass over every channel. Returns how many commands went out; when none
    /// did and events are pending, time is warped to the next completion.
    pub fn schedule(&mut self, ctx: &mut NandContext) -> usize {
        let mut dispatched = 0;

        for ch in 0..self.channels.len() {
            let ctl = self.channels[ch];
            if ctl.cmd == NandCommand::Nop {
                continue;
            }
            if ctx.busy.is_busy(ch, ctl.way) {
                warn!("ch {} way {} busy, holding {:?}", ch, ctl.way, ctl.cmd);
                continue;
            }

            match ctl.cmd {
                NandCommand::Nop => unreachable!(),
                NandCommand::Reset | NandCommand::SetFeatures => {
                    ctx.busy.mark_ready(ch, ctl.way);
                }
                NandCommand::GetFeatures => Self::complete_now(ctx, ctl.completion, FEATURES_DONE),
                NandCommand::StatusCheck => Self::complete_now(ctx, ctl.completion, STATUS_READY),
                NandCommand::ReadPageTrigger => {
                    ctx.timer.schedule(&mut ctx.busy, ch, ctl.way, self.latency.read_trigger, None, 0);
                }
                NandCommand::ReadPageTransfer | NandCommand::ReadPageTransferRaw => {
                    ctx.timer.schedule(
                        &mut ctx.busy,
                        ch,
                        ctl.way,
                        self.latency.read_transfer,
                        ctl.completion,
                        TRANSFER_DONE,
                    );
                }
                NandCommand::ProgramPage => {
                    ctx.timer.schedule(&mut ctx.busy, ch, ctl.way, self.latency.program, None, 0);
                }
                NandCommand::BlockErase => {
                    ctx.timer.schedule(&mut ctx.busy, ch, ctl.way, self.latency.erase, None, 0);
                }
            }

            trace!("[{}] ch {} way {} {:?}", ctx.now(), ch, ctl.way, ctl.cmd);
            self.channels[ch] = ChannelCtl::default();
            dispatched += 1;
        }

        if dispatched == 0 && !ctx.timer.is_empty() {
            ctx.timer.advance(&mut ctx.busy, &mut ctx.board);
        }

        dispatched
    }

    fn complete_now(ctx: &mut NandContext, completion: Option<SlotTag>, code: u32) {
        match completion {
            Some(slot) => ctx.board.post(slot, code),
            None => warn!("completion requested without a slot, dropping code {:#x}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(channels: BaseType, ways: BaseType) -> (NandScheduler, NandContext) {
        (NandScheduler::new(channels, LatencyConfig::default()), NandContext::new(channels, ways))
    }

    #[test]
    fn instant_commands_resolve_in_the_same_pass() {
        let (mut sched, mut ctx) = setup(3, 1);
        sched.select(0, 0, NandCommand::Reset, None);
        sched.select(1, 0, NandCommand::GetFeatures, Some(11));
        sched.select(2, 0, NandCommand::StatusCheck, Some(12));

        assert_eq!(sched.schedule(&mut ctx), 3);
        assert!((0..3).all(|ch| sched.is_idle(ch)));
        assert_eq!(ctx.board.take(11), Some(FEATURES_DONE));
        assert_eq!(ctx.board.take(12), Some(0xC1));
        assert_eq!(ctx.now(), 0);
        assert!(ctx.timer.is_empty());
    }

    #[test]
    fn timed_commands_use_their_latency() {
        let lat = LatencyConfig::default();
        let (mut sched, mut ctx) = setup(4, 1);
        sched.select(0, 0, NandCommand::ReadPageTrigger, None);
        sched.select(1, 0, NandCommand::ReadPageTransfer, Some(1));
        sched.select(2, 0, NandCommand::ProgramPage, None);
        sched.select(3, 0, NandCommand::BlockErase, None);
        assert_eq!(sched.schedule(&mut ctx), 4);
        assert!((0..4).all(|ch| ctx.busy.is_busy(ch, 0)));

        // nothing left to issue: every following pass warps to the next completion
        let mut times = Vec::new();
        while !ctx.timer.is_empty() {
            assert_eq!(sched.schedule(&mut ctx), 0);
            times.push(ctx.now());
        }
        assert_eq!(times, vec![lat.read_transfer, lat.read_trigger, lat.program, lat.erase]);
        assert_eq!(ctx.board.take(1), Some(TRANSFER_DONE));
        assert!(!ctx.busy.any_busy());
    }

    #[test]
    fn raw_transfer_notifies_like_transfer() {
        let (mut sched, mut ctx) = setup(1, 1);
        sched.select(0, 0, NandCommand::ReadPageTransferRaw, Some(4));
        sched.schedule(&mut ctx);
        assert_eq!(ctx.board.peek(4), None);
        sched.schedule(&mut ctx);
        assert_eq!(ctx.board.take(4), Some(TRANSFER_DONE));
        assert_eq!(ctx.now(), LatencyConfig::default().read_transfer);
    }

    #[test]
    fn holds_command_for_busy_way() {
        let (mut sched, mut ctx) = setup(1, 2);
        sched.select(0, 1, NandCommand::ProgramPage, None);
        sched.schedule(&mut ctx);

        sched.select(0, 1, NandCommand::ProgramPage, None);
        // way 1 still busy: the pass issues nothing and warps instead
        assert_eq!(sched.schedule(&mut ctx), 0);
        assert_eq!(sched.selected(0), NandCommand::ProgramPage);
        assert_eq!(ctx.now(), LatencyConfig::default().program);

        assert_eq!(sched.schedule(&mut ctx), 1);
        assert_eq!(ctx.timer.next_trigger(), Some(2 * LatencyConfig::default().program));
    }

    #[test]
    fn idle_pass_with_empty_queue_keeps_time() {
        let (mut sched, mut ctx) = setup(2, 2);
        assert_eq!(sched.schedule(&mut ctx), 0);
        assert_eq!(ctx.now(), 0);
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn select_on_loaded_channel_panics() {
        let (mut sched, _ctx) = setup(1, 1);
        sched.select(0, 0, NandCommand::ProgramPage, None);
        sched.select(0, 0, NandCommand::BlockErase, None);
    }
}
