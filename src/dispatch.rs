use log::trace;

use crate::addr::{DieId, Geometry};
use crate::config::BaseType;
use crate::ftl::{FlashOp, FlashOpKind, Ftl};
use crate::nand::{NandCommand, NandContext, NandScheduler, FEATURES_DONE, STATUS_READY, TRANSFER_DONE};
use crate::timer::SlotTag;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    op: Option<FlashOp>,
    // command most recently loaded for this die
    issued: NandCommand,
}

/// Feeds each die's flash operations to the channel command registers, one
/// NAND command at a time, and retires operations once their last command lands.
#[derive(Debug)]
pub struct DieDispatcher {
    geo: Geometry,
    inflight: Vec<Option<InFlight>>,
    // dies still owed their Reset / SetFeatures / GetFeatures bring-up
    needs_init: Vec<bool>,
    next_way: Vec<BaseType>,
}

impl DieDispatcher {
    pub fn new(geo: Geometry) -> Self {
        DieDispatcher {
            geo,
            inflight: vec![None; geo.dies()],
            needs_init: vec![true; geo.dies()],
            next_way: vec![0; geo.channels],
        }
    }

    fn tag(die: DieId) -> SlotTag {
        die as SlotTag
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.iter().all(|f| f.is_none()) && !self.needs_init.iter().any(|&n| n)
    }

    pub fn initialized(&self, die: DieId) -> bool {
        !self.needs_init[die] && !matches!(self.inflight[die], Some(InFlight { op: None, .. }))
    }

    /// Load at most one command per idle channel. Returns the flash operations
    /// that finished since the last call.
    pub fn step(&mut self, ftl: &mut Ftl, sched: &mut NandScheduler, ctx: &mut NandContext) -> Vec<FlashOp> {
        let mut retired = Vec::new();

        for ch in 0..self.geo.channels {
            if !sched.is_idle(ch) {
                continue;
            }
            let start = self.next_way[ch];
            for i in 0..self.geo.ways {
                let way = (start + i) % self.geo.ways;
                if ctx.busy.is_busy(ch, way) {
                    continue;
                }
                let die = self.geo.die_of(ch, way);
                if self.advance_die(die, ftl, sched, ctx, &mut retired) {
                    self.next_way[ch] = (way + 1) % self.geo.ways;
                    break;
                }
            }
        }

        retired
    }

    // Die is ready. Finish whatever it was doing, then load its next command.
    // Returns true when the channel register got loaded.
    fn advance_die(
        &mut self,
        die: DieId,
        ftl: &mut Ftl,
        sched: &mut NandScheduler,
        ctx: &mut NandContext,
        retired: &mut Vec<FlashOp>,
    ) -> bool {
        let (ch, way) = self.geo.ch_way(die);

        if let Some(flight) = self.inflight[die] {
            let next = match flight.issued {
                NandCommand::Reset => Some((NandCommand::SetFeatures, None)),
                NandCommand::SetFeatures => Some((NandCommand::GetFeatures, Some(Self::tag(die)))),
                NandCommand::ReadPageTrigger => {
                    // relocation reads land in a temp buffer untouched by ECC reporting
                    let cmd = match flight.op {
                        Some(FlashOp { slot: None, .. }) => NandCommand::ReadPageTransferRaw,
                        _ => NandCommand::ReadPageTransfer,
                    };
                    Some((cmd, Some(Self::tag(die))))
                }
                NandCommand::ProgramPage | NandCommand::BlockErase => {
                    Some((NandCommand::StatusCheck, Some(Self::tag(die))))
                }
                NandCommand::GetFeatures => {
                    self.expect_code(ctx, die, FEATURES_DONE, flight.issued);
                    None
                }
                NandCommand::ReadPageTransfer | NandCommand::ReadPageTransferRaw => {
                    self.expect_code(ctx, die, TRANSFER_DONE, flight.issued);
                    None
                }
                NandCommand::StatusCheck => {
                    self.expect_code(ctx, die, STATUS_READY, flight.issued);
                    None
                }
                NandCommand::Nop => unreachable!("die {} in flight with no command", die),
            };

            match next {
                Some((cmd, completion)) => {
                    sched.select(ch, way, cmd, completion);
                    self.inflight[die] = Some(InFlight { op: flight.op, issued: cmd });
                    return true;
                }
                None => {
                    self.inflight[die] = None;
                    if let Some(op) = flight.op {
                        trace!("[{}] die {} retired {:?}", ctx.now(), die, op);
                        retired.push(op);
                    }
                }
            }
        }

        if self.needs_init[die] {
            self.needs_init[die] = false;
            sched.select(ch, way, NandCommand::Reset, None);
            self.inflight[die] = Some(InFlight { op: None, issued: NandCommand::Reset });
            return true;
        }

        let Some(op) = ftl.pop_op(die) else {
            return false;
        };
        let cmd = match op.kind {
            FlashOpKind::Read => NandCommand::ReadPageTrigger,
            FlashOpKind::Program => NandCommand::ProgramPage,
            FlashOpKind::Erase => NandCommand::BlockErase,
        };
        sched.select(ch, way, cmd, None);
        self.inflight[die] = Some(InFlight { op: Some(op), issued: cmd });
        true
    }

    fn expect_code(&self, ctx: &mut NandContext, die: DieId, code: u32, cmd: NandCommand) {
        let got = ctx.board.take(Self::tag(die));
        assert_eq!(got, Some(code), "die {} finished {:?} without its completion code", die, cmd);
    }
}
