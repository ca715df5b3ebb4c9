#[cfg(test)]
use std::{println as info, println as warn, println as error, println as trace, println as debug };

#[cfg(not(test))]
use log::*;

use byte_unit::Byte;

use crate::config::{FullConfig, Tick};
use crate::dispatch::DieDispatcher;
use crate::ftl::{Ftl, FtlStats};
use crate::host::Workload;
use crate::nand::{NandContext, NandScheduler};
use crate::nvme::{handle_io_cmd, slices, Disposition, IoCommandBuilder, IoOp, NvmeStatus, CMD_BYTES};
use crate::request::{Request, RequestQueue, RequestState};
use crate::timer::SlotTag;

// host data buffers, one page per request slot
const BUFFER_BASE: u64 = 0x1000_0000;

// iterations allowed without the clock moving or any work landing
const STALL_LIMIT: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimReport {
    pub elapsed: Tick,
    pub completed: u64,
    pub failed: u64,
    pub ftl: FtlStats,
}

pub struct Simulation {
    cfg: FullConfig,
    ns_size: u64,
    pub(crate) ftl: Ftl,
    pub(crate) ctx: NandContext,
    sched: NandScheduler,
    dispatcher: DieDispatcher,
    pub(crate) queue: RequestQueue,
    workload: Workload,
    // request turned away by a full queue, retried next tick
    throttled: Option<Request>,
    completed: u64,
    failed: u64,
}

impl Simulation {
    /// Build the device from an already validated configuration.
    pub fn new(cfg: FullConfig) -> Self {
        let ssd = &cfg.ssd;
        let ns_size = ssd.namespace_size();
        let mut ftl = Ftl::new(ssd);
        if cfg.sim.precondition {
            ftl.precondition();
        }
        let geo = ftl.geometry();

        info!(
            "Device: {} ch x {} way, {} blocks/die, {} pages/block, namespace {} blocks ({})",
            ssd.channels,
            ssd.ways,
            ssd.blocks_per_die,
            ssd.pages_per_block,
            ns_size,
            Byte::from_bytes(ns_size as u128 * ssd.page_size as u128).get_appropriate_unit(true)
        );

        let workload = Workload::new(
            &cfg.hosts,
            ns_size,
            cfg.sim.ops,
            cfg.sim.seed,
            cfg.sim.report_interval,
            ssd.page_size as u64,
        );

        Simulation {
            ns_size,
            ftl,
            ctx: NandContext::new(ssd.channels, ssd.ways),
            sched: NandScheduler::new(ssd.channels, cfg.latency),
            dispatcher: DieDispatcher::new(geo),
            queue: RequestQueue::new(cfg.sim.max_queue_depth),
            workload,
            throttled: None,
            completed: 0,
            failed: 0,
            cfg,
        }
    }

    pub fn now(&self) -> Tick {
        self.ctx.now()
    }

    pub fn is_idle(&self) -> bool {
        !self.workload.has_jobs()
            && self.throttled.is_none()
            && self.queue.outstanding() == 0
            && self.ftl.pending_ops() == 0
            && self.dispatcher.is_idle()
            && (0..self.cfg.ssd.channels).all(|ch| self.sched.is_idle(ch))
            && self.ctx.timer.is_empty()
    }

    /// Run until every job has been issued and completed.
    pub fn run(&mut self) -> SimReport {
        let mut stalled = 0;
        let mut last = (self.now(), self.completed, self.ftl.pending_ops());

        while !self.is_idle() {
            self.tick();

            let cur = (self.now(), self.completed, self.ftl.pending_ops());
            if cur == last {
                stalled += 1;
                assert!(
                    stalled < STALL_LIMIT,
                    "simulation stalled at {}: {} requests outstanding, {} flash ops pending",
                    self.now(),
                    self.queue.outstanding(),
                    self.ftl.pending_ops()
                );
            } else {
                stalled = 0;
                last = cur;
            }
        }

        self.workload.update_and_print_bw(self.now());
        self.report()
    }

    pub fn report(&self) -> SimReport {
        SimReport { elapsed: self.now(), completed: self.completed, failed: self.failed, ftl: self.ftl.stats() }
    }

    pub fn summary(&self) {
        let report = self.report();
        self.workload.summary();
        info!(
            "Finished at {} us: {} requests ({} failed), {} GC runs, {} pages copied, {} victims picked",
            report.elapsed,
            report.completed,
            report.failed,
            report.ftl.total_gc_cnt,
            report.ftl.total_gc_pages,
            report.ftl.victim_selects
        );
        let written = report.ftl.total_writes;
        if written > 0 {
            info!("Write amplification: {:.3}", (written + report.ftl.total_gc_pages) as f64 / written as f64);
        }
    }

    /// One pass of host, front end and back end.
    pub fn tick(&mut self) {
        self.host_schedule();
        self.frontend_schedule();
        self.backend_schedule();
    }

    fn host_schedule(&mut self) {
        while let Some(req) = self.throttled.take().or_else(|| self.next_request()) {
            if let Err(req) = self.queue.try_submit(req) {
                self.throttled = Some(req);
                break;
            }
        }

        while let Some(req) = self.queue.pop_completed() {
            match req.status() {
                Some(NvmeStatus::Success) => self.completed += 1,
                _ => self.failed += 1,
            }
            self.workload.report_completion(&req, self.now());
        }
    }

    fn next_request(&mut self) -> Option<Request> {
        if !self.workload.has_jobs() {
            return None;
        }
        let job = self.workload.get_next_job();
        Some(Request::new(job.hid, job.op, job.blkaddr, job.nblks, self.now()))
    }

    fn frontend_schedule(&mut self) {
        while let Some(slot) = self.queue.next_submitted() {
            let Some(req) = self.queue.get(slot) else {
                continue;
            };
            let (op, blkaddr, nblks) = (req.op, req.blkaddr, req.nblks);
            let Some(nlb_zb) = nblks.checked_sub(1).and_then(|n| u16::try_from(n).ok()) else {
                warn!("[{}] slot {} asks for {} blocks, more than one command carries", self.now(), slot, nblks);
                self.queue.complete(slot, NvmeStatus::InvalidField);
                continue;
            };
            match op {
                IoOp::Write => self.submit_write(slot, blkaddr, nlb_zb),
                IoOp::Read => self.submit_read(slot, blkaddr, nlb_zb),
            };
        }
    }

    fn backend_schedule(&mut self) {
        for op in self.dispatcher.step(&mut self.ftl, &mut self.sched, &mut self.ctx) {
            if let Some(slot) = op.slot {
                self.queue.slice_done(slot);
            }
        }
        self.sched.schedule(&mut self.ctx);
    }

    fn encode(&self, slot: SlotTag, op: IoOp, start_lba: u64, nlb_zb: u16) -> [u8; CMD_BYTES] {
        let buf = BUFFER_BASE + slot as u64 * self.cfg.ssd.page_size as u64;
        IoCommandBuilder::new(op.opcode()).cid(slot as u16).prp(buf, 0).range(start_lba, nlb_zb).build()
    }

    pub fn submit_read(&mut self, slot: SlotTag, start_lba: u64, nlb_zb: u16) -> Disposition {
        let raw = self.encode(slot, IoOp::Read, start_lba, nlb_zb);
        self.submit_command(slot, &raw)
    }

    pub fn submit_write(&mut self, slot: SlotTag, start_lba: u64, nlb_zb: u16) -> Disposition {
        let raw = self.encode(slot, IoOp::Write, start_lba, nlb_zb);
        self.submit_command(slot, &raw)
    }

    /// Validate a raw command for the request held in `slot`. Rejected commands
    /// complete right away; accepted ones are split into slices.
    pub fn submit_command(&mut self, slot: SlotTag, raw: &[u8; CMD_BYTES]) -> Disposition {
        let disposition = handle_io_cmd(raw, self.ns_size);
        match disposition {
            Disposition::Complete(status) => {
                if status != NvmeStatus::Success {
                    debug!("[{}] slot {} rejected with {:?}", self.now(), slot, status);
                }
                self.queue.complete(slot, status);
            }
            Disposition::Transfer { start_lba, nlb_zb, op } => self.translate_and_enqueue(slot, start_lba, nlb_zb, op),
        }
        disposition
    }

    /// Hand every slice of a validated range to the mapping layer. Reads of
    /// never-written pages need no flash work.
    pub fn translate_and_enqueue(&mut self, slot: SlotTag, start_lba: u32, nlb_zb: u16, op: IoOp) {
        let mut issued = 0;
        for lpn in slices(start_lba, nlb_zb) {
            match op {
                IoOp::Write => {
                    self.ftl.write(lpn, Some(slot));
                    issued += 1;
                }
                IoOp::Read => {
                    if self.ftl.read(lpn, Some(slot)) {
                        issued += 1;
                    }
                }
            }
        }

        if issued == 0 {
            self.queue.complete(slot, NvmeStatus::Success);
            return;
        }
        if let Some(req) = self.queue.get_mut(slot) {
            req.state = RequestState::Transferring;
            req.remaining_slices = issued;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostConfig, Pattern, SimConfig, SsdConfig};

    fn small(hosts: Vec<HostConfig>, ops: u64, precondition: bool) -> FullConfig {
        let mut cfg = FullConfig {
            ssd: SsdConfig {
                channels: 2,
                ways: 2,
                blocks_per_die: 16,
                pages_per_block: 8,
                over_provisioning: 25.0,
                gc_threshold_percent: 10,
                ..SsdConfig::default()
            },
            sim: SimConfig { ops, precondition, max_queue_depth: 8, ..SimConfig::default() },
            hosts,
            ..FullConfig::default()
        };
        cfg.validate().unwrap();
        cfg
    }

    fn host(pattern: Pattern, read_percent: u32, nblks: u32) -> HostConfig {
        HostConfig { pattern, read_percent, write_percent: 100 - read_percent, nblks, partition_percent: None }
    }

    #[test]
    fn random_overwrites_drive_gc_and_keep_mapping_consistent() {
        let mut sim = Simulation::new(small(vec![host(Pattern::Random, 0, 1)], 2000, true));
        let report = sim.run();

        assert_eq!(report.completed, 2000);
        assert_eq!(report.failed, 0);
        assert!(report.ftl.total_gc_cnt > 0);
        assert!(report.elapsed > 0);
        sim.ftl.check_consistency().unwrap();
        assert!(sim.is_idle());
    }

    #[test]
    fn mixed_hosts_complete_every_request() {
        let hosts = vec![host(Pattern::Sequential, 50, 4), host(Pattern::Random, 30, 2)];
        let mut sim = Simulation::new(small(hosts, 500, false));
        let report = sim.run();

        assert_eq!(report.completed + report.failed, 500);
        assert_eq!(report.failed, 0);
        sim.ftl.check_consistency().unwrap();
    }

    #[test]
    fn rejected_commands_complete_through_the_slot() {
        let mut cfg = small(vec![host(Pattern::Sequential, 0, 1)], 0, false);
        cfg.ssd.namespace_blocks = Some(100);
        let mut sim = Simulation::new(cfg);

        let slot = sim.queue.try_submit(Request::new(0, IoOp::Read, 99, 2, 0)).unwrap();
        assert_eq!(sim.submit_read(slot, 99, 1), Disposition::Complete(NvmeStatus::LbaRange));
        assert_eq!(sim.queue.pop_completed().unwrap().status(), Some(NvmeStatus::LbaRange));

        let slot = sim.queue.try_submit(Request::new(0, IoOp::Write, 0, 1, 0)).unwrap();
        let raw = IoCommandBuilder::new(IoOp::Write.opcode()).prp(0x1001, 0).range(0, 0).build();
        assert_eq!(sim.submit_command(slot, &raw), Disposition::Complete(NvmeStatus::InvalidField));
        assert_eq!(sim.queue.pop_completed().unwrap().status(), Some(NvmeStatus::InvalidField));
        assert_eq!(sim.ftl.pending_ops(), 0);
    }

    #[test]
    fn oversized_request_fails_instead_of_shrinking() {
        let mut sim = Simulation::new(small(vec![host(Pattern::Sequential, 0, 1)], 0, false));
        let slot = sim.queue.try_submit(Request::new(0, IoOp::Write, 0, 70_000, 0)).unwrap();

        sim.frontend_schedule();
        assert_eq!(sim.ftl.pending_ops(), 0);
        assert_eq!(sim.ftl.stats().total_writes, 0);
        assert_eq!(sim.queue.pop_completed().unwrap().status(), Some(NvmeStatus::InvalidField));
    }

    #[test]
    fn unmapped_read_completes_without_flash() {
        let mut sim = Simulation::new(small(vec![host(Pattern::Sequential, 0, 1)], 0, false));
        let slot = sim.queue.try_submit(Request::new(0, IoOp::Read, 5, 3, 0)).unwrap();

        sim.submit_read(slot, 5, 2);
        assert_eq!(sim.ftl.pending_ops(), 0);
        assert_eq!(sim.queue.pop_completed().unwrap().status(), Some(NvmeStatus::Success));
    }

    #[test]
    fn zero_namespace_completes_everything_with_success() {
        let mut cfg = small(vec![host(Pattern::Random, 50, 4)], 100, false);
        cfg.ssd.namespace_blocks = Some(0);
        let mut sim = Simulation::new(cfg);
        let report = sim.run();

        assert_eq!(report.completed, 100);
        assert_eq!(report.ftl.total_writes, 0);
        assert_eq!(report.ftl.total_reads, 0);
    }

    #[test]
    fn queue_depth_throttles_without_dropping() {
        let mut sim = Simulation::new(small(vec![host(Pattern::Sequential, 0, 1)], 50, false));
        sim.tick();
        assert_eq!(sim.queue.outstanding(), 8);
        assert!(sim.throttled.is_some());

        let report = sim.run();
        assert_eq!(report.completed, 50);
        assert_eq!(report.ftl.total_writes, 50);
    }
}
