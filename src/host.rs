use byte_unit::Byte;
use log::info;
use rand::prelude::*;

use crate::config::{BaseType, HostConfig, Pattern, Tick};
use crate::nvme::IoOp;
use crate::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub hid: BaseType,
    pub op: IoOp,
    pub blkaddr: u64,
    pub nblks: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCounters {
    // indexed by IoOp::idx
    pub complete_blks: [u64; 2],
    pub complete_reqs: [u64; 2],
    pub latency_sum: u64,
    pub latency_max: u64,
    pub failed_reqs: u64,
}

#[derive(Debug)]
pub struct Host {
    pub hid: BaseType,
    pub config: HostConfig,
    pub min_lba: u64,
    pub max_lba: u64,
    acc: u32,
    next_blkaddr: u64,
    pub counters: HostCounters,
    last: HostCounters,
}

impl Host {
    fn select_op(&mut self) -> IoOp {
        self.acc += self.config.read_percent;
        if self.acc >= 100 {
            self.acc -= 100;
            IoOp::Read
        } else {
            IoOp::Write
        }
    }

    fn get_next_blkaddr(&mut self, rng: &mut SmallRng) -> u64 {
        let blkaddr = self.next_blkaddr;
        let span = (self.max_lba - self.min_lba).max(1);
        self.next_blkaddr = match self.config.pattern {
            Pattern::Random => self.min_lba + rng.gen_range(0..span),
            Pattern::Sequential => (blkaddr + self.config.nblks as u64 - self.min_lba) % span + self.min_lba,
        };
        blkaddr
    }
}

/// Synthetic request source: hosts take turns, each walking its own partition.
#[derive(Debug)]
pub struct Workload {
    hosts: Vec<Host>,
    next_hid: BaseType,
    remaining_jobs: u64,
    rng: SmallRng,
    initial_report_time: Option<Tick>,
    last_report_time: Tick,
    report_interval: Tick,
    block_size: u64,
}

impl Workload {
    pub fn new(
        configs: &[HostConfig],
        ns_size: u64,
        ops: u64,
        seed: u64,
        report_interval: Tick,
        block_size: u64,
    ) -> Self {
        let explicit: u64 = configs.iter().filter_map(|c| c.partition_percent).map(u64::from).sum();
        let implicit = configs.iter().filter(|c| c.partition_percent.is_none()).count() as u64;
        let default_share = if implicit > 0 { (100 - explicit.min(100)) / implicit } else { 0 };

        let mut cumlba = 0;
        let hosts = configs
            .iter()
            .enumerate()
            .map(|(hid, config)| {
                let share = config.partition_percent.map(u64::from).unwrap_or(default_share);
                let min_lba = cumlba;
                cumlba += ns_size * share / 100;
                let max_lba = cumlba.saturating_sub(config.nblks as u64).max(min_lba);
                Host {
                    hid,
                    config: config.clone(),
                    min_lba,
                    max_lba,
                    acc: 0,
                    next_blkaddr: min_lba,
                    counters: HostCounters::default(),
                    last: HostCounters::default(),
                }
            })
            .collect::<Vec<_>>();

        for host in &hosts {
            info!(
                "Host[{}]: {:?} r{} w{} nblks{} partition {} ~ {}",
                host.hid,
                host.config.pattern,
                host.config.read_percent,
                host.config.write_percent,
                host.config.nblks,
                host.min_lba,
                host.max_lba + host.config.nblks as u64
            );
        }

        Workload {
            hosts,
            next_hid: 0,
            remaining_jobs: ops,
            rng: SmallRng::seed_from_u64(seed),
            initial_report_time: None,
            last_report_time: 0,
            report_interval,
            block_size,
        }
    }

    pub fn has_jobs(&self) -> bool {
        self.remaining_jobs > 0
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn get_next_job(&mut self) -> Job {
        let host = &mut self.hosts[self.next_hid];
        let job = Job {
            hid: host.hid,
            op: host.select_op(),
            blkaddr: host.get_next_blkaddr(&mut self.rng),
            nblks: host.config.nblks,
        };

        self.next_hid = (self.next_hid + 1) % self.hosts.len();
        self.remaining_jobs -= 1;
        job
    }

    pub fn report_completion(&mut self, req: &Request, now: Tick) {
        let lat = now - req.request_time + 1;
        if self.initial_report_time.is_none() {
            self.initial_report_time = Some(now);
            self.last_report_time = now;
        }

        let counters = &mut self.hosts[req.hid].counters;
        match req.status() {
            Some(crate::nvme::NvmeStatus::Success) => {
                counters.complete_blks[req.op.idx()] += req.nblks as u64;
                counters.complete_reqs[req.op.idx()] += 1;
                counters.latency_sum += lat;
                counters.latency_max = counters.latency_max.max(lat);
            }
            _ => counters.failed_reqs += 1,
        }

        if now > self.last_report_time + self.report_interval {
            self.update_and_print_bw(now);
        }
    }

    /// Log per-host bandwidth and IOPS since the previous report.
    pub fn update_and_print_bw(&mut self, now: Tick) {
        let elapsed = now.saturating_sub(self.last_report_time);
        if elapsed == 0 {
            return;
        }
        let since_start = now - self.initial_report_time.unwrap_or(now);

        for host in &mut self.hosts {
            let (cur, last) = (host.counters, host.last);
            let blks = |op: IoOp| (cur.complete_blks[op.idx()] - last.complete_blks[op.idx()]) as f64;
            let reqs = |op: IoOp| (cur.complete_reqs[op.idx()] - last.complete_reqs[op.idx()]) as f64;

            // bytes per simulated µs is MB/s, requests per ms is KIOPS
            let wb = blks(IoOp::Write) * self.block_size as f64 / elapsed as f64;
            let rb = blks(IoOp::Read) * self.block_size as f64 / elapsed as f64;
            let wi = reqs(IoOp::Write) / (elapsed as f64 / 1000.0);
            let ri = reqs(IoOp::Read) / (elapsed as f64 / 1000.0);

            info!(
                "[{}s]Host[{}]: Current BW[R {:.2}MB/s, W {:.2}MB/s] IOPS[R {:.2} KIOPS, W {:.2} KIOPS]",
                since_start / 1_000_000,
                host.hid,
                rb,
                wb,
                ri,
                wi
            );
            host.last = cur;
        }
        self.last_report_time = now;
    }

    pub fn summary(&self) {
        for host in &self.hosts {
            let c = &host.counters;
            let reqs = c.complete_reqs[0] + c.complete_reqs[1];
            let avg = if reqs > 0 { c.latency_sum / reqs } else { 0 };
            let written = Byte::from_bytes((c.complete_blks[IoOp::Write.idx()] * self.block_size) as u128);
            let read = Byte::from_bytes((c.complete_blks[IoOp::Read.idx()] * self.block_size) as u128);
            info!(
                "Host[{}]: {} requests ({} failed), written {}, read {}, latency avg {} max {}",
                host.hid,
                reqs,
                c.failed_reqs,
                written.get_appropriate_unit(true),
                read.get_appropriate_unit(true),
                avg,
                c.latency_max
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvme::NvmeStatus;
    use crate::request::RequestState;

    fn host_cfg(pattern: Pattern, read_percent: u32, nblks: u32) -> HostConfig {
        HostConfig { pattern, read_percent, write_percent: 100 - read_percent, nblks, partition_percent: None }
    }

    #[test]
    fn read_mix_follows_accumulator() {
        let mut wl = Workload::new(&[host_cfg(Pattern::Sequential, 30, 1)], 1000, 10, 7, 1_000_000, 4096);
        let ops: Vec<_> = (0..10).map(|_| wl.get_next_job().op).collect();
        assert_eq!(ops.iter().filter(|op| **op == IoOp::Read).count(), 3);
        // acc hits 120 on the fourth job
        assert_eq!(ops[3], IoOp::Read);
        assert!(!wl.has_jobs());
    }

    #[test]
    fn sequential_walk_wraps_inside_partition() {
        let mut wl = Workload::new(&[host_cfg(Pattern::Sequential, 0, 4)], 16, 6, 7, 1_000_000, 4096);
        let addrs: Vec<_> = (0..6).map(|_| wl.get_next_job().blkaddr).collect();
        assert_eq!(addrs, vec![0, 4, 8, 0, 4, 8]);
    }

    #[test]
    fn hosts_alternate_and_split_the_namespace() {
        let cfgs = [host_cfg(Pattern::Random, 0, 2), host_cfg(Pattern::Random, 0, 2)];
        let mut wl = Workload::new(&cfgs, 1000, 100, 3, 1_000_000, 4096);
        assert_eq!(wl.hosts()[1].min_lba, 500);

        for i in 0..100 {
            let job = wl.get_next_job();
            assert_eq!(job.hid, i % 2);
            let host = &wl.hosts()[job.hid];
            assert!(job.blkaddr >= host.min_lba);
            assert!(job.blkaddr + job.nblks as u64 <= host.max_lba + job.nblks as u64);
        }
    }

    #[test]
    fn completion_accounting() {
        let mut wl = Workload::new(&[host_cfg(Pattern::Sequential, 0, 4)], 100, 1, 7, 1_000_000, 4096);
        let mut req = Request::new(0, IoOp::Write, 0, 4, 10);
        req.state = RequestState::Completed(NvmeStatus::Success);
        wl.report_completion(&req, 109);

        let mut bad = Request::new(0, IoOp::Read, 0, 4, 10);
        bad.state = RequestState::Completed(NvmeStatus::LbaRange);
        wl.report_completion(&bad, 120);

        let c = wl.hosts()[0].counters;
        assert_eq!(c.complete_blks, [4, 0]);
        assert_eq!(c.complete_reqs, [1, 0]);
        assert_eq!(c.latency_sum, 100);
        assert_eq!(c.failed_reqs, 1);
    }
}
