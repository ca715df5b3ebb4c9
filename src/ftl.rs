#[cfg(test)]
use std::{println as info, println as warn, println as error, println as trace, println as debug };
use std::collections::VecDeque;
use byte_unit::Byte;

#[cfg(not(test))]
use log::*;

use anyhow::bail;

use crate::addr::*;
use crate::config::*;
use crate::timer::SlotTag;
use crate::victim::VictimIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)] // for Vec resize
pub enum L2PValue {
    Invalid,
    Valid(Ppa),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Free,
    InUse,
    Bad,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub status: BlockStatus,
    pub cursor: BaseType, // points to the next page
    pub invalid_counter: Counter,
    pub erase_counter: Counter,
    pub last_update_tick: Tick,
}

impl Block {
    pub fn new() -> Self {
        Block {
            status: BlockStatus::Free,
            cursor: 0,
            invalid_counter: 0,
            erase_counter: 0,
            last_update_tick: 0,
        }
    }

    pub fn valid_counter(&self) -> Counter {
        match self.status {
            BlockStatus::InUse => self.cursor - self.invalid_counter,
            _ => 0,
        }
    }

    fn full(&self, pages_per_block: BaseType) -> bool {
        self.cursor == pages_per_block
    }

    fn write_one_page(&mut self, pages_per_block: BaseType, tick: Tick) -> BaseType {
        debug_assert!(self.cursor < pages_per_block, "write more pages than block has");

        let pg = self.cursor;
        self.cursor += 1;
        self.last_update_tick = tick;
        pg
    }

    fn erase(&mut self) {
        self.status = BlockStatus::Free;
        self.cursor = 0;
        self.invalid_counter = 0;
        self.erase_counter += 1;
    }
}

#[derive(Clone, Debug, Default)]
pub struct Die {
    pub current_block: Option<BlockId>,
    pub free_blocks: VecDeque<BlockId>,
    pub gc_running: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashOpKind {
    Read,
    Program,
    Erase,
}

/// One flash access queued for a die. `slot` names the host request waiting on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashOp {
    pub kind: FlashOpKind,
    pub ppa: Ppa,
    pub slot: Option<SlotTag>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FtlStats {
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_gc_cnt: u64,
    pub total_gc_pages: u64,
    pub victim_selects: u64,
}

pub struct Ftl {
    pub(crate) geo: Geometry,
    pub(crate) user_pages: BaseType,
    pub(crate) gc_threshold: BaseType,
    pub(crate) gc_policy: GcPolicy,

    pub(crate) l2p: Vec<L2PValue>,
    pub(crate) rmap: Vec<Lpn>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) dies: Vec<Die>,
    pub(crate) victims: VictimIndex,

    // cost-benefit clock, one tick per slice write
    pub(crate) cb_tick: Tick,
    pub(crate) stats: FtlStats,

    record_ops: bool,
    ll_queues: Vec<VecDeque<FlashOp>>,
}

impl Ftl {
    pub fn new(cfg: &SsdConfig) -> Self {
        let geo = Geometry::new(cfg);
        let total_pages = geo.total_pages();
        let user_pages = cfg.user_pages();

        trace!("ALL_PAGES: {}", total_pages);
        trace!("op_pages: {}", total_pages - user_pages);
        let (physical, user) = (total_pages * cfg.page_size, user_pages * cfg.page_size);
        trace!(
            "Physical Capacity: {} bytes, {}",
            physical,
            Byte::from_bytes(physical as u128).get_appropriate_unit(true)
        );
        trace!("User Capacity: {} bytes, {}", user, Byte::from_bytes(user as u128).get_appropriate_unit(true));

        let mut blocks = vec![Block::new(); geo.dies() * geo.blocks_per_die];
        for &(die, blk) in &cfg.bad_blocks {
            blocks[die * geo.blocks_per_die + blk].status = BlockStatus::Bad;
        }

        let dies = (0..geo.dies())
            .map(|die| Die {
                current_block: None,
                free_blocks: (0..geo.blocks_per_die)
                    .filter(|blk| blocks[die * geo.blocks_per_die + blk].status == BlockStatus::Free)
                    .collect(),
                gc_running: false,
            })
            .collect();

        Ftl {
            geo,
            user_pages,
            gc_threshold: cfg.gc_threshold_blocks(),
            gc_policy: cfg.gc_policy,
            l2p: vec![L2PValue::Invalid; user_pages],
            rmap: vec![INVALID_LPN; total_pages],
            blocks,
            dies,
            victims: VictimIndex::new(geo.dies(), geo.blocks_per_die, geo.pages_per_block),
            cb_tick: 0,
            stats: FtlStats::default(),
            record_ops: true,
            ll_queues: vec![VecDeque::new(); geo.dies()],
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geo
    }

    pub fn stats(&self) -> FtlStats {
        self.stats
    }

    pub fn user_pages(&self) -> BaseType {
        self.user_pages
    }

    pub fn get_max_lba(&self) -> Lpn {
        self.user_pages - 1
    }

    pub fn die_of_lpn(&self, lpn: Lpn) -> DieId {
        lpn % self.geo.dies()
    }

    pub fn free_block_count(&self, die: DieId) -> BaseType {
        self.dies[die].free_blocks.len()
    }

    pub fn current_block(&self, die: DieId) -> Option<BlockId> {
        self.dies[die].current_block
    }

    pub fn block(&self, die: DieId, blk: BlockId) -> &Block {
        &self.blocks[self.block_idx(die, blk)]
    }

    pub(crate) fn block_idx(&self, die: DieId, blk: BlockId) -> usize {
        die * self.geo.blocks_per_die + blk
    }

    pub fn get_maptbl_ent(&self, lpn: Lpn) -> L2PValue {
        assert!(lpn < self.user_pages, "lpn {} out of {} user pages", lpn, self.user_pages);
        self.l2p[lpn]
    }

    pub fn get_rmap_ent(&self, ppa: &Ppa) -> Lpn {
        self.rmap[self.geo.ppa2pgidx(ppa)]
    }

    pub fn pop_op(&mut self, die: DieId) -> Option<FlashOp> {
        self.ll_queues[die].pop_front()
    }

    pub fn pending_ops(&self) -> usize {
        self.ll_queues.iter().map(|q| q.len()).sum()
    }

    pub(crate) fn push_op(&mut self, kind: FlashOpKind, ppa: Ppa, slot: Option<SlotTag>) {
        if self.record_ops {
            let die = self.geo.die_of_ppa(&ppa);
            self.ll_queues[die].push_back(FlashOp { kind, ppa, slot });
        }
    }

    /// Map every logical page once, without generating any flash traffic.
    pub fn precondition(&mut self) {
        self.record_ops = false;
        for lpn in 0..self.user_pages {
            self.write(lpn, None);
        }
        self.record_ops = true;
        self.stats = FtlStats::default();
        info!("Drive preconditioned: {} pages mapped", self.user_pages);
    }

    /// Queue a read of `lpn`. Returns false when the page was never written and
    /// there is nothing to fetch from flash.
    pub fn read(&mut self, lpn: Lpn, slot: Option<SlotTag>) -> bool {
        self.stats.total_reads += 1;
        match self.get_maptbl_ent(lpn) {
            L2PValue::Valid(ppa) => {
                self.push_op(FlashOpKind::Read, ppa, slot);
                true
            }
            L2PValue::Invalid => false,
        }
    }

    pub fn write(&mut self, lpn: Lpn, slot: Option<SlotTag>) {
        assert!(lpn < self.user_pages, "lpn {} out of {} user pages", lpn, self.user_pages);
        self.stats.total_writes += 1;
        self.cb_tick += 1;

        let die = self.die_of_lpn(lpn);
        if self.free_block_count(die) <= self.gc_threshold {
            self.gc(die);
        }

        if let L2PValue::Valid(old) = self.l2p[lpn] {
            self.invalidate_page(&old);
        }

        let new = self.allocate_page(die);
        self.set_mapping(lpn, new);
        self.push_op(FlashOpKind::Program, new, slot);
    }

    fn set_mapping(&mut self, lpn: Lpn, ppa: Ppa) {
        self.l2p[lpn] = L2PValue::Valid(ppa);
        let pgidx = self.geo.ppa2pgidx(&ppa);
        self.rmap[pgidx] = lpn;
    }

    /// Point `lpn` at `new`, retiring `old` in the same step.
    pub(crate) fn remap(&mut self, lpn: Lpn, old: &Ppa, new: Ppa) {
        debug_assert_eq!(self.l2p[lpn], L2PValue::Valid(*old));
        let old_idx = self.geo.ppa2pgidx(old);
        self.rmap[old_idx] = INVALID_LPN;
        self.set_mapping(lpn, new);
    }

    pub(crate) fn invalidate_page(&mut self, ppa: &Ppa) {
        let die = self.geo.die_of_ppa(ppa);
        let idx = self.block_idx(die, ppa.blk);
        let pgidx = self.geo.ppa2pgidx(ppa);
        self.rmap[pgidx] = INVALID_LPN;

        let before = self.blocks[idx].invalid_counter;
        self.blocks[idx].invalid_counter += 1;
        debug_assert!(self.blocks[idx].invalid_counter <= self.blocks[idx].cursor);

        if self.victims.contains(die, ppa.blk) {
            self.victims.relink(die, ppa.blk, before, before + 1);
        }
    }

    /// Next free page of the die's active block, opening a new block when it is full.
    pub(crate) fn allocate_page(&mut self, die: DieId) -> Ppa {
        let ppb = self.geo.pages_per_block;
        let blk = match self.dies[die].current_block {
            Some(blk) if !self.blocks[self.block_idx(die, blk)].full(ppb) => blk,
            Some(full) => {
                let invalid = self.blocks[self.block_idx(die, full)].invalid_counter;
                self.victims.insert(die, full, invalid);
                self.open_free_block(die)
            }
            None => self.open_free_block(die),
        };

        let tick = self.cb_tick;
        let idx = self.block_idx(die, blk);
        let pg = self.blocks[idx].write_one_page(ppb, tick);
        self.geo.ppa(die, blk, pg)
    }

    fn open_free_block(&mut self, die: DieId) -> BlockId {
        let blk = self.dies[die]
            .free_blocks
            .pop_front()
            .unwrap_or_else(|| panic!("no free block left in die {}", die));
        let idx = self.block_idx(die, blk);
        debug_assert_eq!(self.blocks[idx].status, BlockStatus::Free);
        self.blocks[idx].status = BlockStatus::InUse;
        self.dies[die].current_block = Some(blk);
        blk
    }

    pub(crate) fn erase_block(&mut self, die: DieId, blk: BlockId) {
        let idx = self.block_idx(die, blk);
        debug_assert!(!self.victims.contains(die, blk));
        self.push_op(FlashOpKind::Erase, self.geo.ppa(die, blk, 0), None);
        self.blocks[idx].erase();
        self.dies[die].free_blocks.push_back(blk);
    }

    /// Cross-check the mapping table, reverse map, block records and victim index.
    pub fn check_consistency(&self) -> anyhow::Result<()> {
        for (lpn, ent) in self.l2p.iter().enumerate() {
            if let L2PValue::Valid(ppa) = ent {
                let back = self.get_rmap_ent(ppa);
                if back != lpn {
                    bail!("lpn {} maps to {:?} but reverse map holds {}", lpn, ppa, back);
                }
            }
        }
        for (pgidx, &lpn) in self.rmap.iter().enumerate() {
            if lpn != INVALID_LPN && self.l2p[lpn] != L2PValue::Valid(self.geo.pgidx2ppa(pgidx)) {
                bail!("reverse map page {} claims lpn {} which maps elsewhere", pgidx, lpn);
            }
        }

        for die in 0..self.geo.dies() {
            let mut valid_sum = 0;
            for blk in 0..self.geo.blocks_per_die {
                let block = self.block(die, blk);
                let active = self.dies[die].current_block == Some(blk);
                let filed = self.victims.bucket_of(die, blk);
                match block.status {
                    BlockStatus::InUse if !active => {
                        if filed != Some(block.invalid_counter) {
                            bail!(
                                "die {} block {} with {} invalid pages is filed under {:?}",
                                die,
                                blk,
                                block.invalid_counter,
                                filed
                            );
                        }
                    }
                    _ if filed.is_some() => {
                        bail!(
                            "die {} block {} ({:?}, active {}) sits in the victim index",
                            die,
                            blk,
                            block.status,
                            active
                        );
                    }
                    _ => {}
                }
                valid_sum += block.valid_counter();
            }
            let mapped = self
                .l2p
                .iter()
                .filter(|e| matches!(e, L2PValue::Valid(p) if self.geo.die_of_ppa(p) == die))
                .count();
            if mapped != valid_sum {
                bail!("die {} has {} mapped pages but block records count {} valid", die, mapped, valid_sum);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn small_config() -> SsdConfig {
        SsdConfig {
            channels: 1,
            ways: 1,
            blocks_per_die: 16,
            pages_per_block: 8,
            over_provisioning: 25.0,
            gc_threshold_percent: 10,
            ..SsdConfig::default()
        }
    }

    #[test]
    fn writes_one_block() {
        let mut fw = Ftl::new(&small_config());
        for lpn in 0..8 {
            fw.write(lpn, None);
        }
        assert_eq!(fw.current_block(0), Some(0));
        assert_eq!(fw.block(0, 0).valid_counter(), 8);
        assert_eq!(fw.pending_ops(), 8);
        fw.check_consistency().unwrap();
    }

    #[test]
    fn writes_more_than_one_block() {
        let mut fw = Ftl::new(&small_config());
        for lpn in 0..9 {
            fw.write(lpn, None);
        }
        assert_eq!(fw.current_block(0), Some(1));
        // the filled block is handed to the victim index once it stops being active
        assert!(fw.victims.contains(0, 0));
        fw.check_consistency().unwrap();
    }

    #[test]
    fn overwrite_invalidates_old_page() {
        let mut fw = Ftl::new(&small_config());
        fw.write(3, None);
        let L2PValue::Valid(first) = fw.get_maptbl_ent(3) else { panic!("unmapped") };
        fw.write(3, None);
        let L2PValue::Valid(second) = fw.get_maptbl_ent(3) else { panic!("unmapped") };

        assert_ne!(first, second);
        assert_eq!(fw.get_rmap_ent(&first), INVALID_LPN);
        assert_eq!(fw.get_rmap_ent(&second), 3);
        assert_eq!(fw.block(0, 0).invalid_counter, 1);
        assert_eq!(fw.block(0, 0).valid_counter(), 1);
    }

    #[test]
    fn read_of_unmapped_page_skips_flash() {
        let mut fw = Ftl::new(&small_config());
        assert!(!fw.read(5, Some(1)));
        fw.write(5, None);
        fw.pop_op(0);
        assert!(fw.read(5, Some(1)));
        let op = fw.pop_op(0).unwrap();
        assert_eq!(op.kind, FlashOpKind::Read);
        assert_eq!(op.slot, Some(1));
    }

    #[test]
    fn lpns_stripe_across_dies() {
        let cfg = SsdConfig { channels: 2, ways: 2, ..small_config() };
        let mut fw = Ftl::new(&cfg);
        for lpn in 0..8 {
            fw.write(lpn, None);
        }
        for lpn in 0..8 {
            let L2PValue::Valid(ppa) = fw.get_maptbl_ent(lpn) else { panic!("unmapped") };
            assert_eq!(fw.geometry().die_of_ppa(&ppa), lpn % 4);
        }
    }

    #[test]
    fn bad_blocks_are_never_allocated() {
        let cfg = SsdConfig { bad_blocks: vec![(0, 0), (0, 1)], ..small_config() };
        let mut fw = Ftl::new(&cfg);
        assert_eq!(fw.free_block_count(0), 14);
        fw.write(0, None);
        assert_eq!(fw.current_block(0), Some(2));
        assert_eq!(fw.block(0, 0).status, BlockStatus::Bad);
    }

    #[test]
    fn precondition_maps_everything_without_traffic() {
        let mut fw = Ftl::new(&small_config());
        fw.precondition();
        assert_eq!(fw.pending_ops(), 0);
        assert_eq!(fw.stats(), FtlStats::default());
        assert!((0..fw.user_pages()).all(|lpn| fw.get_maptbl_ent(lpn) != L2PValue::Invalid));
        fw.check_consistency().unwrap();
    }

    #[test]
    fn writes_two_capacities_random() {
        use rand::prelude::*;

        let mut fw = Ftl::new(&small_config());
        let max_lba = fw.get_max_lba();
        let mut rng: SmallRng = SmallRng::seed_from_u64(7);

        for _ in 0..2 {
            for _ in 0..=max_lba {
                fw.write(rng.gen_range(0..=max_lba), None);
            }
            fw.check_consistency().unwrap();
        }
        assert!(fw.stats().total_gc_cnt > 0);
        assert!(fw.free_block_count(0) >= 1);
    }

    #[test]
    #[should_panic(expected = "out of")]
    fn write_past_user_pages_panics() {
        let mut fw = Ftl::new(&small_config());
        let lpn = fw.user_pages();
        fw.write(lpn, None);
    }
}
