#[cfg(test)]
use std::{println as info, println as warn, println as error, println as trace, println as debug };

#[cfg(not(test))]
use log::*;

use crate::addr::*;
use crate::config::{BaseType, GcPolicy};
use crate::ftl::{BlockStatus, FlashOpKind, Ftl, L2PValue};

impl Ftl {
    /// Cost-benefit victim for `die`, detached from the victim index.
    ///
    /// Candidates are the die's blocks still filed in the victim index (in use, not
    /// the active block) that hold at least one invalid page. Fully invalid blocks outrank everything else and are
    /// scored by `age`; the rest score `age * invalid / (2 * valid)`. Ties go to more
    /// invalid pages, then fewer valid pages, then more erases, then the lower block
    /// number.
    pub fn pick_victim_cost_benefit(&mut self, die: DieId) -> Option<BlockId> {
        let ppb = self.geo.pages_per_block;
        let active = self.dies[die].current_block;
        // (block, fully invalid, score)
        let mut best: Option<(BlockId, bool, f64)> = None;

        for blk in 0..self.geo.blocks_per_die {
            let block = self.block(die, blk);
            if block.status != BlockStatus::InUse || active == Some(blk) {
                continue;
            }
            // already picked, waiting for its erase
            if !self.victims.contains(die, blk) {
                continue;
            }
            let inv = block.invalid_counter;
            if inv == 0 {
                continue;
            }

            let valid = ppb - inv;
            let age = self.cb_tick - block.last_update_tick;
            let dead = valid == 0;
            let score = if dead {
                age as f64
            } else {
                age as f64 * inv as f64 / (2.0 * valid as f64)
            };

            match best {
                Some((_, best_dead, _)) if best_dead && !dead => {}
                Some((_, best_dead, best_score)) if best_dead == dead && score < best_score => {}
                Some((best_blk, best_dead, best_score)) if best_dead == dead && score == best_score => {
                    if self.wins_tie(die, blk, best_blk) {
                        best = Some((blk, dead, score));
                    }
                }
                _ => best = Some((blk, dead, score)),
            }
        }

        let (victim, _, _) = best?;
        let invalid = self.block(die, victim).invalid_counter;
        self.victims.remove(die, victim, invalid);
        self.stats.victim_selects += 1;
        Some(victim)
    }

    fn wins_tie(&self, die: DieId, blk: BlockId, best: BlockId) -> bool {
        let ppb = self.geo.pages_per_block;
        let (a, b) = (self.block(die, blk), self.block(die, best));
        let (inv, inv_best) = (a.invalid_counter, b.invalid_counter);
        let (valid, valid_best) = (ppb - inv, ppb - inv_best);

        inv > inv_best
            || (inv == inv_best && valid < valid_best)
            || (inv == inv_best && valid == valid_best && a.erase_counter > b.erase_counter)
            || (inv == inv_best && valid == valid_best && a.erase_counter == b.erase_counter && blk < best)
    }

    /// Fullest invalid bucket, served straight from the victim index.
    pub fn pick_victim_greedy(&mut self, die: DieId) -> Option<BlockId> {
        let (victim, _) = self.victims.pop_most_invalid(die)?;
        debug_assert_ne!(self.dies[die].current_block, Some(victim));
        self.stats.victim_selects += 1;
        Some(victim)
    }

    /// Reclaim one block of `die`: relocate its live pages and erase it.
    /// Panics when the die has no candidate, which means free-space accounting broke.
    pub fn gc(&mut self, die: DieId) {
        assert!(!self.dies[die].gc_running, "nested garbage collection on die {}", die);
        self.dies[die].gc_running = true;
        self.stats.total_gc_cnt += 1;

        let victim = match self.gc_policy {
            GcPolicy::CostBenefit => self.pick_victim_cost_benefit(die),
            GcPolicy::Greedy => self.pick_victim_greedy(die),
        };
        let victim = victim.unwrap_or_else(|| panic!("no GC victim block in die {} (gc invoked by write)", die));

        let copied = if self.block(die, victim).invalid_counter != self.geo.pages_per_block {
            self.relocate_valid_pages(die, victim)
        } else {
            0
        };

        self.stats.total_gc_pages += copied as u64;
        self.erase_block(die, victim);
        self.dies[die].gc_running = false;

        debug!("gc die {} victim {} copied {} pages, {} free blocks", die, victim, copied, self.free_block_count(die));
    }

    fn relocate_valid_pages(&mut self, die: DieId, victim: BlockId) -> BaseType {
        let mut copied = 0;

        for pg in 0..self.geo.pages_per_block {
            let old = self.geo.ppa(die, victim, pg);
            let lpn = self.get_rmap_ent(&old);
            if lpn == INVALID_LPN || self.l2p[lpn] != L2PValue::Valid(old) {
                continue;
            }

            // read into a temp buffer, program it elsewhere on the same die
            self.push_op(FlashOpKind::Read, old, None);
            let new = self.allocate_page(die);
            self.remap(lpn, &old, new);
            self.push_op(FlashOpKind::Program, new, None);

            let idx = self.block_idx(die, victim);
            self.blocks[idx].invalid_counter += 1;
            copied += 1;
        }

        copied
    }
}
