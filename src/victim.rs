use crate::addr::{BlockId, DieId};
use crate::config::BaseType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Bucket {
    head: Option<BlockId>,
    tail: Option<BlockId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Node {
    prev: Option<BlockId>,
    next: Option<BlockId>,
    // bucket the node was filed under, for catching stale invalid counts
    bucket: Option<BaseType>,
}

/// Per-die lists of blocks bucketed by invalid page count.
///
/// Nodes link to each other by block number, so moving a block between buckets
/// is a constant-time splice once its current count is known.
#[derive(Debug, Clone)]
pub struct VictimIndex {
    blocks_per_die: BaseType,
    buckets_per_die: BaseType,
    buckets: Vec<Bucket>,
    nodes: Vec<Node>,
}

impl VictimIndex {
    pub fn new(dies: BaseType, blocks_per_die: BaseType, pages_per_block: BaseType) -> Self {
        let buckets_per_die = pages_per_block + 1;
        VictimIndex {
            blocks_per_die,
            buckets_per_die,
            buckets: vec![Bucket::default(); dies * buckets_per_die],
            nodes: vec![Node::default(); dies * blocks_per_die],
        }
    }

    fn bucket_idx(&self, die: DieId, invalid: BaseType) -> usize {
        assert!(invalid < self.buckets_per_die, "invalid count {} has no bucket", invalid);
        die * self.buckets_per_die + invalid
    }

    fn node_idx(&self, die: DieId, blk: BlockId) -> usize {
        die * self.blocks_per_die + blk
    }

    pub fn contains(&self, die: DieId, blk: BlockId) -> bool {
        self.nodes[self.node_idx(die, blk)].bucket.is_some()
    }

    pub fn bucket_of(&self, die: DieId, blk: BlockId) -> Option<BaseType> {
        self.nodes[self.node_idx(die, blk)].bucket
    }

    /// Append `blk` to the tail of bucket `invalid`.
    pub fn insert(&mut self, die: DieId, blk: BlockId, invalid: BaseType) {
        let b = self.bucket_idx(die, invalid);
        let n = self.node_idx(die, blk);
        assert!(
            self.nodes[n].bucket.is_none(),
            "die {} block {} is already in victim bucket {:?}",
            die,
            blk,
            self.nodes[n].bucket
        );

        match self.buckets[b].tail {
            Some(tail) => {
                let t = self.node_idx(die, tail);
                self.nodes[t].next = Some(blk);
                self.nodes[n] = Node { prev: Some(tail), next: None, bucket: Some(invalid) };
                self.buckets[b].tail = Some(blk);
            }
            None => {
                self.nodes[n] = Node { prev: None, next: None, bucket: Some(invalid) };
                self.buckets[b] = Bucket { head: Some(blk), tail: Some(blk) };
            }
        }
    }

    /// Detach `blk`, which must currently sit in bucket `invalid`.
    pub fn remove(&mut self, die: DieId, blk: BlockId, invalid: BaseType) {
        let b = self.bucket_idx(die, invalid);
        let n = self.node_idx(die, blk);
        let node = self.nodes[n];
        assert_eq!(
            node.bucket,
            Some(invalid),
            "die {} block {} is not in victim bucket {}",
            die,
            blk,
            invalid
        );

        match (node.prev, node.next) {
            (Some(prev), Some(next)) => {
                let p = self.node_idx(die, prev);
                let x = self.node_idx(die, next);
                self.nodes[p].next = Some(next);
                self.nodes[x].prev = Some(prev);
            }
            (Some(prev), None) => {
                let p = self.node_idx(die, prev);
                self.nodes[p].next = None;
                self.buckets[b].tail = Some(prev);
            }
            (None, Some(next)) => {
                let x = self.node_idx(die, next);
                self.nodes[x].prev = None;
                self.buckets[b].head = Some(next);
            }
            (None, None) => {
                self.buckets[b] = Bucket::default();
            }
        }

        self.nodes[n] = Node::default();
    }

    /// Move `blk` from bucket `from` to the tail of bucket `to`.
    pub fn relink(&mut self, die: DieId, blk: BlockId, from: BaseType, to: BaseType) {
        self.remove(die, blk, from);
        self.insert(die, blk, to);
    }

    pub fn head(&self, die: DieId, invalid: BaseType) -> Option<BlockId> {
        self.buckets[self.bucket_idx(die, invalid)].head
    }

    pub fn members(&self, die: DieId, invalid: BaseType) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut cursor = self.head(die, invalid);
        while let Some(blk) = cursor {
            out.push(blk);
            cursor = self.nodes[self.node_idx(die, blk)].next;
        }
        out
    }

    /// Take the head of the fullest non-empty bucket above zero.
    pub fn pop_most_invalid(&mut self, die: DieId) -> Option<(BlockId, BaseType)> {
        let invalid = (1..self.buckets_per_die).rev().find(|&k| self.head(die, k).is_some())?;
        let blk = self.head(die, invalid)?;
        self.remove(die, blk, invalid);
        Some((blk, invalid))
    }
}
