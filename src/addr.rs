use crate::config::{BaseType, SsdConfig};

pub type Lpn = BaseType;
pub type PageIdx = BaseType;
pub type DieId = BaseType;
pub type BlockId = BaseType;

pub const INVALID_LPN: Lpn = Lpn::MAX;

/// Physical page address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ppa {
    pub ch: BaseType,
    pub way: BaseType,
    pub blk: BlockId,
    pub pg: BaseType,
}

/// Flash geometry, copied out of the config so hot paths don't chase it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub channels: BaseType,
    pub ways: BaseType,
    pub blocks_per_die: BaseType,
    pub pages_per_block: BaseType,
}

impl Geometry {
    pub fn new(cfg: &SsdConfig) -> Self {
        Geometry {
            channels: cfg.channels,
            ways: cfg.ways,
            blocks_per_die: cfg.blocks_per_die,
            pages_per_block: cfg.pages_per_block,
        }
    }

    pub fn dies(&self) -> BaseType {
        self.channels * self.ways
    }

    pub fn total_pages(&self) -> BaseType {
        self.dies() * self.blocks_per_die * self.pages_per_block
    }

    /// Dies are numbered channel-first so consecutive dies land on different channels.
    pub fn die_of(&self, ch: BaseType, way: BaseType) -> DieId {
        way * self.channels + ch
    }

    pub fn ch_way(&self, die: DieId) -> (BaseType, BaseType) {
        (die % self.channels, die / self.channels)
    }

    pub fn ppa(&self, die: DieId, blk: BlockId, pg: BaseType) -> Ppa {
        let (ch, way) = self.ch_way(die);
        Ppa { ch, way, blk, pg }
    }

    pub fn die_of_ppa(&self, ppa: &Ppa) -> DieId {
        self.die_of(ppa.ch, ppa.way)
    }

    pub fn ppa2pgidx(&self, ppa: &Ppa) -> PageIdx {
        let pgidx = ppa.ch * self.ways * self.blocks_per_die * self.pages_per_block
            + ppa.way * self.blocks_per_die * self.pages_per_block
            + ppa.blk * self.pages_per_block
            + ppa.pg;

        assert!(pgidx < self.total_pages(), "page index {} out of bound for {:?}", pgidx, ppa);
        pgidx
    }

    pub fn pgidx2ppa(&self, pgidx: PageIdx) -> Ppa {
        assert!(pgidx < self.total_pages(), "page index {} out of bound", pgidx);
        let pg = pgidx % self.pages_per_block;
        let blk = (pgidx / self.pages_per_block) % self.blocks_per_die;
        let way = (pgidx / (self.pages_per_block * self.blocks_per_die)) % self.ways;
        let ch = pgidx / (self.pages_per_block * self.blocks_per_die * self.ways);
        Ppa { ch, way, blk, pg }
    }
}
