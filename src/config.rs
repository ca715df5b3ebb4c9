use anyhow::{bail, Context};
use log::warn;
use num_integer::Integer;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use toml::{Table, Value};

pub type BaseType = usize;

pub type Tick = u64;
pub type Counter = BaseType;

pub const CHANNELS: BaseType = 8;
pub const WAYS: BaseType = 8;
pub const BLOCKS_PER_DIE: BaseType = 64;
pub const PAGES_PER_BLOCK: BaseType = 128;

pub const PAGE_SIZE: BaseType = 4096;

pub const OVER_PROVISIONING: f64 = 10.0;
pub const GC_THRESHOLD_PERCENT: BaseType = 5;

pub const READ_TRIGGER_LATENCY: Tick = 40;
pub const READ_TRANSFER_LATENCY: Tick = 5;
pub const PROGRAM_LATENCY: Tick = 100;
pub const ERASE_LATENCY: Tick = 15000;

pub const MAX_QUEUE_DEPTH: BaseType = 64;
pub const MAX_HOSTS: BaseType = 10;
// zero-based 16-bit block count of one NVM command
pub const MAX_TRANSFER_BLOCKS: u32 = u16::MAX as u32 + 1;

/// Anything that can be pulled out of one section of the config file.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize config section"),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GcPolicy {
    /// Age-weighted score over every candidate block.
    #[default]
    CostBenefit,
    /// Head of the fullest invalid-count bucket.
    Greedy,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SsdConfig {
    pub channels: BaseType,
    pub ways: BaseType,
    pub blocks_per_die: BaseType,
    pub pages_per_block: BaseType,
    pub page_size: BaseType,
    pub over_provisioning: f64,
    /// Free blocks per die kept in reserve before GC kicks in, as a percentage.
    pub gc_threshold_percent: BaseType,
    /// Namespace size in blocks. `None` exposes every user page.
    pub namespace_blocks: Option<u64>,
    /// (die, block) pairs that are bad from the factory.
    pub bad_blocks: Vec<(BaseType, BaseType)>,
    pub gc_policy: GcPolicy,
}

impl Config for SsdConfig {}

impl Default for SsdConfig {
    fn default() -> Self {
        Self {
            channels: CHANNELS,
            ways: WAYS,
            blocks_per_die: BLOCKS_PER_DIE,
            pages_per_block: PAGES_PER_BLOCK,
            page_size: PAGE_SIZE,
            over_provisioning: OVER_PROVISIONING,
            gc_threshold_percent: GC_THRESHOLD_PERCENT,
            namespace_blocks: None,
            bad_blocks: Vec::new(),
            gc_policy: GcPolicy::CostBenefit,
        }
    }
}

impl SsdConfig {
    pub fn dies(&self) -> BaseType {
        self.channels * self.ways
    }

    pub fn pages_per_die(&self) -> BaseType {
        self.blocks_per_die * self.pages_per_block
    }

    pub fn total_pages(&self) -> BaseType {
        self.dies() * self.pages_per_die()
    }

    pub fn user_pages(&self) -> BaseType {
        let op_pages = (self.total_pages() as f64 * (self.over_provisioning / 100.)).trunc() as BaseType;
        self.total_pages() - op_pages
    }

    /// Free-block count at or below which a die collects garbage.
    pub fn gc_threshold_blocks(&self) -> BaseType {
        (self.blocks_per_die * self.gc_threshold_percent / 100).max(1)
    }

    pub fn namespace_size(&self) -> u64 {
        self.namespace_blocks.unwrap_or(self.user_pages() as u64)
    }

    fn bad_blocks_in_die(&self, die: BaseType) -> BaseType {
        self.bad_blocks.iter().filter(|(d, _)| *d == die).count()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channels == 0 || self.ways == 0 {
            bail!("geometry needs at least one channel and one way");
        }
        if self.ways > 32 {
            bail!("at most 32 ways per channel are supported, got {}", self.ways);
        }
        if self.pages_per_block == 0 || self.blocks_per_die < 4 {
            bail!(
                "degenerate die: {} blocks of {} pages",
                self.blocks_per_die,
                self.pages_per_block
            );
        }
        if !(0.0..100.0).contains(&self.over_provisioning) {
            bail!("over provisioning must be in [0, 100), got {}", self.over_provisioning);
        }
        for &(die, block) in &self.bad_blocks {
            if die >= self.dies() || block >= self.blocks_per_die {
                bail!("bad block ({}, {}) is outside the device", die, block);
            }
        }

        // Live data of one die must leave room for the GC reserve, the active block
        // and one block to land relocations in, or victim selection can come up empty.
        let per_die_user = Integer::div_ceil(&self.user_pages(), &self.dies());
        for die in 0..self.dies() {
            let usable = self.blocks_per_die - self.bad_blocks_in_die(die);
            let budget = usable.saturating_sub(self.gc_threshold_blocks() + 2) * self.pages_per_block;
            if per_die_user > budget {
                bail!(
                    "die {} holds up to {} user pages but only {} fit outside the GC reserve; raise over_provisioning",
                    die,
                    per_die_user,
                    budget
                );
            }
        }

        if self.namespace_size() > self.user_pages() as u64 {
            bail!(
                "namespace of {} blocks exceeds {} user pages",
                self.namespace_size(),
                self.user_pages()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct LatencyConfig {
    pub read_trigger: Tick,
    pub read_transfer: Tick,
    pub program: Tick,
    pub erase: Tick,
}

impl Config for LatencyConfig {}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            read_trigger: READ_TRIGGER_LATENCY,
            read_transfer: READ_TRANSFER_LATENCY,
            program: PROGRAM_LATENCY,
            erase: ERASE_LATENCY,
        }
    }
}

impl LatencyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.erase > self.program && self.program > self.read_trigger && self.read_trigger > self.read_transfer) {
            bail!(
                "latencies must satisfy erase > program > trigger > transfer, got {:?}",
                self
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SimConfig {
    pub max_queue_depth: BaseType,
    pub ops: u64,
    pub precondition: bool,
    pub seed: u64,
    /// Simulated time between two bandwidth reports.
    pub report_interval: Tick,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: MAX_QUEUE_DEPTH,
            ops: 100_000,
            precondition: false,
            seed: 7,
            report_interval: 1_000_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    #[default]
    Sequential,
    Random,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    pub pattern: Pattern,
    pub read_percent: u32,
    pub write_percent: u32,
    pub nblks: u32,
    /// Share of the namespace this host works on. `None` splits evenly.
    pub partition_percent: Option<u32>,
}

impl Default for HostConfig {
    // sequential 16K writes
    fn default() -> Self {
        Self {
            pattern: Pattern::Sequential,
            read_percent: 0,
            write_percent: 100,
            nblks: 4,
            partition_percent: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullConfig {
    pub ssd: SsdConfig,
    pub latency: LatencyConfig,
    pub sim: SimConfig,
    pub hosts: Vec<HostConfig>,
}

impl FullConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let table: Table = toml::from_str(text).context("cannot parse config toml")?;
        let hosts = match table.get("host") {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize [[host]] entries")?,
            None => Vec::new(),
        };
        Ok(Self {
            ssd: SsdConfig::from_section(table.get("ssd"))?,
            latency: LatencyConfig::from_section(table.get("latency"))?,
            sim: SimConfig::from_section(table.get("sim"))?,
            hosts,
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&mut self) -> anyhow::Result<()> {
        self.ssd.validate()?;
        self.latency.validate()?;
        if self.sim.max_queue_depth == 0 {
            bail!("max_queue_depth must be at least 1");
        }
        if self.hosts.is_empty() {
            self.hosts.push(HostConfig::default());
        }
        if self.hosts.len() > MAX_HOSTS {
            bail!("too many hosts {} (max {})", self.hosts.len(), MAX_HOSTS);
        }
        for (idx, host) in self.hosts.iter().enumerate() {
            if host.read_percent + host.write_percent != 100 {
                bail!(
                    "invalid option for host[{}] read[{}] write[{}] percents",
                    idx,
                    host.read_percent,
                    host.write_percent
                );
            }
            if host.nblks == 0 {
                bail!("host[{}] needs a request size of at least one block", idx);
            }
            if host.nblks > MAX_TRANSFER_BLOCKS {
                bail!(
                    "host[{}] request size {} exceeds {} blocks per command",
                    idx,
                    host.nblks,
                    MAX_TRANSFER_BLOCKS
                );
            }
        }
        let explicit: u32 = self.hosts.iter().filter_map(|h| h.partition_percent).sum();
        if explicit > 100 {
            bail!("host partitions add up to {}%", explicit);
        }
        Ok(())
    }
}
