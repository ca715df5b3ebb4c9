#![allow(dead_code)]
#![allow(unused)]

mod addr;
mod busy;
mod config;
mod dispatch;
mod ftl;
mod gc;
mod host;
mod nand;
mod nvme;
mod request;
mod sim;
mod timer;
mod victim;

#[macro_use]
extern crate log;
extern crate simplelog;

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use simplelog::*;
use time::macros::format_description;

use crate::config::FullConfig;
use crate::sim::Simulation;

#[derive(Parser, Debug)]
#[command(version, about = "Discrete-event NAND SSD flash management simulator")]
struct Args {
    /// TOML file with [ssd], [latency], [sim] and [[host]] sections
    config: Option<PathBuf>,

    /// Number of host requests to issue
    #[arg(long)]
    ops: Option<u64>,

    /// Map every logical page once before the run
    #[arg(long)]
    precondition: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> anyhow::Result<FullConfig> {
    let mut cfg = match &args.config {
        Some(path) => FullConfig::from_file(path)?,
        None => FullConfig::default(),
    };
    if let Some(ops) = args.ops {
        cfg.sim.ops = ops;
    }
    if let Some(seed) = args.seed {
        cfg.sim.seed = seed;
    }
    cfg.sim.precondition |= args.precondition;

    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|_| anyhow!("unknown log level {:?}", args.log_level))?;
    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();
    SimpleLogger::init(level, log_cfg)?;

    let cfg = load_config(&args)?;
    info!(
        "{} hosts, {} ops, queue depth {}, precondition {}",
        cfg.hosts.len(),
        cfg.sim.ops,
        cfg.sim.max_queue_depth,
        cfg.sim.precondition
    );

    let mut sim = Simulation::new(cfg);
    sim.run();
    sim.summary();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_defaults() {
        let args = Args::parse_from(["nand-ftl-sim", "--ops", "10", "--precondition", "--seed", "3"]);
        let cfg = load_config(&args).unwrap();
        assert_eq!(cfg.sim.ops, 10);
        assert_eq!(cfg.sim.seed, 3);
        assert!(cfg.sim.precondition);
        assert_eq!(cfg.hosts.len(), 1);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::parse_from(["nand-ftl-sim", "/nonexistent/ssd.toml"]);
        assert!(load_config(&args).is_err());
    }
}
