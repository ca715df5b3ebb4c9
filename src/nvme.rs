//! NVM I/O command handling at the protocol boundary.
//!
//! Commands arrive as raw 64-byte submission entries. Fields are pulled out with
//! explicit shifts and masks rather than a packed struct, then checked against
//! the namespace before anything reaches the mapping layer.

use log::{info, warn};

use crate::addr::Lpn;

pub const CMD_BYTES: usize = 64;

pub const IO_NVM_FLUSH: u8 = 0x00;
pub const IO_NVM_WRITE: u8 = 0x01;
pub const IO_NVM_READ: u8 = 0x02;

const PRP_HIGH_LIMIT: u32 = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NvmeStatus {
    Success = 0x0,
    InvalidField = 0x2,
    LbaRange = 0x80,
}

impl NvmeStatus {
    pub fn code(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoOp {
    Write,
    Read,
}

impl IoOp {
    pub fn opcode(self) -> u8 {
        match self {
            IoOp::Write => IO_NVM_WRITE,
            IoOp::Read => IO_NVM_READ,
        }
    }

    // index into per-op counters
    pub fn idx(self) -> usize {
        match self {
            IoOp::Write => 0,
            IoOp::Read => 1,
        }
    }
}

/// What the front end should do with a decoded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Complete(NvmeStatus),
    Transfer { start_lba: u32, nlb_zb: u16, op: IoOp },
}

fn dword(bytes: &[u8; CMD_BYTES], n: usize) -> u32 {
    u32::from_le_bytes([bytes[4 * n], bytes[4 * n + 1], bytes[4 * n + 2], bytes[4 * n + 3]])
}

fn put_dword(bytes: &mut [u8; CMD_BYTES], n: usize, value: u32) {
    bytes[4 * n..4 * n + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view over one submission queue entry.
#[derive(Clone, Copy)]
pub struct IoCommand<'a> {
    raw: &'a [u8; CMD_BYTES],
}

impl<'a> IoCommand<'a> {
    pub fn new(raw: &'a [u8; CMD_BYTES]) -> Self {
        IoCommand { raw }
    }

    pub fn opcode(&self) -> u8 {
        (dword(self.raw, 0) & 0xFF) as u8
    }

    pub fn cid(&self) -> u16 {
        (dword(self.raw, 0) >> 16) as u16
    }

    pub fn nsid(&self) -> u32 {
        dword(self.raw, 1)
    }

    /// [low, high] halves of PRP entry 1.
    pub fn prp1(&self) -> [u32; 2] {
        [dword(self.raw, 6), dword(self.raw, 7)]
    }

    pub fn prp2(&self) -> [u32; 2] {
        [dword(self.raw, 8), dword(self.raw, 9)]
    }

    pub fn start_lba(&self) -> [u32; 2] {
        [dword(self.raw, 10), dword(self.raw, 11)]
    }

    /// Number of logical blocks, zero based.
    pub fn nlb(&self) -> u16 {
        (dword(self.raw, 12) & 0xFFFF) as u16
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IoCommandBuilder {
    opcode: u8,
    cid: u16,
    nsid: u32,
    prp1: u64,
    prp2: u64,
    slba: u64,
    nlb_zb: u16,
}

impl IoCommandBuilder {
    pub fn new(opcode: u8) -> Self {
        IoCommandBuilder { opcode, nsid: 1, ..Default::default() }
    }

    pub fn cid(mut self, cid: u16) -> Self {
        self.cid = cid;
        self
    }

    pub fn prp(mut self, prp1: u64, prp2: u64) -> Self {
        self.prp1 = prp1;
        self.prp2 = prp2;
        self
    }

    pub fn range(mut self, slba: u64, nlb_zb: u16) -> Self {
        self.slba = slba;
        self.nlb_zb = nlb_zb;
        self
    }

    pub fn build(self) -> [u8; CMD_BYTES] {
        let mut raw = [0u8; CMD_BYTES];
        put_dword(&mut raw, 0, self.opcode as u32 | (self.cid as u32) << 16);
        put_dword(&mut raw, 1, self.nsid);
        put_dword(&mut raw, 6, self.prp1 as u32);
        put_dword(&mut raw, 7, (self.prp1 >> 32) as u32);
        put_dword(&mut raw, 8, self.prp2 as u32);
        put_dword(&mut raw, 9, (self.prp2 >> 32) as u32);
        put_dword(&mut raw, 10, self.slba as u32);
        put_dword(&mut raw, 11, (self.slba >> 32) as u32);
        put_dword(&mut raw, 12, self.nlb_zb as u32);
        raw
    }
}

/// Writes need 16-byte aligned buffers, reads 4-byte; both PRP high halves must stay below 0x10000.
pub fn check_prp_aligned(cmd: &IoCommand, is_write: bool) -> bool {
    let mask = if is_write { 0xF } else { 0x3 };
    let (prp1, prp2) = (cmd.prp1(), cmd.prp2());

    if prp1[0] & mask != 0 || prp2[0] & mask != 0 {
        return false;
    }
    prp1[1] < PRP_HIGH_LIMIT && prp2[1] < PRP_HIGH_LIMIT
}

fn validate_rw(cmd: &IoCommand, op: IoOp, ns_size: u64) -> Disposition {
    if ns_size == 0 {
        info!("[NVMe][{:?}] namespace size is 0 (partition not set); early-complete", op);
        return Disposition::Complete(NvmeStatus::Success);
    }

    if !check_prp_aligned(cmd, op == IoOp::Write) {
        return Disposition::Complete(NvmeStatus::InvalidField);
    }

    let [slba, slba_high] = cmd.start_lba();
    if slba_high != 0 {
        return Disposition::Complete(NvmeStatus::InvalidField);
    }

    let nlb_zb = cmd.nlb();
    let xfer_blks = nlb_zb as u64 + 1;
    if slba as u64 >= ns_size || slba as u64 + xfer_blks > ns_size {
        return Disposition::Complete(NvmeStatus::LbaRange);
    }

    Disposition::Transfer { start_lba: slba, nlb_zb, op }
}

/// Decode and validate one I/O command against a namespace of `ns_size` blocks.
pub fn handle_io_cmd(raw: &[u8; CMD_BYTES], ns_size: u64) -> Disposition {
    let cmd = IoCommand::new(raw);

    match cmd.opcode() {
        IO_NVM_FLUSH => Disposition::Complete(NvmeStatus::Success),
        IO_NVM_WRITE => validate_rw(&cmd, IoOp::Write, ns_size),
        IO_NVM_READ => validate_rw(&cmd, IoOp::Read, ns_size),
        opc => {
            warn!("Not Support IO Command OPC: {:X}", opc);
            Disposition::Complete(NvmeStatus::InvalidField)
        }
    }
}

/// Logical slices covered by a validated range. One block is one slice.
pub fn slices(start_lba: u32, nlb_zb: u16) -> impl Iterator<Item = Lpn> {
    let start = start_lba as Lpn;
    start..=start + nlb_zb as Lpn
}
