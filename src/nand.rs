//! # NAND State Hierarchy
//!
//! Static tree of channel → LUN → plane → block → page → sector state,
//! built once from the parameter record at init. The upper FTL owns the
//! validity bookkeeping; the timing model only consumes each LUN's
//! availability point and each channel's bandwidth model.

use alloc::vec::Vec;
use core::fmt;

use crate::channel::{ChannelModel, UNIT_XFER_SIZE};
use crate::params::{CellType, SsdParams};
use crate::ppa::Ppa;

/// Validity state of one sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorStatus {
    Free,
    Valid,
    Invalid,
}

/// Validity state of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Free,
    Valid,
    Invalid,
}

/// One logical page of NAND state
#[derive(Debug, Clone)]
pub struct NandPage {
    pub status: PageStatus,
    pub sectors: Vec<SectorStatus>,
}

impl NandPage {
    fn new(sp: &SsdParams) -> Self {
        Self {
            status: PageStatus::Free,
            sectors: alloc::vec![SectorStatus::Free; sp.sectors_per_page as usize],
        }
    }
}

/// One erase block and its FTL bookkeeping
#[derive(Debug, Clone)]
pub struct NandBlock {
    pub pages: Vec<NandPage>,
    /// Count of invalidated pages
    pub invalid_page_count: u32,
    /// Count of valid pages
    pub valid_page_count: u32,
    /// Erase cycles this block has seen
    pub erase_count: u32,
    /// Next page index to program
    pub write_pointer: u32,
}

impl NandBlock {
    fn new(sp: &SsdParams) -> Self {
        Self {
            pages: (0..sp.pages_per_block).map(|_| NandPage::new(sp)).collect(),
            invalid_page_count: 0,
            valid_page_count: 0,
            erase_count: 0,
            write_pointer: 0,
        }
    }
}

/// One plane of blocks
#[derive(Debug, Clone)]
pub struct NandPlane {
    pub blocks: Vec<NandBlock>,
}

impl NandPlane {
    fn new(sp: &SsdParams) -> Self {
        Self {
            blocks: (0..sp.blocks_per_plane).map(|_| NandBlock::new(sp)).collect(),
        }
    }
}

/// One die: the unit of NAND parallelism and availability tracking
#[derive(Debug, Clone)]
pub struct NandLun {
    pub planes: Vec<NandPlane>,
    /// Earliest time the die can accept another operation (ns).
    /// Non-decreasing for the lifetime of the simulation.
    pub next_avail_time: u64,
    pub busy: bool,
}

impl NandLun {
    fn new(sp: &SsdParams) -> Self {
        Self {
            planes: (0..sp.planes_per_lun).map(|_| NandPlane::new(sp)).collect(),
            next_avail_time: 0,
            busy: false,
        }
    }
}

/// One NAND channel: its dies plus the shared bus timing model
#[derive(Debug, Clone)]
pub struct SsdChannel {
    pub luns: Vec<NandLun>,
    pub model: ChannelModel,
}

impl SsdChannel {
    pub fn new(sp: &SsdParams) -> Self {
        let mut model = ChannelModel::new(sp.ch_bandwidth);
        // Firmware spends a fixed cost shepherding each transfer unit
        model.add_transfer_overhead(
            sp.fw_ch_xfer_latency * (UNIT_XFER_SIZE / 4096) as u64,
        );
        Self {
            luns: (0..sp.luns_per_channel).map(|_| NandLun::new(sp)).collect(),
            model,
        }
    }
}

/// Raw-opcode decode failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Opcode does not name a NAND operation
    Unsupported(u8),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unsupported(op) => write!(f, "Unsupported NAND command {:#x}", op),
        }
    }
}

/// NAND operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NandCmdKind {
    Read = 0,
    Write = 1,
    Erase = 2,
    Nop = 3,
}

impl NandCmdKind {
    /// Decode a wire opcode; the dispatcher calls this before building a
    /// [`NandCmd`], so unknown opcodes never reach the command timer.
    pub fn from_raw(op: u8) -> Result<NandCmdKind, CommandError> {
        match op {
            0 => Ok(NandCmdKind::Read),
            1 => Ok(NandCmdKind::Write),
            2 => Ok(NandCmdKind::Erase),
            3 => Ok(NandCmdKind::Nop),
            other => {
                log::error!("Unsupported NAND command: {:#x}", other);
                Err(CommandError::Unsupported(other))
            }
        }
    }
}

/// One command handed to the timing model
#[derive(Debug, Clone, Copy)]
pub struct NandCmd {
    pub kind: NandCmdKind,
    pub ppa: Ppa,
    /// Transfer size in bytes
    pub xfer_size: u64,
    /// Submit time in ns; 0 means "use the dispatcher clock"
    pub stime: u64,
    /// Overlap host DMA with the channel transfer of each read chunk
    pub interleave_pci_dma: bool,
    /// Overrides the cell type derived from the page index
    pub cell_hint: Option<CellType>,
}

impl NandCmd {
    pub fn read(ppa: Ppa, xfer_size: u64, stime: u64) -> Self {
        Self {
            kind: NandCmdKind::Read,
            ppa,
            xfer_size,
            stime,
            interleave_pci_dma: false,
            cell_hint: None,
        }
    }

    pub fn write(ppa: Ppa, xfer_size: u64, stime: u64) -> Self {
        Self {
            kind: NandCmdKind::Write,
            ppa,
            xfer_size,
            stime,
            interleave_pci_dma: false,
            cell_hint: None,
        }
    }

    pub fn erase(ppa: Ppa, stime: u64) -> Self {
        Self {
            kind: NandCmdKind::Erase,
            ppa,
            xfer_size: 0,
            stime,
            interleave_pci_dma: false,
            cell_hint: None,
        }
    }

    pub fn nop(ppa: Ppa, stime: u64) -> Self {
        Self {
            kind: NandCmdKind::Nop,
            ppa,
            xfer_size: 0,
            stime,
            interleave_pci_dma: false,
            cell_hint: None,
        }
    }
}
