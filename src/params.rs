//! # SSD Geometry and Latency Parameters
//!
//! This module holds the compile-time device constants and derives the full
//! parameter record for one SSD partition from a raw capacity and a
//! partition count. The derivation is pure arithmetic; the record is
//! immutable once built and is shared by the timing model, the NAND state
//! hierarchy, and the write buffer.

use core::fmt;

use log::info;

/// Host sector (LBA) size in bytes
pub const LBA_SIZE: u32 = 512;
/// Logical page size in bytes; the mapping granularity of the upper FTL
pub const LOGICAL_PAGE_SIZE: u32 = 4096;

/// Number of vertical device partitions driven by independent dispatchers
pub const SSD_PARTITIONS: u32 = 4;
/// NAND channels on the whole device
pub const NAND_CHANNELS: u32 = 8;
/// Dies per NAND channel
pub const LUNS_PER_NAND_CH: u32 = 2;
/// Planes per die
pub const PLNS_PER_LUN: u32 = 1;
/// Blocks per plane; when non-zero the block size is derived from capacity
pub const BLKS_PER_PLN: u32 = 8192;
/// Fixed block size in bytes; consulted only when `BLKS_PER_PLN` is zero
pub const BLK_SIZE: u64 = 0;

/// Flash page size in bytes (multi-plane program unit)
pub const FLASH_PAGE_SIZE: u32 = 32 * 1024;
/// Oneshot page size in bytes (pages programmed in a single NAND operation)
pub const ONESHOT_PAGE_SIZE: u32 = FLASH_PAGE_SIZE;
/// Largest single transfer on a NAND channel
pub const MAX_CH_XFER_SIZE: u32 = 16 * 1024;
/// Host write granularity in bytes
pub const WRITE_UNIT_SIZE: u32 = 512;

/// Bits stored per cell; selects how many cell types the timing model uses
pub const CELL_MODE: u32 = 3; // TLC

/// NAND 4 KiB read latencies per cell type (ns)
pub const NAND_4KB_READ_LATENCY_LSB: u64 = 29_760;
pub const NAND_4KB_READ_LATENCY_MSB: u64 = 41_760;
pub const NAND_4KB_READ_LATENCY_CSB: u64 = 53_760;
/// NAND full-page read latencies per cell type (ns)
pub const NAND_READ_LATENCY_LSB: u64 = 36_013;
pub const NAND_READ_LATENCY_MSB: u64 = 48_013;
pub const NAND_READ_LATENCY_CSB: u64 = 60_013;
/// NAND page program latency (ns)
pub const NAND_PROG_LATENCY: u64 = 190_000;
/// NAND block erase latency (ns)
pub const NAND_ERASE_LATENCY: u64 = 3_000_000;

/// Firmware overhead for a 4 KiB read (ns)
pub const FW_4KB_READ_LATENCY: u64 = 21_500;
/// Firmware overhead for a full-page read (ns)
pub const FW_READ_LATENCY: u64 = 30_490;
/// Firmware overhead added to each channel transfer unit (ns)
pub const FW_CH_XFER_LATENCY: u64 = 0;
/// Fixed firmware cost of buffering a host write (ns)
pub const FW_WBUF_LATENCY0: u64 = 4_000;
/// Per-4-KiB firmware cost of buffering a host write (ns)
pub const FW_WBUF_LATENCY1: u64 = 460;

/// NAND channel bandwidth in MiB/s
pub const NAND_CHANNEL_BANDWIDTH: u64 = 800;
/// Host DMA link bandwidth in MiB/s, shared by all channels
pub const PCIE_BANDWIDTH: u64 = 3_360;

/// Total host write buffer size in bytes, split evenly across partitions
pub const GLOBAL_WB_SIZE: usize =
    (NAND_CHANNELS * LUNS_PER_NAND_CH * ONESHOT_PAGE_SIZE * 2) as usize;
/// Complete host writes as soon as they are buffered
pub const WRITE_EARLY_COMPLETION: bool = true;

/// NAND cell type addressed by a page, selecting its read latency class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Lsb,
    Msb,
    Csb,
}

impl CellType {
    /// Index into the per-cell latency tables
    pub fn index(&self) -> usize {
        match self {
            CellType::Lsb => 0,
            CellType::Msb => 1,
            CellType::Csb => 2,
        }
    }

    fn from_index(idx: u32) -> CellType {
        match idx {
            0 => CellType::Lsb,
            1 => CellType::Msb,
            _ => CellType::Csb,
        }
    }
}

/// Parameter derivation errors, all fatal at init time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Partition count of zero
    ZeroPartitions,
    /// Channel count is not a multiple of the partition count
    ChannelsNotPartitionable,
    /// Capacity is not a multiple of the partition count
    CapacityNotPartitionable,
    /// Derived or configured block size is zero
    ZeroBlockSize,
    /// Oneshot/flash page sizes are not multiples of the logical page size
    MisalignedPageGeometry,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroPartitions => write!(f, "Partition count is zero"),
            ConfigError::ChannelsNotPartitionable => {
                write!(f, "Channel count does not divide by partition count")
            }
            ConfigError::CapacityNotPartitionable => {
                write!(f, "Capacity does not divide by partition count")
            }
            ConfigError::ZeroBlockSize => write!(f, "Block size is zero"),
            ConfigError::MisalignedPageGeometry => {
                write!(f, "Oneshot/flash page sizes are not page-aligned")
            }
        }
    }
}

/// Fully derived geometry and latency record for one SSD partition
#[derive(Debug, Clone)]
pub struct SsdParams {
    /// Sector size in bytes
    pub sector_size: u32,
    /// Sectors per logical page
    pub sectors_per_page: u32,
    /// Logical page size in bytes
    pub page_size: u32,

    /// NAND channels owned by this partition
    pub channels: u32,
    /// Planes per LUN
    pub planes_per_lun: u32,
    /// LUNs per channel
    pub luns_per_channel: u32,
    /// Bits per cell
    pub cell_mode: u32,
    /// Blocks per plane
    pub blocks_per_plane: u32,

    /// Logical pages per oneshot page
    pub pages_per_oneshot_page: u32,
    /// Oneshot pages per block
    pub oneshot_pages_per_block: u32,
    /// Logical pages per flash page
    pub pages_per_flash_page: u32,
    /// Flash pages per block
    pub flash_pages_per_block: u32,
    /// Logical pages per block
    pub pages_per_block: u32,

    /// Host write granularity in bytes
    pub write_unit_size: u32,

    /// 4 KiB read latency per cell type (ns)
    pub pg_4kb_read_latency: [u64; 3],
    /// Full-page read latency per cell type (ns)
    pub pg_read_latency: [u64; 3],
    /// Page program latency (ns)
    pub pg_write_latency: u64,
    /// Block erase latency (ns)
    pub blk_erase_latency: u64,
    /// Largest single channel transfer in bytes
    pub max_ch_xfer_size: u32,

    /// Firmware overhead for a 4 KiB read (ns)
    pub fw_4kb_read_latency: u64,
    /// Firmware overhead for a full-page read (ns)
    pub fw_read_latency: u64,
    /// Firmware overhead per channel transfer unit (ns)
    pub fw_ch_xfer_latency: u64,
    /// Fixed firmware cost of buffering a host write (ns)
    pub fw_wbuf_latency0: u64,
    /// Per-4-KiB firmware cost of buffering a host write (ns)
    pub fw_wbuf_latency1: u64,

    /// NAND channel bandwidth in MiB/s
    pub ch_bandwidth: u64,
    /// Host DMA bandwidth in MiB/s
    pub pcie_bandwidth: u64,

    /// Write buffer size for this partition in bytes
    pub write_buffer_size: usize,
    /// Complete host writes at buffer admission time
    pub write_early_completion: bool,

    /// Number of partitions the whole device was split into
    pub partitions: u32,

    /// Sectors per block
    pub sectors_per_block: u64,
    /// Sectors per plane
    pub sectors_per_plane: u64,
    /// Sectors per LUN
    pub sectors_per_lun: u64,
    /// Sectors per channel
    pub sectors_per_channel: u64,
    /// Total sectors in this partition
    pub total_sectors: u64,

    /// Pages per plane
    pub pages_per_plane: u64,
    /// Pages per LUN
    pub pages_per_lun: u64,
    /// Pages per channel
    pub pages_per_channel: u64,
    /// Total pages in this partition
    pub total_pages: u64,

    /// Blocks per LUN
    pub blocks_per_lun: u64,
    /// Blocks per channel
    pub blocks_per_channel: u64,
    /// Total blocks in this partition
    pub total_blocks: u64,

    /// Planes per channel
    pub planes_per_channel: u64,
    /// Total planes in this partition
    pub total_planes: u64,

    /// Total LUNs in this partition
    pub total_luns: u64,

    /// Blocks per line (one block from every LUN)
    pub blocks_per_line: u64,
    /// Pages per line
    pub pages_per_line: u64,
    /// Sectors per line
    pub sectors_per_line: u64,
    /// Total lines in this partition
    pub total_lines: u64,
}

pub(crate) fn div_round_up(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

impl SsdParams {
    /// Derive the parameter record for one partition of a device with the
    /// given raw capacity in bytes.
    pub fn new(capacity: u64, partitions: u32) -> Result<SsdParams, ConfigError> {
        if partitions == 0 {
            return Err(ConfigError::ZeroPartitions);
        }
        if NAND_CHANNELS % partitions != 0 {
            return Err(ConfigError::ChannelsNotPartitionable);
        }
        if capacity % partitions as u64 != 0 {
            return Err(ConfigError::CapacityNotPartitionable);
        }

        // Partition the device by dividing channels and capacity
        let channels = NAND_CHANNELS / partitions;
        let capacity = capacity / partitions as u64;

        let luns_per_channel = LUNS_PER_NAND_CH;
        let planes_per_lun = PLNS_PER_LUN;

        let plane_count = (channels * luns_per_channel * planes_per_lun) as u64;
        let (blocks_per_plane, blk_size) = if BLKS_PER_PLN > 0 {
            // Block size depends on capacity
            let blk_size = div_round_up(capacity, BLKS_PER_PLN as u64 * plane_count);
            (BLKS_PER_PLN, blk_size)
        } else {
            if BLK_SIZE == 0 {
                return Err(ConfigError::ZeroBlockSize);
            }
            let blocks = div_round_up(capacity, BLK_SIZE * plane_count);
            (blocks as u32, BLK_SIZE)
        };
        if blk_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }

        if ONESHOT_PAGE_SIZE % LOGICAL_PAGE_SIZE != 0
            || FLASH_PAGE_SIZE % LOGICAL_PAGE_SIZE != 0
            || ONESHOT_PAGE_SIZE % FLASH_PAGE_SIZE != 0
        {
            return Err(ConfigError::MisalignedPageGeometry);
        }

        let pages_per_oneshot_page = ONESHOT_PAGE_SIZE / LOGICAL_PAGE_SIZE;
        let oneshot_pages_per_block = div_round_up(blk_size, ONESHOT_PAGE_SIZE as u64) as u32;
        let pages_per_flash_page = FLASH_PAGE_SIZE / LOGICAL_PAGE_SIZE;
        let flash_pages_per_block = (ONESHOT_PAGE_SIZE / FLASH_PAGE_SIZE) * oneshot_pages_per_block;
        let pages_per_block = pages_per_oneshot_page * oneshot_pages_per_block;

        let mut sp = SsdParams {
            sector_size: LBA_SIZE,
            sectors_per_page: LOGICAL_PAGE_SIZE / LBA_SIZE,
            page_size: LOGICAL_PAGE_SIZE,
            channels,
            planes_per_lun,
            luns_per_channel,
            cell_mode: CELL_MODE,
            blocks_per_plane,
            pages_per_oneshot_page,
            oneshot_pages_per_block,
            pages_per_flash_page,
            flash_pages_per_block,
            pages_per_block,
            write_unit_size: WRITE_UNIT_SIZE,
            pg_4kb_read_latency: [
                NAND_4KB_READ_LATENCY_LSB,
                NAND_4KB_READ_LATENCY_MSB,
                NAND_4KB_READ_LATENCY_CSB,
            ],
            pg_read_latency: [
                NAND_READ_LATENCY_LSB,
                NAND_READ_LATENCY_MSB,
                NAND_READ_LATENCY_CSB,
            ],
            pg_write_latency: NAND_PROG_LATENCY,
            blk_erase_latency: NAND_ERASE_LATENCY,
            max_ch_xfer_size: MAX_CH_XFER_SIZE,
            fw_4kb_read_latency: FW_4KB_READ_LATENCY,
            fw_read_latency: FW_READ_LATENCY,
            fw_ch_xfer_latency: FW_CH_XFER_LATENCY,
            fw_wbuf_latency0: FW_WBUF_LATENCY0,
            fw_wbuf_latency1: FW_WBUF_LATENCY1,
            ch_bandwidth: NAND_CHANNEL_BANDWIDTH,
            pcie_bandwidth: PCIE_BANDWIDTH,
            write_buffer_size: GLOBAL_WB_SIZE / partitions as usize,
            write_early_completion: WRITE_EARLY_COMPLETION,
            partitions,
            sectors_per_block: 0,
            sectors_per_plane: 0,
            sectors_per_lun: 0,
            sectors_per_channel: 0,
            total_sectors: 0,
            pages_per_plane: 0,
            pages_per_lun: 0,
            pages_per_channel: 0,
            total_pages: 0,
            blocks_per_lun: 0,
            blocks_per_channel: 0,
            total_blocks: 0,
            planes_per_channel: 0,
            total_planes: 0,
            total_luns: 0,
            blocks_per_line: 0,
            pages_per_line: 0,
            sectors_per_line: 0,
            total_lines: 0,
        };

        sp.sectors_per_block = sp.sectors_per_page as u64 * sp.pages_per_block as u64;
        sp.sectors_per_plane = sp.sectors_per_block * sp.blocks_per_plane as u64;
        sp.sectors_per_lun = sp.sectors_per_plane * sp.planes_per_lun as u64;
        sp.sectors_per_channel = sp.sectors_per_lun * sp.luns_per_channel as u64;
        sp.total_sectors = sp.sectors_per_channel * sp.channels as u64;

        sp.pages_per_plane = sp.pages_per_block as u64 * sp.blocks_per_plane as u64;
        sp.pages_per_lun = sp.pages_per_plane * sp.planes_per_lun as u64;
        sp.pages_per_channel = sp.pages_per_lun * sp.luns_per_channel as u64;
        sp.total_pages = sp.pages_per_channel * sp.channels as u64;

        sp.blocks_per_lun = sp.blocks_per_plane as u64 * sp.planes_per_lun as u64;
        sp.blocks_per_channel = sp.blocks_per_lun * sp.luns_per_channel as u64;
        sp.total_blocks = sp.blocks_per_channel * sp.channels as u64;

        sp.planes_per_channel = sp.planes_per_lun as u64 * sp.luns_per_channel as u64;
        sp.total_planes = sp.planes_per_channel * sp.channels as u64;

        sp.total_luns = sp.luns_per_channel as u64 * sp.channels as u64;

        // A line is a super-block: one block from every LUN
        sp.blocks_per_line = sp.total_luns;
        sp.pages_per_line = sp.blocks_per_line * sp.pages_per_block as u64;
        sp.sectors_per_line = sp.pages_per_line * sp.sectors_per_page as u64;
        sp.total_lines = sp.blocks_per_lun;

        let total_size = sp.total_luns
            * sp.blocks_per_lun
            * sp.pages_per_block as u64
            * sp.sector_size as u64
            * sp.sectors_per_page as u64;
        info!(
            "Partition capacity {} MiB: chs={} luns={} lines={} blk-size={} KiB line-size={} KiB",
            total_size >> 20,
            sp.channels,
            sp.total_luns,
            sp.total_lines,
            (sp.pages_per_block * sp.page_size) >> 10,
            (sp.pages_per_line * sp.page_size as u64) >> 10,
        );

        Ok(sp)
    }

    /// Partition (FTL) index owning a logical page number.
    ///
    /// The modulo mapping is stable for any partition count; it is recorded
    /// here so tests and the write buffer route identically.
    pub fn ftl_index(&self, lpn: u64) -> u32 {
        (lpn % self.partitions as u64) as u32
    }

    /// Cell type addressed by a page index within its block
    pub fn cell_type(&self, page_in_block: u32) -> CellType {
        CellType::from_index((page_in_block / self.pages_per_oneshot_page) % self.cell_mode)
    }
}
