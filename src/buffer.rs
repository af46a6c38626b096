//! # Host Write Buffer
//!
//! Partitioned staging area that coalesces host writes into flash-page-sized
//! slots before the FTL programs them to NAND. Slots live in an arena for
//! the life of the buffer; `free_slots`/`used_slots` are index lists, so no
//! allocation happens on the admission path. A single spin lock protects the
//! lists, the slots, and their pages.
//!
//! The buffer is the partition-aware single-buffer variant: one instance can
//! serve every partition, routing internally by the parameter record's
//! partition mapping while drawing free slots from a shared pool. Deploying
//! one instance per partition (what [`crate::ssd::Ssd`] does) has identical
//! semantics.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use log::{debug, warn};
use spin::Mutex;

use crate::params::{div_round_up, SsdParams, NAND_CHANNELS};

/// Sentinel for a page that stages no logical page
pub const INVALID_LPN: u64 = u64::MAX;

const MAX_PARTITIONS: usize = NAND_CHANNELS as usize;

/// Result type for buffer operations
pub type BufferResult<T> = Result<T, BufferError>;

/// Write buffer error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// No capacity for the requested range; nothing was mutated
    TransientFull,
    /// Operation applied to a slot not in the required state
    InvalidState,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::TransientFull => write!(f, "Write buffer is full"),
            BufferError::InvalidState => write!(f, "Slot is not in the required state"),
        }
    }
}

/// Stable handle into the slot arena
pub type SlotId = usize;

/// Lifecycle state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Accepting fills, or waiting to be picked for flush
    Valid,
    /// Handed to the FTL for programming; frozen until released
    Flushing,
}

/// One staged 4 KiB logical page and its sector-dirty bitmap
#[derive(Debug, Clone)]
pub struct BufferPage {
    lpn: u64,
    free_sectors: u32,
    sectors: Vec<bool>,
}

impl BufferPage {
    fn new(sectors_per_page: usize) -> Self {
        Self {
            lpn: INVALID_LPN,
            free_sectors: sectors_per_page as u32,
            sectors: alloc::vec![false; sectors_per_page],
        }
    }

    /// Logical page number staged here, or [`INVALID_LPN`]
    pub fn lpn(&self) -> u64 {
        self.lpn
    }

    /// Sectors not yet written
    pub fn free_sectors(&self) -> u32 {
        self.free_sectors
    }

    /// Per-sector dirty bitmap
    pub fn sectors(&self) -> &[bool] {
        &self.sectors
    }

    /// Whether every sector has been written
    pub fn is_full(&self) -> bool {
        self.free_sectors == 0
    }

    fn reset(&mut self) {
        self.lpn = INVALID_LPN;
        self.free_sectors = self.sectors.len() as u32;
        for sec in self.sectors.iter_mut() {
            *sec = false;
        }
    }

    fn mark_sectors(&mut self, offset: usize, count: usize) {
        debug_assert!(offset + count <= self.sectors.len());
        for idx in offset..offset + count {
            if !self.sectors[idx] {
                self.sectors[idx] = true;
                self.free_sectors -= 1;
            }
        }
    }
}

/// One flash-page-sized staging slot
#[derive(Debug)]
struct Slot {
    status: SlotStatus,
    /// Program completion stamp while flushing, 0 otherwise
    complete_time: u64,
    /// Partition owning every page staged here
    ftl_idx: Option<u32>,
    /// Pages assigned so far
    fill_cursor: usize,
    pages: Vec<BufferPage>,
}

impl Slot {
    fn new(pages_per_slot: usize, sectors_per_page: usize) -> Self {
        Self {
            status: SlotStatus::Valid,
            complete_time: 0,
            ftl_idx: None,
            fill_cursor: 0,
            pages: (0..pages_per_slot)
                .map(|_| BufferPage::new(sectors_per_page))
                .collect(),
        }
    }

    fn has_room(&self) -> bool {
        self.fill_cursor < self.pages.len()
    }

    fn reset(&mut self) {
        for page in self.pages[..self.fill_cursor].iter_mut() {
            page.reset();
        }
        self.status = SlotStatus::Valid;
        self.complete_time = 0;
        self.ftl_idx = None;
        self.fill_cursor = 0;
    }
}

/// Operation counters
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    /// Completed allocations
    pub allocations: u64,
    /// Allocations refused for lack of capacity
    pub rejected_allocations: u64,
    /// Slots handed to the FTL for flushing
    pub flushes_marked: u64,
    /// Slots reclaimed by `release`
    pub slots_released: u64,
    /// Emergency reclaims
    pub refills: u64,
}

#[derive(Debug)]
struct BufferInner {
    slots: Vec<Slot>,
    free_slots: VecDeque<SlotId>,
    used_slots: VecDeque<SlotId>,
    free_page_count: usize,
    stats: BufferStats,
}

impl BufferInner {
    /// Locate a staged page by LPN among valid used slots
    fn find_page(&self, lpn: u64) -> Option<(SlotId, usize)> {
        for &sid in self.used_slots.iter() {
            let slot = &self.slots[sid];
            if slot.status != SlotStatus::Valid {
                continue;
            }
            for (pi, page) in slot.pages[..slot.fill_cursor].iter().enumerate() {
                if page.lpn == lpn {
                    return Some((sid, pi));
                }
            }
        }
        None
    }

    /// Locate a valid used slot of the given partition with an unassigned page
    fn find_open_slot(&self, ftl_idx: u32) -> Option<SlotId> {
        self.used_slots.iter().copied().find(|&sid| {
            let slot = &self.slots[sid];
            slot.status == SlotStatus::Valid && slot.ftl_idx == Some(ftl_idx) && slot.has_room()
        })
    }
}

/// Partitioned pool of flash-page-sized staging slots
pub struct WriteBuffer {
    /// Total buffer size in bytes
    size: usize,
    /// Bytes per slot (one flash page)
    slot_size: usize,
    slots_per_buffer: usize,
    pages_per_slot: usize,
    sectors_per_page: usize,
    sector_size: usize,
    page_size: usize,
    partitions: u32,
    /// Used-slot count at which the FTL should start draining
    flush_threshold: usize,
    inner: Mutex<BufferInner>,
}

impl WriteBuffer {
    /// Build a buffer of `size` bytes; the slot count is derived from the
    /// flash page size in the parameter record.
    pub fn new(size: usize, sp: &SsdParams) -> Self {
        let slot_size = (sp.pages_per_flash_page * sp.page_size) as usize;
        let slots_per_buffer = size / slot_size;
        let pages_per_slot = sp.pages_per_flash_page as usize;
        let sectors_per_page = sp.sectors_per_page as usize;

        let slots = (0..slots_per_buffer)
            .map(|_| Slot::new(pages_per_slot, sectors_per_page))
            .collect();
        let free_slots: VecDeque<SlotId> = (0..slots_per_buffer).collect();

        Self {
            size,
            slot_size,
            slots_per_buffer,
            pages_per_slot,
            sectors_per_page,
            sector_size: sp.sector_size as usize,
            page_size: sp.page_size as usize,
            partitions: sp.partitions,
            flush_threshold: slots_per_buffer / 2,
            inner: Mutex::new(BufferInner {
                slots,
                free_slots,
                used_slots: VecDeque::with_capacity(slots_per_buffer),
                free_page_count: slots_per_buffer * pages_per_slot,
                stats: BufferStats::default(),
            }),
        }
    }

    fn partition_of(&self, lpn: u64) -> u32 {
        (lpn % self.partitions as u64) as u32
    }

    /// Per-partition page demand of an LPN range, satisfiable from that
    /// partition's leftover slot capacity topped up by the shared free pool.
    fn admissible(&self, inner: &BufferInner, start_lpn: u64, end_lpn: u64) -> bool {
        let mut demand = [0usize; MAX_PARTITIONS];
        for lpn in start_lpn..=end_lpn {
            if inner.find_page(lpn).is_none() {
                demand[self.partition_of(lpn) as usize] += 1;
            }
        }

        let mut leftover = [0usize; MAX_PARTITIONS];
        for &sid in inner.used_slots.iter() {
            let slot = &inner.slots[sid];
            if slot.status != SlotStatus::Valid {
                continue;
            }
            if let Some(ftl_idx) = slot.ftl_idx {
                leftover[ftl_idx as usize] += self.pages_per_slot - slot.fill_cursor;
            }
        }

        let mut free_needed = 0usize;
        for part in 0..self.partitions as usize {
            let shortfall = demand[part].saturating_sub(leftover[part]);
            free_needed += div_round_up(shortfall as u64, self.pages_per_slot as u64) as usize;
        }
        free_needed <= inner.free_slots.len()
    }

    /// Whether the LPN range can be admitted right now. Pure inspection;
    /// capacity may be taken by a racing admit, so [`WriteBuffer::allocate`]
    /// re-verifies under its own lock.
    pub fn allocatable(
        &self,
        start_lpn: u64,
        end_lpn: u64,
        _start_offset: u32,
        size: u64,
    ) -> bool {
        if size == 0 {
            return true;
        }
        debug_assert!(start_lpn <= end_lpn);
        let inner = self.inner.lock();
        self.admissible(&inner, start_lpn, end_lpn)
    }

    /// Stage a host write covering `size` bytes of the LPN range, starting
    /// `start_offset` sectors into the first page.
    ///
    /// Admissibility is re-checked under the lock; on `TransientFull`
    /// exactly nothing was mutated and the FTL should retry after flushing.
    pub fn allocate(
        &self,
        start_lpn: u64,
        end_lpn: u64,
        start_offset: u32,
        size: u64,
    ) -> BufferResult<()> {
        if size == 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if !self.admissible(&inner, start_lpn, end_lpn) {
            inner.stats.rejected_allocations += 1;
            debug!(
                "write buffer full: lpn {}..={} refused",
                start_lpn, end_lpn
            );
            return Err(BufferError::TransientFull);
        }

        // First page: from start_offset to the end of the page (or less)
        let first_size =
            ((self.sectors_per_page as u64 - start_offset as u64) * self.sector_size as u64)
                .min(size);
        self.fill_page(&mut inner, start_lpn, first_size, start_offset as usize);

        let mut lpn = start_lpn + 1;
        let mut remaining = size - first_size;
        while remaining > self.page_size as u64 {
            self.fill_page(&mut inner, lpn, self.page_size as u64, 0);
            lpn += 1;
            remaining -= self.page_size as u64;
        }
        // Last page: the residual; a no-op when the range is already covered
        self.fill_page(&mut inner, lpn, remaining, 0);

        inner.stats.allocations += 1;
        Ok(())
    }

    /// Stage `size` bytes into the page holding `lpn`, creating it if needed
    fn fill_page(&self, inner: &mut BufferInner, lpn: u64, size: u64, offset: usize) {
        if size == 0 {
            return;
        }

        let (sid, pi) = match inner.find_page(lpn) {
            Some(found) => found,
            None => {
                let ftl_idx = self.partition_of(lpn);
                let sid = match inner.find_open_slot(ftl_idx) {
                    Some(sid) => sid,
                    None => {
                        // Admission check guarantees the free list is non-empty
                        let Some(sid) = inner.free_slots.pop_front() else {
                            warn!("write buffer fill found no free slot for lpn {}", lpn);
                            return;
                        };
                        inner.used_slots.push_back(sid);
                        inner.slots[sid].ftl_idx = Some(ftl_idx);
                        sid
                    }
                };
                debug_assert_eq!(inner.slots[sid].ftl_idx, Some(ftl_idx));
                let slot = &mut inner.slots[sid];
                let pi = slot.fill_cursor;
                slot.fill_cursor += 1;
                inner.free_page_count -= 1;
                (sid, pi)
            }
        };

        let page = &mut inner.slots[sid].pages[pi];
        page.lpn = lpn;
        page.mark_sectors(offset, (size / self.sector_size as u64) as usize);
    }

    /// Freeze a valid used slot for flushing, stamping it with the program
    /// completion time the FTL obtained from the command timer.
    pub fn mark_for_flush(&self, slot: SlotId, complete_time: u64) -> BufferResult<()> {
        let mut inner = self.inner.lock();
        let eligible = inner
            .slots
            .get(slot)
            .map(|s| s.status == SlotStatus::Valid && s.fill_cursor > 0)
            .unwrap_or(false);
        if !eligible {
            warn!("mark_for_flush on slot {} not in valid used state", slot);
            return Err(BufferError::InvalidState);
        }
        let s = &mut inner.slots[slot];
        s.status = SlotStatus::Flushing;
        s.complete_time = complete_time;
        inner.stats.flushes_marked += 1;
        Ok(())
    }

    /// Reclaim every flushing slot stamped with `complete_time`.
    ///
    /// Returns whether any slot was reclaimed. A stamp that matches nothing
    /// while flushing slots exist is logged and otherwise ignored.
    pub fn release(&self, complete_time: u64) -> bool {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let mut reclaimed = 0u64;
        let mut other_flushing = 0usize;

        let mut i = 0;
        while i < inner.used_slots.len() {
            let sid = inner.used_slots[i];
            let matches = {
                let slot = &inner.slots[sid];
                slot.status == SlotStatus::Flushing && slot.complete_time == complete_time
            };
            if matches {
                inner.free_page_count += inner.slots[sid].fill_cursor;
                inner.slots[sid].reset();
                inner.used_slots.remove(i);
                inner.free_slots.push_back(sid);
                reclaimed += 1;
            } else {
                if inner.slots[sid].status == SlotStatus::Flushing {
                    other_flushing += 1;
                }
                i += 1;
            }
        }

        if reclaimed == 0 && other_flushing > 0 {
            warn!(
                "release({}) matched no slot while {} slots are flushing",
                complete_time, other_flushing
            );
        }
        inner.stats.slots_released += reclaimed;
        reclaimed > 0
    }

    /// Emergency reclaim: move every used slot back to the free list
    /// regardless of status or stamp. Used at teardown and reset.
    pub fn refill(&self) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        while let Some(sid) = inner.used_slots.pop_front() {
            inner.free_page_count += inner.slots[sid].fill_cursor;
            inner.slots[sid].reset();
            inner.free_slots.push_back(sid);
        }
        inner.stats.refills += 1;
    }

    /// Read-path hook: snapshot of the staged page holding `lpn`, if any
    pub fn search(&self, lpn: u64) -> Option<BufferPage> {
        let inner = self.inner.lock();
        inner
            .find_page(lpn)
            .map(|(sid, pi)| inner.slots[sid].pages[pi].clone())
    }

    /// Valid used slots in fill order, oldest first; what the FTL walks
    /// when the used count crosses the flush threshold.
    pub fn flush_candidates(&self) -> Vec<SlotId> {
        let inner = self.inner.lock();
        inner
            .used_slots
            .iter()
            .copied()
            .filter(|&sid| inner.slots[sid].status == SlotStatus::Valid)
            .collect()
    }

    /// Whether the used count has crossed the flush threshold
    pub fn needs_flush(&self) -> bool {
        self.inner.lock().used_slots.len() >= self.flush_threshold
    }

    /// Snapshot of a slot's filled pages, for the FTL to program out
    pub fn slot_pages(&self, slot: SlotId) -> Option<Vec<BufferPage>> {
        let inner = self.inner.lock();
        inner
            .slots
            .get(slot)
            .map(|s| s.pages[..s.fill_cursor].to_vec())
    }

    /// Current status of a slot
    pub fn slot_status(&self, slot: SlotId) -> Option<SlotStatus> {
        self.inner.lock().slots.get(slot).map(|s| s.status)
    }

    /// Partition owning a slot's pages, while it has any
    pub fn slot_partition(&self, slot: SlotId) -> Option<u32> {
        self.inner.lock().slots.get(slot).and_then(|s| s.ftl_idx)
    }

    /// Total buffer size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes per slot
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn slots_per_buffer(&self) -> usize {
        self.slots_per_buffer
    }

    pub fn pages_per_slot(&self) -> usize {
        self.pages_per_slot
    }

    pub fn sectors_per_page(&self) -> usize {
        self.sectors_per_page
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    pub fn free_slot_count(&self) -> usize {
        self.inner.lock().free_slots.len()
    }

    pub fn used_slot_count(&self) -> usize {
        self.inner.lock().used_slots.len()
    }

    /// Pages not yet assigned across the whole buffer
    pub fn free_page_count(&self) -> usize {
        self.inner.lock().free_page_count
    }

    /// Snapshot of the operation counters
    pub fn stats(&self) -> BufferStats {
        self.inner.lock().stats.clone()
    }
}

impl fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WriteBuffer")
            .field("slots_per_buffer", &self.slots_per_buffer)
            .field("pages_per_slot", &self.pages_per_slot)
            .field("free_slots", &inner.free_slots.len())
            .field("used_slots", &inner.used_slots.len())
            .finish()
    }
}
