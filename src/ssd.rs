//! # SSD Container and Command Timer
//!
//! Owns one partition's NAND hierarchy, the host DMA model, and the write
//! buffer, and turns dispatched commands into completion timestamps. Each
//! partition's container is driven mutably by its single dispatcher thread,
//! so LUN availability and channel state need no locks; the embedded write
//! buffer stays shareable through `&self` for the FTL's admission path.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, warn};

use crate::buffer::WriteBuffer;
use crate::channel::ChannelModel;
use crate::clock::IoClock;
use crate::nand::{NandCmd, NandCmdKind, NandLun, SsdChannel};
use crate::params::{div_round_up, SsdParams};
use crate::ppa::Ppa;

/// Per-kind command counters
#[derive(Debug, Clone, Default)]
pub struct SsdStats {
    pub reads: u64,
    pub writes: u64,
    pub erases: u64,
    pub nops: u64,
}

/// One partition's emulated SSD back end
pub struct Ssd {
    params: SsdParams,
    channels: Vec<SsdChannel>,
    /// Host DMA link, shared by all channels
    pcie: ChannelModel,
    write_buffer: WriteBuffer,
    clock: Box<dyn IoClock>,
    stats: SsdStats,
}

impl Ssd {
    /// Build the NAND hierarchy, both bandwidth models, and the write
    /// buffer from a derived parameter record.
    pub fn new(params: SsdParams, clock: Box<dyn IoClock>) -> Self {
        let channels = (0..params.channels)
            .map(|_| SsdChannel::new(&params))
            .collect();
        let pcie = ChannelModel::new(params.pcie_bandwidth);
        let write_buffer = WriteBuffer::new(params.write_buffer_size, &params);
        Self {
            params,
            channels,
            pcie,
            write_buffer,
            clock,
            stats: SsdStats::default(),
        }
    }

    pub fn params(&self) -> &SsdParams {
        &self.params
    }

    /// The host write buffer; all of its operations go through `&self`
    pub fn write_buffer(&self) -> &WriteBuffer {
        &self.write_buffer
    }

    /// Read access to the NAND hierarchy
    pub fn channels(&self) -> &[SsdChannel] {
        &self.channels
    }

    /// Mutable access for the FTL's validity bookkeeping
    pub fn channels_mut(&mut self) -> &mut [SsdChannel] {
        &mut self.channels
    }

    /// Snapshot of the per-kind command counters
    pub fn stats(&self) -> SsdStats {
        self.stats.clone()
    }

    fn io_clock(&self) -> u64 {
        self.clock.now_ns()
    }

    /// The LUN addressed by a mapped PPA
    pub fn lun(&self, ppa: Ppa) -> &NandLun {
        &self.channels[ppa.channel() as usize].luns[ppa.lun() as usize]
    }

    /// Run one NAND command through the timing model and return its
    /// completion time in nanoseconds.
    ///
    /// A submit time of 0 reads the dispatcher clock; an unmapped PPA is
    /// the FTL's no-op path and returns the submit time unchanged.
    pub fn advance_nand(&mut self, cmd: &NandCmd) -> u64 {
        let stime = if cmd.stime == 0 {
            self.io_clock()
        } else {
            cmd.stime
        };

        if !cmd.ppa.is_mapped() {
            debug!("advance_nand on unmapped ppa, kind {:?}", cmd.kind);
            return stime;
        }

        debug!(
            "advance_nand {:?} {:?} xfer {} stime {}",
            cmd.kind, cmd.ppa, cmd.xfer_size, stime
        );

        let cell = cmd
            .cell_hint
            .unwrap_or_else(|| self.params.cell_type(cmd.ppa.page()));

        let Ssd {
            params,
            channels,
            pcie,
            stats,
            ..
        } = self;
        let SsdChannel { luns, model } = &mut channels[cmd.ppa.channel() as usize];
        let lun = &mut luns[cmd.ppa.lun() as usize];

        match cmd.kind {
            NandCmdKind::Read => {
                stats.reads += 1;

                // Read: NAND sensing first, then the channel drains the data
                let nand_start = lun.next_avail_time.max(stime);
                let nand_end = nand_start
                    + if cmd.xfer_size == 4096 {
                        params.pg_4kb_read_latency[cell.index()]
                    } else {
                        params.pg_read_latency[cell.index()]
                    };

                let mut chnl_start = nand_end;
                let mut chnl_end = nand_end;
                let mut completed = nand_end;
                let mut remaining = cmd.xfer_size;
                while remaining > 0 {
                    let xfer = remaining.min(params.max_ch_xfer_size as u64);
                    chnl_end = model.request(chnl_start, xfer);
                    // Host DMA of each chunk overlaps the next chunk's
                    // channel transfer
                    completed = if cmd.interleave_pci_dma {
                        pcie.request(chnl_end, xfer)
                    } else {
                        chnl_end
                    };
                    remaining -= xfer;
                    chnl_start = chnl_end;
                }

                // The die frees up when the channel is drained, not when
                // the host DMA lands
                lun.next_avail_time = chnl_end;
                completed
            }

            NandCmdKind::Write => {
                stats.writes += 1;

                // Write: channel transfer first, then the program pulse
                let chnl_start = lun.next_avail_time.max(stime);
                let chnl_end = model.request(chnl_start, cmd.xfer_size);
                let nand_end = chnl_end + params.pg_write_latency;
                lun.next_avail_time = nand_end;
                nand_end
            }

            NandCmdKind::Erase => {
                stats.erases += 1;

                let nand_start = lun.next_avail_time.max(stime);
                let nand_end = nand_start + params.blk_erase_latency;
                lun.next_avail_time = nand_end;
                nand_end
            }

            NandCmdKind::Nop => {
                stats.nops += 1;

                let now = lun.next_avail_time.max(stime);
                lun.next_avail_time = now;
                now
            }
        }
    }

    /// Serialize a host DMA transfer and return its completion time
    pub fn advance_pcie(&mut self, request_time: u64, length: u64) -> u64 {
        self.pcie.request(request_time, length)
    }

    /// Charge the firmware's write-buffer cost, then the host DMA transfer.
    ///
    /// The firmware side is the linear model `Y = A + B * X` with `X` in
    /// 4 KiB units.
    pub fn advance_write_buffer(&mut self, request_time: u64, length: u64) -> u64 {
        let mut latest = request_time;
        latest += self.params.fw_wbuf_latency0;
        latest += self.params.fw_wbuf_latency1 * div_round_up(length, 4096);
        self.advance_pcie(latest, length)
    }

    /// Earliest time every LUN is idle, no sooner than the dispatcher clock
    pub fn next_idle_time(&self) -> u64 {
        let mut latest = self.io_clock();
        for ch in self.channels.iter() {
            for lun in ch.luns.iter() {
                latest = latest.max(lun.next_avail_time);
            }
        }
        latest
    }

    /// Override one NAND latency class at run time, e.g. to model a device
    /// mode switch. Applies to this partition only; callers drive each
    /// partition's container in turn.
    pub fn set_nand_latency(&mut self, target: NandCmdKind, latency_ns: u64) {
        match target {
            NandCmdKind::Read => {
                self.params.pg_read_latency = [latency_ns; 3];
                self.params.pg_4kb_read_latency = [latency_ns; 3];
            }
            NandCmdKind::Write => self.params.pg_write_latency = latency_ns,
            NandCmdKind::Erase => self.params.blk_erase_latency = latency_ns,
            NandCmdKind::Nop => warn!("set_nand_latency has no target for NOP"),
        }
    }
}

impl core::fmt::Debug for Ssd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ssd")
            .field("channels", &self.channels.len())
            .field("luns_per_channel", &self.params.luns_per_channel)
            .field("write_buffer", &self.write_buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::params::{CellType, SSD_PARTITIONS};

    const CAPACITY: u64 = 64 * 1024 * 1024 * 1024;

    fn ssd() -> Ssd {
        let sp = SsdParams::new(CAPACITY, SSD_PARTITIONS).unwrap();
        Ssd::new(sp, Box::new(ManualClock::new(0)))
    }

    fn ch_units(ssd: &Ssd, length: u64) -> u64 {
        let model = &ssd.channels()[0].model;
        div_round_up(length, crate::channel::UNIT_XFER_SIZE as u64) * model.xfer_latency()
    }

    #[test]
    fn test_read_4kb_on_idle_lun() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);
        let xfer = ch_units(&ssd, 4096);
        let lat = ssd.params().pg_4kb_read_latency[CellType::Lsb.index()];

        let done = ssd.advance_nand(&NandCmd::read(ppa, 4096, 1_000));
        assert_eq!(done, 1_000 + lat + xfer);
        assert_eq!(ssd.lun(ppa).next_avail_time, done);
    }

    #[test]
    fn test_full_page_read_uses_page_latency_and_chunks() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);
        let flash_pg = (ssd.params().pages_per_flash_page * ssd.params().page_size) as u64;
        let lat = ssd.params().pg_read_latency[CellType::Lsb.index()];
        let xfer = ch_units(&ssd, ssd.params().max_ch_xfer_size as u64);
        let chunks = div_round_up(flash_pg, ssd.params().max_ch_xfer_size as u64);

        let done = ssd.advance_nand(&NandCmd::read(ppa, flash_pg, 1_000));
        assert_eq!(done, 1_000 + lat + chunks * xfer);
    }

    #[test]
    fn test_interleaved_read_returns_dma_completion() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);

        let mut cmd = NandCmd::read(ppa, 8192, 1_000);
        cmd.interleave_pci_dma = true;
        let done = ssd.advance_nand(&cmd);

        // The DMA tail lands after the channel drains, and the die frees
        // up at channel completion
        let chnl_end = ssd.lun(ppa).next_avail_time;
        assert!(done > chnl_end);
    }

    #[test]
    fn test_sequential_writes_serialize_on_lun() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);
        let wr = ssd.params().pg_write_latency;

        let first = ssd.advance_nand(&NandCmd::write(ppa, 4096, 1_000));
        let second = ssd.advance_nand(&NandCmd::write(ppa, 4096, 1_000));

        assert_eq!(first, 1_000 + ch_units(&ssd, 4096) + wr);
        assert!(second >= first + wr);
        assert_eq!(ssd.lun(ppa).next_avail_time, second);
    }

    #[test]
    fn test_erase_then_write_stacks() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);
        let sp = ssd.params().clone();

        let erased = ssd.advance_nand(&NandCmd::erase(ppa, 500));
        assert_eq!(erased, 500 + sp.blk_erase_latency);

        let written = ssd.advance_nand(&NandCmd::write(ppa, 4096, 600));
        assert_eq!(written, erased + ch_units(&ssd, 4096) + sp.pg_write_latency);
    }

    #[test]
    fn test_nop_inherits_availability() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);

        assert_eq!(ssd.advance_nand(&NandCmd::nop(ppa, 700)), 700);

        let written = ssd.advance_nand(&NandCmd::write(ppa, 4096, 700));
        assert_eq!(ssd.advance_nand(&NandCmd::nop(ppa, 700)), written);
    }

    #[test]
    fn test_unmapped_ppa_is_a_no_op() {
        let mut ssd = ssd();
        let before = ssd.lun(Ppa::new(0, 0, 0, 0, 0, 0)).next_avail_time;

        let done = ssd.advance_nand(&NandCmd::read(Ppa::UNMAPPED, 4096, 900));
        assert_eq!(done, 900);
        assert_eq!(ssd.lun(Ppa::new(0, 0, 0, 0, 0, 0)).next_avail_time, before);
    }

    #[test]
    fn test_zero_stime_reads_dispatcher_clock() {
        let sp = SsdParams::new(CAPACITY, SSD_PARTITIONS).unwrap();
        let mut ssd = Ssd::new(sp, Box::new(ManualClock::new(5_000)));
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);

        let done = ssd.advance_nand(&NandCmd::nop(ppa, 0));
        assert_eq!(done, 5_000);
    }

    #[test]
    fn test_lun_availability_is_monotonic() {
        let mut ssd = ssd();
        let ppa = Ppa::new(1, 1, 0, 3, 17, 0);
        let mut last = 0;
        let cmds = [
            NandCmd::write(ppa, 8192, 100),
            NandCmd::read(ppa, 4096, 50),
            NandCmd::erase(ppa, 10),
            NandCmd::nop(ppa, 1),
            NandCmd::write(ppa, 4096, 0),
        ];
        for cmd in cmds.iter() {
            ssd.advance_nand(cmd);
            let avail = ssd.lun(ppa).next_avail_time;
            assert!(avail >= last);
            last = avail;
        }
    }

    #[test]
    fn test_disjoint_luns_do_not_serialize() {
        let mut ssd = ssd();
        let a = Ppa::new(0, 0, 0, 0, 0, 0);
        let b = Ppa::new(1, 0, 0, 0, 0, 0);

        let first = ssd.advance_nand(&NandCmd::erase(a, 100));
        let second = ssd.advance_nand(&NandCmd::erase(b, 100));
        assert_eq!(first, second);
    }

    #[test]
    fn test_cell_hint_overrides_page_derivation() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0); // page 0 derives LSB

        let mut cmd = NandCmd::read(ppa, 4096, 1_000);
        cmd.cell_hint = Some(CellType::Csb);
        let done = ssd.advance_nand(&cmd);

        let lat = ssd.params().pg_4kb_read_latency[CellType::Csb.index()];
        assert_eq!(done, 1_000 + lat + ch_units(&ssd, 4096));
    }

    #[test]
    fn test_write_buffer_charge_is_linear() {
        let mut ssd = ssd();
        let sp = ssd.params().clone();

        let one = ssd.advance_write_buffer(1_000, 4096);
        let dma = div_round_up(4096, crate::channel::UNIT_XFER_SIZE as u64)
            * (crate::channel::UNIT_XFER_SIZE as u64 * 1_000_000_000
                / (sp.pcie_bandwidth * 1024 * 1024));
        assert_eq!(
            one,
            1_000 + sp.fw_wbuf_latency0 + sp.fw_wbuf_latency1 + dma
        );
    }

    #[test]
    fn test_next_idle_time_tracks_busiest_lun() {
        let mut ssd = ssd();
        assert_eq!(ssd.next_idle_time(), 0);

        let done = ssd.advance_nand(&NandCmd::erase(Ppa::new(0, 1, 0, 0, 0, 0), 100));
        assert_eq!(ssd.next_idle_time(), done);
    }

    #[test]
    fn test_latency_override() {
        let mut ssd = ssd();
        ssd.set_nand_latency(NandCmdKind::Erase, 7);

        let done = ssd.advance_nand(&NandCmd::erase(Ppa::new(0, 0, 0, 0, 0, 0), 100));
        assert_eq!(done, 107);
    }

    #[test]
    fn test_stats_count_commands() {
        let mut ssd = ssd();
        let ppa = Ppa::new(0, 0, 0, 0, 0, 0);
        ssd.advance_nand(&NandCmd::read(ppa, 4096, 1));
        ssd.advance_nand(&NandCmd::write(ppa, 4096, 1));
        ssd.advance_nand(&NandCmd::nop(ppa, 1));

        let stats = ssd.stats();
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.nops, 1);
        assert_eq!(stats.erases, 0);
    }
}
