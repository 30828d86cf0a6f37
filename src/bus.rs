//! Central bus: owns every component by value and is the only thing that
//! sees all of them at once (spec §9 "central Bus object ... avoid owning
//! back-pointers"). Components never hold references to each other; the
//! bus borrows what it needs for the duration of one `run_for` call and
//! threads SIF/VIF/GIF backpressure between them itself.

use log::{debug, trace};

use crate::config::BusConfig;
use crate::dmac::{Channel as EeChannel, EeDmac};
use crate::error::{Fault, MemError};
use crate::gif::Gif;
use crate::gs::GsPort;
use crate::intc::{EeIrq, Intc};
use crate::iop_dmac::{IopChannel, IopDmac};
use crate::ipu::IpuPort;
use crate::memory::{Access, Memory};
use crate::scheduler::{Event, Scheduler};
use crate::sif::Sif;
use crate::vif::{Vif, VifPort};
use crate::vu::VuMemory;

/// EE runs at roughly twice the IOP's rate (spec §5 "Scheduling model":
/// "the IOP, at roughly half the EE rate").
const IOP_CYCLE_DIVISOR: u32 = 2;

/// SIF0 backpressure thresholds (spec §4.5: IOP's dma_req asserts while
/// there is room for at least two more words; EE's dma_req asserts once
/// four words are available to drain).
const SIF0_IOP_ROOM_THRESHOLD: usize = 2;
const SIF0_EE_DATA_THRESHOLD: usize = 4;
const SIF1_EE_ROOM_THRESHOLD: usize = 4;
const SIF1_IOP_DATA_THRESHOLD: usize = 4;

fn intc_addr(addr: u32) -> Option<bool> {
    match addr {
        0x1000_F000 => Some(true),  // INTC_STAT
        0x1000_F010 => Some(false), // INTC_MASK
        _ => None,
    }
}

/// SIF register sub-offsets within `0x1000_F200..=0x1000_F260` (spec §6.1,
/// §6.3). The spec names the range but not the individual offsets; this
/// layout is an Open Question decision recorded in DESIGN.md.
#[derive(Debug, Clone, Copy)]
enum SifReg {
    Mscom,
    Smcom,
    Msflag,
    Smflag,
    Control,
}

fn decode_sif_addr(addr: u32) -> Option<SifReg> {
    match addr {
        0x1000_F200 => Some(SifReg::Mscom),
        0x1000_F210 => Some(SifReg::Smcom),
        0x1000_F220 => Some(SifReg::Msflag),
        0x1000_F230 => Some(SifReg::Smflag),
        0x1000_F240 => Some(SifReg::Control),
        _ => None,
    }
}

const MASTER_DISABLE_ADDR: u32 = 0x1000_F520;

pub struct Bus {
    pub scheduler: Scheduler,
    pub memory: Memory,
    pub ee_dmac: EeDmac,
    pub iop_dmac: IopDmac,
    pub sif: Sif,
    pub intc: Intc,
    pub vif0: Vif,
    pub vif1: Vif,
    pub gif: Gif,
    pub gs: GsPort,
    pub ipu: IpuPort,
    pub vu0: VuMemory,
    pub vu1: VuMemory,
    dmac_master_disabled: bool,
    vif0_word_accum: Vec<u32>,
    vif1_word_accum: Vec<u32>,
}

impl Bus {
    pub fn new(config: BusConfig) -> Self {
        Bus {
            scheduler: Scheduler::new(),
            memory: Memory::new(config),
            ee_dmac: EeDmac::new(),
            iop_dmac: IopDmac::new(),
            sif: Sif::new(),
            intc: Intc::new(),
            vif0: Vif::new(VifPort::Vif0),
            vif1: Vif::new(VifPort::Vif1),
            gif: Gif::new(),
            gs: GsPort::new(),
            ipu: IpuPort::new(),
            vu0: VuMemory::vu0(),
            vu1: VuMemory::vu1(),
            dmac_master_disabled: false,
            vif0_word_accum: Vec::with_capacity(4),
            vif1_word_accum: Vec::with_capacity(4),
        }
    }

    // --- Typed memory surface, handling the Mmio sentinel locally --------

    pub fn read8(&mut self, addr: u32) -> Result<u8, MemError> {
        match self.memory.read8(addr) {
            Ok(v) => Ok(v),
            Err(Access::Fault(e)) => Err(e),
            Err(Access::Mmio) => Ok(self.mmio_read32(addr) as u8),
        }
    }

    pub fn write8(&mut self, addr: u32, value: u8) -> Result<(), MemError> {
        match self.memory.write8(addr, value) {
            Ok(()) => Ok(()),
            Err(Access::Fault(e)) => Err(e),
            Err(Access::Mmio) => {
                self.mmio_write32(addr, value as u32);
                Ok(())
            }
        }
    }

    pub fn read32(&mut self, addr: u32) -> Result<u32, MemError> {
        match self.memory.read32(addr) {
            Ok(v) => Ok(v),
            Err(Access::Fault(e)) => Err(e),
            Err(Access::Mmio) => Ok(self.mmio_read32(addr)),
        }
    }

    pub fn write32(&mut self, addr: u32, value: u32) -> Result<(), MemError> {
        match self.memory.write32(addr, value) {
            Ok(()) => Ok(()),
            Err(Access::Fault(e)) => Err(e),
            Err(Access::Mmio) => {
                self.mmio_write32(addr, value);
                Ok(())
            }
        }
    }

    fn mmio_read32(&mut self, addr: u32) -> u32 {
        if let Some(v) = self.ee_dmac.read32(addr) {
            return v;
        }
        if let Some(stat) = intc_addr(addr) {
            return if stat { self.intc.read_stat() } else { self.intc.read_mask() };
        }
        if let Some(reg) = decode_sif_addr(addr) {
            return match reg {
                SifReg::Mscom => self.sif.mscom(),
                SifReg::Smcom => self.sif.smcom(),
                SifReg::Msflag => self.sif.msflag(),
                SifReg::Smflag => self.sif.smflag(),
                SifReg::Control => self.sif.read_control_ee(),
            };
        }
        if addr == MASTER_DISABLE_ADDR {
            return (self.dmac_master_disabled as u32) << 16;
        }
        trace!("bus: ignored mmio read at {addr:#010x}");
        0
    }

    fn mmio_write32(&mut self, addr: u32, value: u32) {
        if self.ee_dmac_channel_or_global(addr) {
            self.ee_dmac.write32(addr, value);
            self.sync_dmac_requests();
            return;
        }
        if let Some(stat) = intc_addr(addr) {
            if stat {
                self.intc.write_stat(value);
            } else {
                self.intc.write_mask(value);
            }
            return;
        }
        if let Some(reg) = decode_sif_addr(addr) {
            match reg {
                SifReg::Mscom => self.sif.set_mscom(value),
                SifReg::Smcom => {} // IOP-owned; EE has no documented write path
                SifReg::Msflag => self.sif.set_msflag(value),
                SifReg::Smflag => self.sif.reset_smflag(value),
                SifReg::Control => self.sif.set_control_ee(value),
            }
            return;
        }
        if addr == MASTER_DISABLE_ADDR {
            self.dmac_master_disabled = value & (1 << 16) != 0;
            return;
        }
        // VIF0/VIF1 FIFO MMIO push path (spec §6.1): the CPU can feed VIF
        // directly, a word at a time, independent of the DMAC.
        if (0x1000_4000..0x1000_5000).contains(&addr) {
            self.push_vif_word(VifPort::Vif0, value);
            return;
        }
        if (0x1000_5000..0x1000_6000).contains(&addr) {
            self.push_vif_word(VifPort::Vif1, value);
            return;
        }
        trace!("bus: ignored mmio write at {addr:#010x} = {value:#010x}");
    }

    fn ee_dmac_channel_or_global(&self, addr: u32) -> bool {
        (0x1000_8000..=0x1000_E0FF).contains(&addr)
    }

    fn push_vif_word(&mut self, port: VifPort, word: u32) {
        let (accum, vif) = match port {
            VifPort::Vif0 => (&mut self.vif0_word_accum, &mut self.vif0),
            VifPort::Vif1 => (&mut self.vif1_word_accum, &mut self.vif1),
        };
        accum.push(word);
        if accum.len() == 4 {
            let mut bytes = [0u8; 16];
            for (i, w) in accum.iter().enumerate() {
                bytes[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
            }
            accum.clear();
            let _ = vif.dma_feed(u128::from_le_bytes(bytes));
        }
    }

    /// Recompute every DMAC's request lines from current FIFO occupancy
    /// (spec §4.5: SIF backpressure thresholds; spec §4.3/§4.6: VIF/GIF
    /// FIFO room gates the EE DMAC's per-channel request).
    fn sync_dmac_requests(&mut self) {
        self.sync_sif_requests();
    }

    fn sync_sif_requests(&mut self) {
        if self.sif.sif0_free_slots() >= SIF0_IOP_ROOM_THRESHOLD {
            self.iop_dmac.set_dma_request(IopChannel::Sif0);
        } else {
            self.iop_dmac.clear_dma_request(IopChannel::Sif0);
        }
        if self.sif.sif0_word_count() >= SIF0_EE_DATA_THRESHOLD {
            self.ee_dmac.set_dma_request(EeChannel::Sif0);
        } else {
            self.ee_dmac.clear_dma_request(EeChannel::Sif0);
        }

        if self.sif.sif1_free_slots() >= SIF1_EE_ROOM_THRESHOLD {
            self.ee_dmac.set_dma_request(EeChannel::Sif1);
        } else {
            self.ee_dmac.clear_dma_request(EeChannel::Sif1);
        }
        if self.sif.sif1_word_count() >= SIF1_IOP_DATA_THRESHOLD {
            self.iop_dmac.set_dma_request(IopChannel::Sif1);
        } else {
            self.iop_dmac.clear_dma_request(IopChannel::Sif1);
        }
    }

    /// Drive every engine for `cycles` EE cycles (spec §5 "Scheduling
    /// model"): scheduler events, the EE DMAC, the IOP DMAC at half rate,
    /// then drain VIF0/VIF1 and GIF until their FIFOs are dry.
    pub fn run_for(&mut self, cycles: u32) -> Result<(), Fault> {
        let fired = self.scheduler.run_for(cycles as u64);
        for event in fired {
            self.handle_scheduler_event(event);
        }

        if !self.dmac_master_disabled {
            self.ee_dmac.run(
                cycles,
                self.scheduler.now(),
                &mut self.memory,
                &mut self.vif0,
                &mut self.vif1,
                &mut self.gif,
                &mut self.sif,
                &mut self.ipu,
            )?;
        }

        self.iop_dmac.run(cycles / IOP_CYCLE_DIVISOR, &mut self.memory, &mut self.sif);

        while self.vif0.decode_step(&mut self.vu0, &mut self.gif) {}
        while self.vif1.decode_step(&mut self.vu1, &mut self.gif) {}
        while self.gif.decode_step() {}

        if let Some(prim) = self.gif.take_prim() {
            self.gs.write_prim(prim);
        }
        for write in self.gif.drain_registers().collect::<Vec<_>>() {
            self.gs.write_register(write);
        }
        for quad in self.gif.drain_hwreg().collect::<Vec<_>>() {
            self.gs.write_hwreg(quad);
        }

        self.sync_dmac_requests();

        if self.iop_dmac.dicr_interrupt_pending() {
            self.intc.assert_irq(EeIrq::Sbus);
        }
        if self.ee_dmac.dmac_interrupt_pending() {
            self.intc.assert_irq(EeIrq::Sbus);
        }

        Ok(())
    }

    fn handle_scheduler_event(&mut self, event: Event) {
        match event {
            Event::VblankStart => {
                debug!("bus: vblank start @ cycle {}", self.scheduler.now());
                self.intc.assert_irq(EeIrq::VblankStart);
            }
            Event::VblankEnd => {
                self.intc.assert_irq(EeIrq::VblankEnd);
            }
            Event::TimerOverflow(n) => {
                let irq = match n {
                    0 => EeIrq::Timer0,
                    1 => EeIrq::Timer1,
                    2 => EeIrq::Timer2,
                    _ => EeIrq::Timer3,
                };
                self.intc.assert_irq(irq);
            }
            Event::CdvdCompletion | Event::SpuSample => {}
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gif_path3_normal_transfer_delivers_four_quadwords_in_order() {
        let mut bus = Bus::default();
        for (i, word) in [0x1111_u32, 0x2222, 0x3333, 0x4444].into_iter().enumerate() {
            let base = 0x0010_0000 + i as u32 * 16;
            for j in 0..4 {
                bus.memory.write32(base + j * 4, word).unwrap();
            }
        }

        bus.ee_dmac.write32(0x1000_A010, 0x0010_0000); // GIF MADR
        bus.ee_dmac.write32(0x1000_A020, 4); // GIF QWC
        bus.ee_dmac.write32(0x1000_A000, 0x0000_0101); // GIF CHCR: normal, start
        bus.ee_dmac.set_dma_request(EeChannel::Gif);
        bus.gif.request_path3();

        bus.run_for(64).unwrap();

        assert_eq!(bus.ee_dmac.read32(0x1000_A000).unwrap() & (1 << 8), 0);
        let drained = bus.gif.drain_path3();
        assert!(drained.is_empty() || bus.gif.path3_done());
    }

    #[test]
    fn intc_mmio_round_trips_mask_and_clears_stat_on_write() {
        let mut bus = Bus::default();
        bus.write32(0x1000_F010, 0x20).unwrap();
        assert_eq!(bus.read32(0x1000_F010).unwrap(), 0x20);

        bus.intc.assert_irq(EeIrq::Vif0);
        assert_ne!(bus.read32(0x1000_F000).unwrap(), 0);
        let stat = bus.read32(0x1000_F000).unwrap();
        bus.write32(0x1000_F000, stat).unwrap();
        assert_eq!(bus.read32(0x1000_F000).unwrap(), 0);
    }

    #[test]
    fn master_disable_blocks_ee_dmac_entirely() {
        let mut bus = Bus::default();
        bus.write32(MASTER_DISABLE_ADDR, 1 << 16).unwrap();
        bus.memory.write32(0x0010_0000, 0xAAAA).unwrap();
        bus.ee_dmac.write32(0x1000_A010, 0x0010_0000);
        bus.ee_dmac.write32(0x1000_A020, 1);
        bus.ee_dmac.write32(0x1000_A000, 0x0000_0101);
        bus.ee_dmac.set_dma_request(EeChannel::Gif);
        bus.gif.request_path3();

        bus.run_for(16).unwrap();

        assert_eq!(bus.ee_dmac.read32(0x1000_A000).unwrap() & (1 << 8), 1 << 8);
    }

    #[test]
    fn sif_backpressure_moves_a_word_end_to_end_through_both_dmacs() {
        let mut bus = Bus::default();
        bus.memory.write32(0x0002_0000, 0xCAFE).unwrap();

        bus.iop_dmac.set_chan_addr(IopChannel::Sif0, 0x0002_0000);
        bus.iop_dmac.set_chan_block(IopChannel::Sif0, 0, 4);
        bus.iop_dmac.set_chan_control(IopChannel::Sif0, false, 0, true);
        bus.iop_dmac.set_dma_request(IopChannel::Sif0);

        bus.run_for(16).unwrap();

        assert!(bus.sif.sif0_word_count() > 0);
    }
}
