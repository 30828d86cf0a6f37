//! IOP DMAC: thirteen-channel priority-selected word mover feeding CDVD,
//! SPU/SPU2, SIF0/SIF1 and SIO2 (spec §4.4), grounded in DobieStation's
//! `IOP_DMA` class (`src/core/iop/iop_dma.cpp`).
//!
//! Channel indices follow the hardware enum exactly (`IOP_DMA_CHANNELS` in
//! `iop_dma.hpp`) so that "by channel index" arbitration reads the same way
//! it does in the original: MDECin/MDECout/GPU/PIO/OTC and the unused slot
//! at index 7 are modeled as inert — present in the array so index 9-13
//! line up, never eligible since no DMA request ever latches them (spec
//! §4.4: "others unused in this core").

use crate::fifo::Fifo;
use crate::memory::Memory;
use crate::sif::Sif;

const CHANNEL_COUNT: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IopChannel {
    Cdvd = 3,
    Spu = 4,
    Spu2 = 8,
    Sif0 = 10,
    Sif1 = 11,
    Sio2In = 12,
    Sio2Out = 13,
}

impl IopChannel {
    pub const ALL: [IopChannel; 7] = [
        IopChannel::Cdvd,
        IopChannel::Spu,
        IopChannel::Spu2,
        IopChannel::Sif0,
        IopChannel::Sif1,
        IopChannel::Sio2In,
        IopChannel::Sio2Out,
    ];
}

/// The drive/mixer/serial peripherals behind CDVD, SPU(2) and SIO2 are all
/// named out of scope (spec §1). Each gets the same narrow gated-FIFO
/// surface IPU uses on the EE side: the (external, unmodeled) device reads
/// `from_ram` and fills `to_ram`, the DMAC channel drains/feeds through
/// those two queues at whatever pace its channel logic allows.
pub struct DevicePort {
    to_ram: Fifo<u32>,
    from_ram: Fifo<u32>,
}

impl DevicePort {
    pub fn new(depth: usize) -> Self {
        DevicePort { to_ram: Fifo::new(depth), from_ram: Fifo::new(depth) }
    }

    #[must_use]
    pub fn push_to_ram(&mut self, word: u32) -> bool {
        self.to_ram.push(word)
    }

    pub fn pop_from_ram(&mut self) -> Option<u32> {
        self.from_ram.pop()
    }
}

impl Default for DevicePort {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A byte-serial peripheral port for SIO2 (pad/memcard serial I/O is out of
/// scope; this is the gate the DMAC pushes/pulls through).
#[derive(Debug, Clone, Default)]
pub struct SerialPort {
    written: Vec<u8>,
    to_read: std::collections::VecDeque<u8>,
}

impl SerialPort {
    pub fn write_serial(&mut self, byte: u8) {
        self.written.push(byte);
    }

    pub fn read_serial(&mut self) -> u8 {
        self.to_read.pop_front().unwrap_or(0)
    }

    pub fn feed_read_bytes(&mut self, bytes: &[u8]) {
        self.to_read.extend(bytes.iter().copied());
    }

    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChanControl {
    direction_from: bool,
    sync_mode: u8,
    busy: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    addr: u32,
    word_count: u32,
    block_size: u16,
    size: u32,
    control: ChanControl,
    tag_addr: u32,
    tag_end: bool,
    dma_req: bool,
    delay: i32,
    junk_words: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct Dpcr {
    priorities: [u8; CHANNEL_COUNT],
    enable: [bool; CHANNEL_COUNT],
}

#[derive(Debug, Clone, Copy, Default)]
struct Dicr {
    force_irq: [bool; 2],
    stat: [u8; 2],
    mask: [u8; 2],
    master_enable: [bool; 2],
}

pub struct IopDmac {
    channels: [Channel; CHANNEL_COUNT],
    active: Option<usize>,
    dpcr: Dpcr,
    dicr: Dicr,
    pub cdvd: DevicePort,
    pub spu: DevicePort,
    pub spu2: DevicePort,
    pub sio2: SerialPort,
}

impl IopDmac {
    pub fn new() -> Self {
        IopDmac {
            channels: [Channel::default(); CHANNEL_COUNT],
            active: None,
            dpcr: Dpcr::default(),
            dicr: Dicr::default(),
            cdvd: DevicePort::new(256),
            spu: DevicePort::new(256),
            spu2: DevicePort::new(256),
            sio2: SerialPort::default(),
        }
    }

    fn eligible(&self, idx: usize) -> bool {
        self.channels[idx].dma_req && self.channels[idx].control.busy
    }

    /// Recompute the active channel: highest hardware index among eligible
    /// channels wins outright (spec §4.4 "if a request arrives while the
    /// currently active channel has a lower hardware index, push [...] and
    /// take over"), grounded in `active_dma_check`/`find_new_active_channel`.
    fn arbitrate(&mut self) {
        self.active = (0..CHANNEL_COUNT).rev().find(|&i| self.eligible(i));
    }

    pub fn set_dma_request(&mut self, ch: IopChannel) {
        self.channels[ch as usize].dma_req = true;
        self.arbitrate();
    }

    pub fn clear_dma_request(&mut self, ch: IopChannel) {
        self.channels[ch as usize].dma_req = false;
        self.arbitrate();
    }

    fn transfer_end(&mut self, idx: usize) {
        self.channels[idx].control.busy = false;
        self.channels[idx].tag_end = false;
        self.arbitrate();

        let bank = usize::from(idx > 7);
        let bit = if bank == 1 { idx - 8 } else { idx };
        if self.dicr.mask[bank] & (1 << bit) != 0 {
            self.dicr.stat[bank] |= 1 << bit;
        }
    }

    pub fn dicr_interrupt_pending(&self) -> bool {
        (0..2).any(|bank| {
            self.dicr.master_enable[bank] && (self.dicr.mask[bank] & self.dicr.stat[bank]) != 0
        })
    }

    /// Serve the single active channel until its word count or a stall
    /// empties it, then re-arbitrate (spec §4.4: "always serving the single
    /// active channel ... then re-arbitrates").
    pub fn run(&mut self, cycles: u32, ram: &mut Memory, sif: &mut Sif) {
        let mut budget = cycles;
        while budget > 0 {
            let Some(idx) = self.active else { break };
            let progressed = match index_to_channel(idx) {
                Some(IopChannel::Cdvd) => self.step_cdvd(ram),
                Some(IopChannel::Spu) => self.step_block(IopChannel::Spu, ram),
                Some(IopChannel::Spu2) => self.step_block(IopChannel::Spu2, ram),
                Some(IopChannel::Sif0) => self.step_sif0(ram, sif),
                Some(IopChannel::Sif1) => self.step_sif1(ram, sif),
                Some(IopChannel::Sio2In) => self.step_sio2_in(ram),
                Some(IopChannel::Sio2Out) => self.step_sio2_out(ram),
                None => false,
            };
            if !progressed {
                break;
            }
            budget -= 1;
        }
    }

    fn step_cdvd(&mut self, ram: &mut Memory) -> bool {
        let idx = IopChannel::Cdvd as usize;
        if self.channels[idx].word_count == 0 {
            return false;
        }
        let Some(word) = self.cdvd.to_ram.pop() else { return false };
        let addr = self.channels[idx].addr;
        let _ = ram.write32(addr, word);
        self.channels[idx].addr = addr.wrapping_add(4);
        self.channels[idx].word_count -= 1;
        if self.channels[idx].word_count == 0 {
            self.transfer_end(idx);
        }
        true
    }

    /// Shared SPU/SPU2 transfer step: bidirectional per `direction_from`,
    /// paced by a 3-cycle inter-word delay (spec §4.4, `process_SPU`).
    fn step_block(&mut self, which: IopChannel, ram: &mut Memory) -> bool {
        let idx = which as usize;
        if self.channels[idx].size == 0 {
            return false;
        }
        if self.channels[idx].delay > 0 {
            self.channels[idx].delay -= 1;
            return true;
        }
        let write_to_device = self.channels[idx].control.direction_from;
        let addr = self.channels[idx].addr;
        let port = if matches!(which, IopChannel::Spu) { &mut self.spu } else { &mut self.spu2 };
        if write_to_device {
            let value = ram.read32(addr).unwrap_or(0);
            if !port.from_ram.push(value) {
                return false;
            }
        } else {
            let Some(value) = port.to_ram.pop() else { return false };
            let _ = ram.write32(addr, value);
        }
        self.channels[idx].addr = addr.wrapping_add(4);
        self.channels[idx].size -= 1;
        self.channels[idx].delay = 3;
        if self.channels[idx].size == 0 {
            self.channels[idx].word_count = 0;
            self.transfer_end(idx);
        }
        true
    }

    /// IOP→EE: read words from IOP RAM into SIF0, prefixed with a SIF0
    /// DMAtag once the current block is drained (spec §4.4, §4.5, grounded
    /// in `process_SIF0`).
    fn step_sif0(&mut self, ram: &mut Memory, sif: &mut Sif) -> bool {
        let idx = IopChannel::Sif0 as usize;
        if self.channels[idx].word_count > 0 {
            let addr = self.channels[idx].addr;
            let Ok(data) = ram.read32(addr) else { return false };
            if !sif.write_sif0(data) {
                return false;
            }
            self.channels[idx].addr = addr.wrapping_add(4);
            self.channels[idx].word_count -= 1;
            if self.channels[idx].word_count == 0 {
                sif.send_sif0_junk(self.channels[idx].junk_words);
                if self.channels[idx].tag_end {
                    self.transfer_end(idx);
                }
            }
            true
        } else if sif.sif0_free_slots() >= 2 {
            let tag_addr = self.channels[idx].tag_addr;
            let Ok(data) = ram.read32(tag_addr) else { return false };
            let Ok(words) = ram.read32(tag_addr.wrapping_add(4)) else { return false };
            let Ok(ee_tag_lo) = ram.read32(tag_addr.wrapping_add(8)) else { return false };
            let Ok(ee_tag_hi) = ram.read32(tag_addr.wrapping_add(12)) else { return false };
            if !sif.write_sif0(ee_tag_lo) || !sif.write_sif0(ee_tag_hi) {
                return false;
            }

            self.channels[idx].addr = data & 0x00FF_FFFF;
            self.channels[idx].word_count = words & 0xF_FFFF;
            self.channels[idx].junk_words = if words & 0x3 != 0 { (4 - (words & 0x3)) as u8 } else { 0 };
            self.channels[idx].tag_addr = tag_addr.wrapping_add(16);
            if data & (1 << 31) != 0 || data & (1 << 30) != 0 {
                self.channels[idx].tag_end = true;
            }
            true
        } else {
            false
        }
    }

    /// EE→IOP: drain SIF1 into IOP RAM, receiving an IOP-side DMAtag first
    /// (spec §4.4, grounded in `process_SIF1`).
    fn step_sif1(&mut self, ram: &mut Memory, sif: &mut Sif) -> bool {
        let idx = IopChannel::Sif1 as usize;
        if self.channels[idx].word_count > 0 {
            let Some(data) = sif.read_sif1_word() else { return false };
            let addr = self.channels[idx].addr;
            let _ = ram.write32(addr, data);
            self.channels[idx].addr = addr.wrapping_add(4);
            self.channels[idx].word_count -= 1;
            if self.channels[idx].word_count == 0 && self.channels[idx].tag_end {
                self.transfer_end(idx);
            }
            true
        } else if sif.sif1_word_count() >= 4 {
            let data = sif.read_sif1_word().expect("size checked above");
            let words = sif.read_sif1_word().expect("size checked above");
            let _ee_tag = (
                sif.read_sif1_word().expect("size checked above"),
                sif.read_sif1_word().expect("size checked above"),
            );
            self.channels[idx].addr = data & 0x00FF_FFFF;
            self.channels[idx].word_count = words & 0xF_FFFC;
            if data & (1 << 31) != 0 || data & (1 << 30) != 0 {
                self.channels[idx].tag_end = true;
            }
            true
        } else {
            false
        }
    }

    /// SIO2-in/out transfer their whole block in a single step — real
    /// hardware has no mid-transfer yield point here (grounded in
    /// `process_SIO2in`/`process_SIO2out`).
    fn step_sio2_in(&mut self, ram: &mut Memory) -> bool {
        let idx = IopChannel::Sio2In as usize;
        let mut size = self.channels[idx].word_count * self.channels[idx].block_size as u32 * 4;
        if size == 0 {
            return false;
        }
        let mut addr = self.channels[idx].addr;
        while size > 0 {
            let byte = ram.read8(addr).unwrap_or(0);
            self.sio2.write_serial(byte);
            addr = addr.wrapping_add(1);
            size -= 1;
        }
        self.channels[idx].addr = addr;
        self.channels[idx].word_count = 0;
        self.transfer_end(idx);
        true
    }

    fn step_sio2_out(&mut self, ram: &mut Memory) -> bool {
        let idx = IopChannel::Sio2Out as usize;
        let mut size = self.channels[idx].word_count * self.channels[idx].block_size as u32 * 4;
        if size == 0 {
            return false;
        }
        let mut addr = self.channels[idx].addr;
        while size > 0 {
            let byte = self.sio2.read_serial();
            let _ = ram.write8(addr, byte);
            addr = addr.wrapping_add(1);
            size -= 1;
        }
        self.channels[idx].addr = addr;
        self.channels[idx].word_count = 0;
        self.transfer_end(idx);
        true
    }

    // --- Programmatic register surface (spec §4.4's public API; this core
    // has no documented IOP-side physical address map, spec §1 "I/O
    // register maps of individual peripherals" out of scope) -------------

    pub fn set_chan_addr(&mut self, ch: IopChannel, value: u32) {
        self.channels[ch as usize].addr = value;
    }

    pub fn chan_addr(&self, ch: IopChannel) -> u32 {
        self.channels[ch as usize].addr
    }

    pub fn set_chan_block(&mut self, ch: IopChannel, block_size: u16, word_count: u32) {
        let c = &mut self.channels[ch as usize];
        c.block_size = block_size;
        c.word_count = word_count;
        c.size = block_size as u32 * word_count;
    }

    pub fn set_chan_tag_addr(&mut self, ch: IopChannel, value: u32) {
        self.channels[ch as usize].tag_addr = value;
    }

    /// Start/stop a channel via its control-register busy bit (spec §4.4,
    /// `set_chan_control`). Rising edge re-arbitrates and, for SPU(2),
    /// arms the inter-word delay.
    pub fn set_chan_control(&mut self, ch: IopChannel, direction_from: bool, sync_mode: u8, busy: bool) {
        let idx = ch as usize;
        let was_busy = self.channels[idx].control.busy;
        self.channels[idx].control = ChanControl { direction_from, sync_mode, busy };
        if !was_busy && busy {
            if matches!(ch, IopChannel::Spu | IopChannel::Spu2) {
                self.channels[idx].delay = 3;
            }
            self.arbitrate();
        } else if was_busy && !busy {
            self.arbitrate();
        }
    }

    pub fn chan_busy(&self, ch: IopChannel) -> bool {
        self.channels[ch as usize].control.busy
    }

    pub fn active_channel(&self) -> Option<IopChannel> {
        self.active.and_then(index_to_channel)
    }

    pub fn set_dicr_mask(&mut self, bank: usize, mask: u8, master_enable: bool) {
        self.dicr.mask[bank] = mask;
        self.dicr.master_enable[bank] = master_enable;
    }

    pub fn ack_dicr_stat(&mut self, bank: usize, ack: u8) {
        self.dicr.stat[bank] &= !ack;
    }

    pub fn set_dpcr_priority(&mut self, ch: IopChannel, priority: u8, enable: bool) {
        let idx = ch as usize;
        self.dpcr.priorities[idx] = priority;
        self.dpcr.enable[idx] = enable;
    }
}

impl Default for IopDmac {
    fn default() -> Self {
        Self::new()
    }
}

fn index_to_channel(idx: usize) -> Option<IopChannel> {
    IopChannel::ALL.into_iter().find(|&c| c as usize == idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    fn dmac_with_memory() -> (IopDmac, Memory, Sif) {
        (IopDmac::new(), Memory::new(BusConfig::default()), Sif::new())
    }

    #[test]
    fn higher_index_channel_preempts_lower_on_request() {
        let (mut dmac, _mem, _sif) = dmac_with_memory();
        dmac.set_chan_block(IopChannel::Spu, 1, 4);
        dmac.set_chan_control(IopChannel::Spu, false, 0, true);
        dmac.set_dma_request(IopChannel::Spu);
        assert_eq!(dmac.active_channel(), Some(IopChannel::Spu));

        dmac.set_chan_block(IopChannel::Sif0, 0, 0);
        dmac.set_chan_control(IopChannel::Sif0, false, 0, true);
        dmac.set_dma_request(IopChannel::Sif0);
        assert_eq!(dmac.active_channel(), Some(IopChannel::Sif0));
    }

    #[test]
    fn sif0_transfers_five_words_then_idles_without_aligned_tag() {
        let (mut dmac, mut mem, mut sif) = dmac_with_memory();
        mem.write32(0x1000, 0xA).unwrap();
        mem.write32(0x1004, 0xB).unwrap();
        mem.write32(0x1008, 0xC).unwrap();
        mem.write32(0x100C, 0xD).unwrap();
        mem.write32(0x1010, 0xE).unwrap();

        dmac.set_chan_addr(IopChannel::Sif0, 0x1000);
        dmac.set_chan_block(IopChannel::Sif0, 0, 5);
        dmac.set_chan_control(IopChannel::Sif0, false, 0, true);
        dmac.channels[IopChannel::Sif0 as usize].junk_words = 3;
        dmac.set_dma_request(IopChannel::Sif0);

        dmac.run(5, &mut mem, &mut sif);

        let mut drained = Vec::new();
        while let Some(w) = sif.read_sif0_word() {
            drained.push(w);
        }
        assert_eq!(drained, vec![0xA, 0xB, 0xC, 0xD, 0xE, 0xA, 0xA, 0xA]);
    }

    #[test]
    fn sio2_out_drains_whole_block_in_one_call() {
        let (mut dmac, mut mem, mut sif) = dmac_with_memory();
        dmac.sio2.feed_read_bytes(&[1, 2, 3, 4]);
        dmac.set_chan_addr(IopChannel::Sio2Out, 0x2000);
        dmac.set_chan_block(IopChannel::Sio2Out, 4, 1);
        dmac.set_chan_control(IopChannel::Sio2Out, false, 0, true);
        dmac.set_dma_request(IopChannel::Sio2Out);

        dmac.run(1, &mut mem, &mut sif);

        assert_eq!(mem.read8(0x2000).unwrap(), 1);
        assert_eq!(mem.read8(0x2003).unwrap(), 4);
        assert!(!dmac.chan_busy(IopChannel::Sio2Out));
    }
}
