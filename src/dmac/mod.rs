//! EE DMAC: ten-channel arbitrated quadword mover between RAM/scratchpad
//! and the VIF/GIF/SIF/IPU/SPR peers (spec §4.3), grounded throughout in
//! DobieStation's `DMAC` class.

pub mod registers;
pub mod tag;

use crate::error::Fault;
use crate::gif::Gif;
use crate::ipu::IpuPort;
use crate::memory::Memory;
use crate::sif::Sif;
use crate::vif::Vif;

use registers::{ChannelReg, DCtrl, DStat, RegisterTarget, Sqwc, MFIFO_EMPTY_BIT};
use tag::{apply_chain_tag, DmaTag};

/// Hardware channel index order doubles as arbitration priority: a lower
/// index always outranks a higher one (spec §4.3: "the highest-index [...]
/// eligible channel becomes active" is the hardware's own inverted naming
/// for "highest priority"; DESIGN.md records this reading).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Vif0 = 0,
    Vif1 = 1,
    Gif = 2,
    IpuFrom = 3,
    IpuTo = 4,
    Sif0 = 5,
    Sif1 = 6,
    Sif2 = 7,
    SprFrom = 8,
    SprTo = 9,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::Vif0,
        Channel::Vif1,
        Channel::Gif,
        Channel::IpuFrom,
        Channel::IpuTo,
        Channel::Sif0,
        Channel::Sif1,
        Channel::Sif2,
        Channel::SprFrom,
        Channel::SprTo,
    ];
}

/// Per-channel state (spec §3 "DMAChannel").
#[derive(Debug, Clone, Copy, Default)]
pub struct DmaChannel {
    pub chcr: u32,
    pub madr: u32,
    pub qwc: u16,
    pub tadr: u32,
    pub asr: [u32; 2],
    pub sadr: u32,
    pub tag_id: u8,
    pub tag_end: bool,
    pub started: bool,
    pub can_stall_drain: bool,
    pub dma_req: bool,
    pub interleaved_qwc: u16,
}

impl DmaChannel {
    pub fn direction_from_ram(&self) -> bool {
        self.chcr & 0x1 == 0
    }

    pub fn mode(&self) -> u8 {
        ((self.chcr >> 2) & 0x3) as u8
    }

    pub fn asp(&self) -> u8 {
        ((self.chcr >> 4) & 0x3) as u8
    }

    fn set_asp(&mut self, asp: u8) {
        self.chcr = (self.chcr & !(0x3 << 4)) | ((asp as u32 & 0x3) << 4);
    }

    pub fn tte(&self) -> bool {
        self.chcr & (1 << 6) != 0
    }

    pub fn tie(&self) -> bool {
        self.chcr & (1 << 7) != 0
    }

    pub fn start(&self) -> bool {
        self.chcr & (1 << 8) != 0
    }

    /// Latch a freshly-armed channel's initial `tag_end`/`can_stall_drain`
    /// state (spec §4.3, `start_DMA`). Mode 3 is treated as chain mode,
    /// matching real-hardware titles that rely on that fallback.
    fn start_dma(&mut self, sqwc_transfer_qwc: u16) {
        let mut mode = self.mode();
        if mode == 3 {
            self.chcr &= !(1 << 3);
            mode = 1;
        }
        self.tag_end = mode & 0x1 == 0;
        let last_tag_id = ((self.chcr >> 28) & 0x7) as u8;
        self.can_stall_drain = mode & 0x1 == 0 || last_tag_id == 4;
        match mode {
            1 => {
                if self.qwc > 0 {
                    self.tag_end = last_tag_id == 0 || last_tag_id == 7;
                }
            }
            2 => self.interleaved_qwc = sqwc_transfer_qwc,
            _ => {}
        }
        self.started = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepResult {
    Progressed,
    Stalled,
    Done,
}

pub struct EeDmac {
    channels: [DmaChannel; 10],
    active: Option<usize>,
    queued: Vec<usize>,
    ctrl: DCtrl,
    stat: DStat,
    pcr: u32,
    sqwc: Sqwc,
    rbor: u32,
    rbsr: u32,
    stadr: u32,
}

impl EeDmac {
    pub fn new() -> Self {
        EeDmac {
            channels: [DmaChannel::default(); 10],
            active: None,
            queued: Vec::new(),
            ctrl: DCtrl::default(),
            stat: DStat::default(),
            pcr: 0,
            sqwc: Sqwc::default(),
            rbor: 0,
            rbsr: 0,
            stadr: 0,
        }
    }

    fn eligible(&self, idx: usize) -> bool {
        self.ctrl.master_enable && self.channels[idx].start() && self.channels[idx].dma_req
    }

    /// Recompute `active`/`queued` from scratch (spec §4.3 "Activation and
    /// arbitration"). Cheap enough at ten channels to run on every register
    /// write and every transfer-end rather than track deltas incrementally.
    fn arbitrate(&mut self) {
        let mut eligible: Vec<usize> = (0..10).filter(|&i| self.eligible(i)).collect();
        eligible.sort_unstable();
        self.active = eligible.first().copied();
        self.queued = eligible.into_iter().skip(1).collect();
    }

    pub fn set_dma_request(&mut self, ch: Channel) {
        self.channels[ch as usize].dma_req = true;
        self.arbitrate();
    }

    pub fn clear_dma_request(&mut self, ch: Channel) {
        self.channels[ch as usize].dma_req = false;
        self.arbitrate();
    }

    pub fn dmac_interrupt_pending(&self) -> bool {
        self.stat.any_masked_pending()
    }

    fn transfer_end(&mut self, idx: usize) {
        self.channels[idx].chcr &= !(1 << 8);
        self.channels[idx].started = false;
        self.stat.channel_stat[idx] = true;
        self.arbitrate();
    }

    /// Spec §4.3 step 1: a channel feeding from/to the MFIFO ring suspends
    /// when its working address catches up to SPR_FROM's.
    fn mfifo_blocked(&mut self, idx: usize) -> bool {
        if self.ctrl.mem_drain_channel == 0 {
            return false;
        }
        if self.ctrl.mem_drain_channel as usize != idx + 1 {
            return false;
        }
        if !matches!(Channel::ALL[idx], Channel::Vif1 | Channel::Gif) {
            return false;
        }
        let spr_from_addr = self.channels[Channel::SprFrom as usize].madr;
        let channel = &self.channels[idx];
        let probe = if channel.qwc > 0 { channel.madr } else { channel.tadr };
        if probe == spr_from_addr {
            self.stat.channel_stat[MFIFO_EMPTY_BIT] = true;
            true
        } else {
            false
        }
    }

    pub fn run(
        &mut self,
        cycles: u32,
        cycle: u64,
        mem: &mut Memory,
        vif0: &mut Vif,
        vif1: &mut Vif,
        gif: &mut Gif,
        sif: &mut Sif,
        ipu: &mut IpuPort,
    ) -> Result<(), Fault> {
        let mut budget = cycles;
        while budget > 0 {
            self.arbitrate();
            let Some(idx) = self.active else { break };
            if self.mfifo_blocked(idx) {
                break;
            }
            let outcome = self.step(idx, cycle, mem, vif0, vif1, gif, sif, ipu)?;
            match outcome {
                StepResult::Progressed => budget -= 1,
                StepResult::Stalled => break,
                StepResult::Done => self.transfer_end(idx),
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        idx: usize,
        cycle: u64,
        mem: &mut Memory,
        vif0: &mut Vif,
        vif1: &mut Vif,
        gif: &mut Gif,
        sif: &mut Sif,
        ipu: &mut IpuPort,
    ) -> Result<StepResult, Fault> {
        match Channel::ALL[idx] {
            Channel::Vif0 => step_source_chain(
                &mut self.channels[idx],
                false,
                0,
                cycle,
                |a| mem.read128(a),
                |q| vif0.dma_feed(q),
            ),
            Channel::Vif1 => {
                let stall_guard = self.ctrl.stall_dest_channel == 1;
                let stadr = self.stadr;
                step_source_chain(
                    &mut self.channels[idx],
                    stall_guard,
                    stadr,
                    cycle,
                    |a| mem.read128(a),
                    |q| vif1.dma_feed(q),
                )
            }
            Channel::Gif => {
                let stall_guard = self.ctrl.stall_dest_channel == 2;
                let stadr = self.stadr;
                step_gif(&mut self.channels[idx], stall_guard, stadr, cycle, mem, gif)
            }
            Channel::IpuFrom => {
                let stall_source = self.ctrl.stall_source_channel == 3;
                let result = step_ipu_from(&mut self.channels[idx], cycle, mem, ipu);
                if stall_source {
                    if let Ok(StepResult::Progressed) = result {
                        self.stadr = self.channels[idx].madr;
                    }
                }
                result
            }
            Channel::IpuTo => step_source_chain(
                &mut self.channels[idx],
                false,
                0,
                cycle,
                |a| mem.read128(a),
                |q| {
                    if ipu.can_write_fifo() {
                        ipu.write_fifo(q)
                    } else {
                        false
                    }
                },
            ),
            Channel::Sif0 => {
                let result = step_sif0(&mut self.channels[idx], cycle, mem, sif);
                if self.ctrl.stall_source_channel == 1 {
                    if let Ok(StepResult::Progressed) = result {
                        self.stadr = self.channels[idx].madr;
                    }
                }
                result
            }
            Channel::Sif1 => {
                let stall_guard = self.ctrl.stall_dest_channel == 3;
                let stadr = self.stadr;
                step_source_chain(
                    &mut self.channels[idx],
                    stall_guard,
                    stadr,
                    cycle,
                    |a| mem.read128(a),
                    |q| sif.dma_push_sif1(q),
                )
            }
            Channel::Sif2 => Ok(StepResult::Stalled),
            Channel::SprFrom => {
                let sqwc = self.sqwc;
                let result = step_spr_from(&mut self.channels[idx], sqwc, cycle, mem);
                if self.ctrl.stall_source_channel == 2 {
                    if let Ok(StepResult::Progressed) = result {
                        self.stadr = self.channels[idx].madr;
                    }
                }
                result
            }
            Channel::SprTo => {
                let sqwc = self.sqwc;
                step_spr_to(&mut self.channels[idx], sqwc, cycle, mem)
            }
        }
    }

    fn merge(old: u32, value: u32, size: u8) -> u32 {
        match size {
            1 => (old & !0xFF) | (value & 0xFF),
            2 => (old & !0xFFFF) | (value & 0xFFFF),
            _ => value,
        }
    }

    fn write_channel_reg(&mut self, ch: Channel, reg: ChannelReg, size: u8, value: u32) {
        let idx = ch as usize;
        match reg {
            ChannelReg::Chcr => {
                let channel = &mut self.channels[idx];
                let new_value = Self::merge(channel.chcr, value, size);
                if !channel.start() {
                    channel.chcr = new_value;
                    if channel.start() {
                        let transfer_qwc = self.sqwc.transfer_qwc as u16;
                        self.channels[idx].start_dma(transfer_qwc);
                    }
                } else {
                    let channel = &mut self.channels[idx];
                    let keep_start = new_value & (1 << 8);
                    channel.chcr = (channel.chcr & !(1u32 << 8)) | keep_start;
                    channel.started = channel.chcr & (1 << 8) != 0;
                }
            }
            ChannelReg::Madr => {
                let c = &mut self.channels[idx];
                c.madr = Self::merge(c.madr, value, size) & !0xF;
            }
            ChannelReg::Qwc => {
                let c = &mut self.channels[idx];
                c.qwc = (Self::merge(c.qwc as u32, value, size) & 0xFFFF) as u16;
            }
            ChannelReg::Tadr => {
                let c = &mut self.channels[idx];
                c.tadr = Self::merge(c.tadr, value, size) & !0xF;
            }
            ChannelReg::Asr0 => {
                let c = &mut self.channels[idx];
                c.asr[0] = Self::merge(c.asr[0], value, size);
            }
            ChannelReg::Asr1 => {
                let c = &mut self.channels[idx];
                c.asr[1] = Self::merge(c.asr[1], value, size);
            }
            ChannelReg::Sadr => {
                let c = &mut self.channels[idx];
                c.sadr = Self::merge(c.sadr, value, size) & 0x3FFC;
            }
        }
        self.arbitrate();
    }

    fn write_sized(&mut self, addr: u32, size: u8, value: u32) {
        let Some(target) = registers::decode_address(addr) else { return };
        match target {
            RegisterTarget::Channel(ch, reg) => self.write_channel_reg(ch, reg, size, value),
            RegisterTarget::DCtrl => {
                self.ctrl = DCtrl::from_bits(Self::merge(self.ctrl.to_bits(), value, size))
            }
            RegisterTarget::DStat => self.stat.apply_write(Self::merge(0, value, size)),
            RegisterTarget::Pcr => self.pcr = Self::merge(self.pcr, value, size),
            RegisterTarget::Sqwc => {
                self.sqwc = Sqwc::from_bits(Self::merge(self.sqwc.to_bits(), value, size))
            }
            RegisterTarget::Rbor => self.rbor = Self::merge(self.rbor, value, size),
            RegisterTarget::Rbsr => self.rbsr = Self::merge(self.rbsr, value, size),
            RegisterTarget::Stadr => self.stadr = Self::merge(self.stadr, value, size),
        }
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        self.write_sized(addr, 1, value as u32);
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        self.write_sized(addr, 2, value as u32);
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.write_sized(addr, 4, value);
    }

    fn read_sized(&self, addr: u32) -> Option<u32> {
        let target = registers::decode_address(addr)?;
        Some(match target {
            RegisterTarget::Channel(ch, reg) => {
                let c = &self.channels[ch as usize];
                match reg {
                    ChannelReg::Chcr => c.chcr,
                    ChannelReg::Madr => c.madr,
                    ChannelReg::Qwc => c.qwc as u32,
                    ChannelReg::Tadr => c.tadr,
                    ChannelReg::Asr0 => c.asr[0],
                    ChannelReg::Asr1 => c.asr[1],
                    ChannelReg::Sadr => c.sadr,
                }
            }
            RegisterTarget::DCtrl => self.ctrl.to_bits(),
            RegisterTarget::DStat => self.stat.to_bits(),
            RegisterTarget::Pcr => self.pcr,
            RegisterTarget::Sqwc => self.sqwc.to_bits(),
            RegisterTarget::Rbor => self.rbor,
            RegisterTarget::Rbsr => self.rbsr,
            RegisterTarget::Stadr => self.stadr,
        })
    }

    pub fn read8(&self, addr: u32) -> Option<u8> {
        self.read_sized(addr).map(|v| v as u8)
    }

    pub fn read16(&self, addr: u32) -> Option<u16> {
        self.read_sized(addr).map(|v| v as u16)
    }

    pub fn read32(&self, addr: u32) -> Option<u32> {
        self.read_sized(addr)
    }
}

impl Default for EeDmac {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared engine for the plain source-chain channels (VIF0/VIF1/SIF1/
/// IPU_TO): read a quadword from `read_quad`, hand it to `push`, and walk
/// the chain-tag state machine when the count runs out.
fn step_source_chain(
    channel: &mut DmaChannel,
    stall_guard: bool,
    stadr: u32,
    cycle: u64,
    mut read_quad: impl FnMut(u32) -> Result<u128, crate::memory::Access>,
    mut push: impl FnMut(u128) -> bool,
) -> Result<StepResult, Fault> {
    if channel.qwc > 0 {
        if stall_guard && channel.can_stall_drain && channel.madr.wrapping_add(8 * 16) > stadr {
            return Ok(StepResult::Stalled);
        }
        let quad = read_quad(channel.madr)
            .map_err(|_| Fault::new("ee_dmac", format!("bad MADR {:#010x}", channel.madr), cycle))?;
        if !push(quad) {
            return Ok(StepResult::Stalled);
        }
        channel.madr = channel.madr.wrapping_add(16);
        channel.qwc -= 1;
        Ok(StepResult::Progressed)
    } else if channel.tag_end {
        Ok(StepResult::Done)
    } else {
        let tag_quad = read_quad(channel.tadr)
            .map_err(|_| Fault::new("ee_dmac", format!("bad TADR {:#010x}", channel.tadr), cycle))?;
        if channel.tte() && !push(tag_quad >> 64) {
            return Ok(StepResult::Stalled);
        }
        let tag = DmaTag::parse(tag_quad);
        apply_chain_tag(channel, tag, cycle)?;
        Ok(StepResult::Progressed)
    }
}

fn step_gif(
    channel: &mut DmaChannel,
    stall_guard: bool,
    stadr: u32,
    cycle: u64,
    mem: &mut Memory,
    gif: &mut Gif,
) -> Result<StepResult, Fault> {
    if channel.qwc > 0 {
        gif.request_path3();
        if !gif.path3_active() || gif.fifo_full() || gif.fifo_draining() {
            gif.set_dma_waiting(true);
            return Ok(StepResult::Stalled);
        }
        if stall_guard && channel.can_stall_drain && channel.madr.wrapping_add(8 * 16) > stadr {
            gif.set_dma_waiting(true);
            return Ok(StepResult::Stalled);
        }
        gif.set_dma_waiting(false);
        let quad = mem
            .read128(channel.madr)
            .map_err(|_| Fault::new("ee_dmac", format!("bad MADR {:#010x}", channel.madr), cycle))?;
        gif.dma_send_path3(quad);
        channel.madr = channel.madr.wrapping_add(16);
        channel.qwc -= 1;
        Ok(StepResult::Progressed)
    } else if channel.tag_end {
        gif.deactivate_path3();
        Ok(StepResult::Done)
    } else {
        let tag_quad = mem
            .read128(channel.tadr)
            .map_err(|_| Fault::new("ee_dmac", format!("bad TADR {:#010x}", channel.tadr), cycle))?;
        let tag = DmaTag::parse(tag_quad);
        apply_chain_tag(channel, tag, cycle)?;
        Ok(StepResult::Progressed)
    }
}

fn step_ipu_from(
    channel: &mut DmaChannel,
    cycle: u64,
    mem: &mut Memory,
    ipu: &mut IpuPort,
) -> Result<StepResult, Fault> {
    if channel.qwc > 0 {
        if !ipu.can_read_fifo() {
            return Ok(StepResult::Stalled);
        }
        let data = ipu.read_fifo().expect("can_read_fifo just confirmed data");
        mem.write128(channel.madr, data)
            .map_err(|_| Fault::new("ee_dmac", format!("bad MADR {:#010x}", channel.madr), cycle))?;
        channel.madr = channel.madr.wrapping_add(16);
        channel.qwc -= 1;
        Ok(StepResult::Progressed)
    } else if channel.tag_end {
        Ok(StepResult::Done)
    } else {
        Err(Fault::new("ee_dmac", "IPU_FROM does not support dest-chain tags", cycle))
    }
}

fn step_sif0(
    channel: &mut DmaChannel,
    cycle: u64,
    mem: &mut Memory,
    sif: &mut Sif,
) -> Result<StepResult, Fault> {
    if channel.qwc > 0 {
        if sif.sif0_word_count() < 4 {
            return Ok(StepResult::Stalled);
        }
        for i in 0..4u32 {
            let word = sif.read_sif0_word().expect("word count checked above");
            mem.write32(channel.madr.wrapping_add(i * 4), word)
                .map_err(|_| Fault::new("ee_dmac", format!("bad MADR {:#010x}", channel.madr), cycle))?;
        }
        channel.madr = channel.madr.wrapping_add(16);
        channel.qwc -= 1;
        Ok(StepResult::Progressed)
    } else if channel.tag_end {
        Ok(StepResult::Done)
    } else {
        if sif.sif0_word_count() < 2 {
            return Ok(StepResult::Stalled);
        }
        let low = sif.read_sif0_word().expect("word count checked above") as u64;
        let high = sif.read_sif0_word().expect("word count checked above") as u64;
        let dmatag = low | (high << 32);
        channel.qwc = (dmatag & 0xFFFF) as u16;
        channel.madr = (dmatag >> 32) as u32;
        channel.tag_id = ((dmatag >> 28) & 0x7) as u8;
        let irq = dmatag & (1 << 31) != 0;
        channel.chcr = (channel.chcr & 0xFFFF) | (dmatag & 0xFFFF_0000) as u32;
        if channel.tag_id == 7 || (irq && channel.tie()) {
            channel.tag_end = true;
        }
        Ok(StepResult::Progressed)
    }
}

fn advance_interleave(channel: &mut DmaChannel, sqwc: Sqwc) {
    if channel.mode() == 2 {
        channel.interleaved_qwc = channel.interleaved_qwc.saturating_sub(1);
        if channel.interleaved_qwc == 0 {
            channel.interleaved_qwc = sqwc.transfer_qwc as u16;
            channel.madr = channel.madr.wrapping_add((sqwc.skip_qwc as u32) * 16);
        }
    }
}

fn step_spr_to(
    channel: &mut DmaChannel,
    sqwc: Sqwc,
    cycle: u64,
    mem: &mut Memory,
) -> Result<StepResult, Fault> {
    if channel.qwc > 0 {
        let quad = mem
            .read128(channel.madr)
            .map_err(|_| Fault::new("ee_dmac", format!("bad MADR {:#010x}", channel.madr), cycle))?;
        mem.write_scratchpad128(channel.sadr, quad);
        channel.sadr = channel.sadr.wrapping_add(16);
        channel.madr = channel.madr.wrapping_add(16);
        channel.qwc -= 1;
        advance_interleave(channel, sqwc);
        Ok(StepResult::Progressed)
    } else if channel.tag_end {
        Ok(StepResult::Done)
    } else {
        let tag_quad = mem
            .read128(channel.tadr)
            .map_err(|_| Fault::new("ee_dmac", format!("bad TADR {:#010x}", channel.tadr), cycle))?;
        let tag = DmaTag::parse(tag_quad);
        apply_chain_tag(channel, tag, cycle)?;
        Ok(StepResult::Progressed)
    }
}

fn step_spr_from(
    channel: &mut DmaChannel,
    sqwc: Sqwc,
    cycle: u64,
    mem: &mut Memory,
) -> Result<StepResult, Fault> {
    let _ = cycle;
    if channel.qwc > 0 {
        let quad = mem.read_scratchpad128(channel.sadr);
        mem.write128(channel.madr, quad)
            .map_err(|_| Fault::new("ee_dmac", format!("bad MADR {:#010x}", channel.madr), cycle))?;
        channel.sadr = channel.sadr.wrapping_add(16);
        channel.madr = channel.madr.wrapping_add(16);
        channel.qwc -= 1;
        advance_interleave(channel, sqwc);
        Ok(StepResult::Progressed)
    } else if channel.tag_end {
        Ok(StepResult::Done)
    } else {
        let tag_quad = mem.read_scratchpad128(channel.sadr);
        channel.sadr = channel.sadr.wrapping_add(16);
        let tag = DmaTag::parse(tag_quad);
        channel.qwc = tag.qwc;
        channel.madr = tag.addr;
        channel.tag_id = tag.id;
        channel.chcr = (channel.chcr & 0xFFFF) | tag.chcr_high_bits;
        if tag.id == 7 || (tag.irq && channel.tie()) {
            channel.tag_end = true;
        }
        Ok(StepResult::Progressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    fn dmac_with_memory() -> (EeDmac, Memory) {
        (EeDmac::new(), Memory::new(BusConfig::default()))
    }

    #[test]
    fn arbitration_prefers_lowest_channel_index() {
        let (mut dmac, _mem) = dmac_with_memory();
        dmac.ctrl.master_enable = true;
        dmac.channels[Channel::Gif as usize].chcr = 1 << 8;
        dmac.channels[Channel::Vif0 as usize].chcr = 1 << 8;
        dmac.set_dma_request(Channel::Gif);
        dmac.set_dma_request(Channel::Vif0);
        assert_eq!(dmac.active, Some(Channel::Vif0 as usize));
        assert_eq!(dmac.queued, vec![Channel::Gif as usize]);
    }

    #[test]
    fn dstat_register_round_trips_through_write32() {
        let (mut dmac, _mem) = dmac_with_memory();
        dmac.channels[2].chcr = 0xDEAD_00FF;
        assert_eq!(dmac.read32(0x1000_A000), Some(0xDEAD_00FF));
    }

    #[test]
    fn madr_write_clears_low_nibble() {
        let (mut dmac, _mem) = dmac_with_memory();
        dmac.write32(0x1000_8010, 0x0010_0007);
        assert_eq!(dmac.read32(0x1000_8010), Some(0x0010_0000));
    }

    #[test]
    fn gif_path3_normal_transfer_delivers_in_order() {
        let (mut dmac, mut mem) = dmac_with_memory();
        let mut vif0 = Vif::new(crate::vif::VifPort::Vif0);
        let mut vif1 = Vif::new(crate::vif::VifPort::Vif1);
        let mut gif = Gif::new();
        let mut sif = Sif::new();
        let mut ipu = IpuPort::new();

        mem.write128(0x0010_0000, 0x1111_1111_1111_1111_1111_1111_1111_1111).unwrap();
        mem.write128(0x0010_0010, 0x2222_2222_2222_2222_2222_2222_2222_2222).unwrap();
        mem.write128(0x0010_0020, 0x3333_3333_3333_3333_3333_3333_3333_3333).unwrap();
        mem.write128(0x0010_0030, 0x4444_4444_4444_4444_4444_4444_4444_4444).unwrap();

        dmac.ctrl.master_enable = true;
        dmac.write32(0x1000_A010, 0x0010_0000); // MADR
        dmac.write32(0x1000_A020, 4); // QWC
        dmac.write32(0x1000_A000, 0x0000_0101); // CHCR: normal mode, start
        dmac.set_dma_request(Channel::Gif);

        dmac.run(100, 0, &mut mem, &mut vif0, &mut vif1, &mut gif, &mut sif, &mut ipu).unwrap();

        assert_eq!(gif.drain_path3().len(), 4);
        assert!(dmac.stat.channel_stat[Channel::Gif as usize]);
        assert!(!dmac.channels[Channel::Gif as usize].start());
    }

    #[test]
    fn gif_source_chain_cnt_then_end_delivers_two_quadwords() {
        let (mut dmac, mut mem) = dmac_with_memory();
        let mut vif0 = Vif::new(crate::vif::VifPort::Vif0);
        let mut vif1 = Vif::new(crate::vif::VifPort::Vif1);
        let mut gif = Gif::new();
        let mut sif = Sif::new();
        let mut ipu = IpuPort::new();

        // cnt tag (id=1, qwc=1) at 0x200000, followed by its data quadword.
        mem.write128(0x0020_0000, 0x0000_0000_0000_0000_0000_0000_0000_0001).unwrap();
        mem.write128(0x0020_0010, 0x5555_5555_5555_5555_5555_5555_5555_5555).unwrap();
        // end+IRQ tag (id=7, irq, qwc=1) at the next TADR, then its data.
        mem.write128(0x0020_0020, 0x0000_0000_0000_0000_7000_0000_0000_0001).unwrap();
        mem.write128(0x0020_0030, 0x6666_6666_6666_6666_6666_6666_6666_6666).unwrap();

        dmac.ctrl.master_enable = true;
        dmac.write32(0x1000_A030, 0x0020_0000); // TADR
        dmac.write32(0x1000_A000, 0x0000_0109); // CHCR: chain mode (bit2), TIE (bit7), start
        dmac.set_dma_request(Channel::Gif);

        dmac.run(200, 0, &mut mem, &mut vif0, &mut vif1, &mut gif, &mut sif, &mut ipu).unwrap();

        assert_eq!(gif.drain_path3().len(), 2);
        assert!(dmac.stat.channel_stat[Channel::Gif as usize]);
    }

    #[test]
    fn call_tag_with_asp_saturated_raises_a_fault() {
        let (mut dmac, mut mem) = dmac_with_memory();
        let mut vif0 = Vif::new(crate::vif::VifPort::Vif0);
        let mut vif1 = Vif::new(crate::vif::VifPort::Vif1);
        let mut gif = Gif::new();
        let mut sif = Sif::new();
        let mut ipu = IpuPort::new();

        dmac.ctrl.master_enable = true;
        dmac.channels[Channel::Vif0 as usize].chcr = (2 << 4) | (1 << 2) | (1 << 8);
        dmac.channels[Channel::Vif0 as usize].dma_req = true;
        dmac.channels[Channel::Vif0 as usize].tadr = 0x0030_0000;
        mem.write128(0x0030_0000, 0x0000_0000_0000_0000_5000_0000_0000_0000).unwrap();

        let err = dmac
            .run(10, 7, &mut mem, &mut vif0, &mut vif1, &mut gif, &mut sif, &mut ipu)
            .unwrap_err();
        assert_eq!(err.cycle, 7);
    }
}
