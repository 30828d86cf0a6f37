//! Subsystem Interface: the two 32-word FIFOs bridging the EE and IOP DMACs
//! (spec §4.5), grounded in DobieStation's `SubsystemInterface`.
//!
//! Per the design notes' "avoid owning back-pointers" guidance, SIF does not
//! itself call `set_DMA_request`/`clear_DMA_request` on either DMAC — the
//! bus reads SIF's occupancy after every operation and throttles both
//! DMACs' requests from there.

use crate::fifo::Fifo;

const SIF_FIFO_CAPACITY: usize = 32;

/// Last four words the IOP wrote to SIF0, oldest-first, for junk-word
/// replay on an unaligned EE-side drain (spec §4.5, Open Question 2).
#[derive(Debug, Clone, Copy, Default)]
struct JunkHistory {
    words: [u32; 4],
    len: u8,
}

impl JunkHistory {
    fn record(&mut self, word: u32) {
        if (self.len as usize) < 4 {
            self.words[self.len as usize] = word;
            self.len += 1;
        }
    }

    fn oldest(&self, index: usize) -> u32 {
        self.words[index]
    }
}

pub struct Sif {
    sif0: Fifo<u32>,
    sif1: Fifo<u32>,
    sif0_history: JunkHistory,
    mscom: u32,
    smcom: u32,
    msflag: u32,
    smflag: u32,
    control: u32,
}

impl Sif {
    pub fn new() -> Self {
        Sif {
            sif0: Fifo::new(SIF_FIFO_CAPACITY),
            sif1: Fifo::new(SIF_FIFO_CAPACITY),
            sif0_history: JunkHistory::default(),
            mscom: 0,
            smcom: 0,
            msflag: 0,
            smflag: 0,
            control: 0,
        }
    }

    // --- SIF0: IOP DMAC writes, EE DMAC reads -----------------------------

    #[must_use]
    pub fn write_sif0(&mut self, word: u32) -> bool {
        if self.sif0.len() < 4 {
            self.sif0_history.record(word);
        }
        self.sif0.push(word)
    }

    /// Pad a non-quadword-aligned transfer by replaying the oldest `count`
    /// entries of the last-four history (spec §4.5, §8 boundary behavior:
    /// "1-word junk replay").
    pub fn send_sif0_junk(&mut self, count: u8) {
        let oldest = self.sif0_history.oldest(0);
        for _ in 0..count {
            let _ = self.write_sif0(oldest);
        }
    }

    pub fn read_sif0_word(&mut self) -> Option<u32> {
        self.sif0.pop()
    }

    pub fn sif0_word_count(&self) -> usize {
        self.sif0.len()
    }

    pub fn sif0_free_slots(&self) -> usize {
        self.sif0.free_slots()
    }

    // --- SIF1: EE DMAC writes, IOP DMAC reads -----------------------------

    /// Push a full quadword (4 words) from the EE DMAC's SIF1 channel.
    /// Mirrors `write_SIF1`'s all-or-nothing behavior: the channel only
    /// calls this once it has confirmed room for four words.
    #[must_use]
    pub fn dma_push_sif1(&mut self, quad: u128) -> bool {
        if self.sif1.free_slots() < 4 {
            return false;
        }
        for i in 0..4u32 {
            let word = (quad >> (i * 32)) as u32;
            assert!(self.sif1.push(word), "free_slots checked above");
        }
        true
    }

    pub fn read_sif1_word(&mut self) -> Option<u32> {
        self.sif1.pop()
    }

    pub fn sif1_word_count(&self) -> usize {
        self.sif1.len()
    }

    pub fn sif1_free_slots(&self) -> usize {
        self.sif1.free_slots()
    }

    // --- Mailbox registers (spec §8 round-trip law) -----------------------

    pub fn mscom(&self) -> u32 {
        self.mscom
    }

    pub fn set_mscom(&mut self, value: u32) {
        self.mscom = value;
    }

    pub fn smcom(&self) -> u32 {
        self.smcom
    }

    pub fn set_smcom(&mut self, value: u32) {
        self.smcom = value;
    }

    pub fn msflag(&self) -> u32 {
        self.msflag
    }

    pub fn set_msflag(&mut self, value: u32) {
        self.msflag |= value;
    }

    pub fn reset_msflag(&mut self, value: u32) {
        self.msflag &= !value;
    }

    pub fn smflag(&self) -> u32 {
        self.smflag
    }

    pub fn set_smflag(&mut self, value: u32) {
        self.smflag |= value;
    }

    pub fn reset_smflag(&mut self, value: u32) {
        self.smflag &= !value;
    }

    // --- Control register (spec §6.3) -------------------------------------

    /// EE writes latch bit 0x100 directly (set if the written bit is set,
    /// clear otherwise); everything else is read-only from the EE side.
    pub fn set_control_ee(&mut self, value: u32) {
        if value & 0x100 != 0 {
            self.control |= 0x100;
        } else {
            self.control &= !0x100;
        }
    }

    /// IOP writes XOR-toggle bits 0xF0, and a 0xA0 write additionally
    /// latches bit 0x2000 while clearing the rest of 0xF000.
    pub fn set_control_iop(&mut self, value: u32) {
        let toggled = value & 0xF0;
        if value & 0xA0 != 0 {
            self.control &= !0xF000;
            self.control |= 0x2000;
        }
        if self.control & toggled != 0 {
            self.control &= !toggled;
        } else {
            self.control |= toggled;
        }
    }

    pub fn read_control_ee(&self) -> u32 {
        self.control | 0xF000_0102
    }

    pub fn read_control_iop(&self) -> u32 {
        self.control | 0xF000_0002
    }
}

impl Default for Sif {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junk_replay_pads_unaligned_transfer() {
        let mut sif = Sif::new();
        for word in [0xA, 0xB, 0xC, 0xD, 0xE] {
            assert!(sif.write_sif0(word));
        }
        // EE drains the 5 real words, leaving the FIFO empty; a consumer
        // that wanted 8 words total asks for 3 junk words to pad out to a
        // quadword boundary.
        let mut drained = Vec::new();
        while let Some(w) = sif.read_sif0_word() {
            drained.push(w);
        }
        assert_eq!(drained, vec![0xA, 0xB, 0xC, 0xD, 0xE]);
        sif.send_sif0_junk(3);
        let mut junk = Vec::new();
        while let Some(w) = sif.read_sif0_word() {
            junk.push(w);
        }
        assert_eq!(junk, vec![0xA, 0xA, 0xA]);
    }

    #[test]
    fn sif1_quadword_push_is_all_or_nothing() {
        let mut sif = Sif::new();
        for _ in 0..7 {
            assert!(sif.dma_push_sif1(0x1111_2222_3333_4444_5555_6666_7777_8888));
        }
        assert_eq!(sif.sif1_word_count(), 28);
        assert!(!sif.dma_push_sif1(1));
    }

    #[test]
    fn mailbox_registers_are_idempotent_and_flag_semantics_hold() {
        let mut sif = Sif::new();
        sif.set_mscom(0x42);
        assert_eq!(sif.mscom(), 0x42);
        assert_eq!(sif.mscom(), 0x42);

        sif.set_msflag(0x3);
        assert_eq!(sif.msflag(), 0x3);
        sif.reset_msflag(0x1);
        assert_eq!(sif.msflag(), 0x2);
    }

    #[test]
    fn control_register_ee_latch_and_iop_toggle() {
        let mut sif = Sif::new();
        sif.set_control_ee(0x100);
        assert_eq!(sif.read_control_ee() & 0x100, 0x100);
        sif.set_control_ee(0);
        assert_eq!(sif.read_control_ee() & 0x100, 0);

        sif.set_control_iop(0x20);
        assert_ne!(sif.read_control_iop() & 0x20, 0);
        sif.set_control_iop(0x20);
        assert_eq!(sif.read_control_iop() & 0x20, 0);
    }
}
