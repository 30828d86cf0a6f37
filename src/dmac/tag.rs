//! DMAtag parsing and the source-chain address bookkeeping engine shared by
//! VIF0/VIF1/GIF/SIF1/SPR_TO (spec §3 "DMATag", §4.3 "Chain operations"),
//! grounded in DobieStation's `handle_source_chain`.

use crate::error::Fault;

use super::DmaChannel;

/// One of the seven chain operations selected by a DMAtag's ID field
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    Refe,
    Cnt,
    Next,
    Ref,
    Refs,
    Call,
    Ret,
    End,
}

impl ChainOp {
    pub fn from_id(id: u8) -> Self {
        match id & 0x7 {
            0 => ChainOp::Refe,
            1 => ChainOp::Cnt,
            2 => ChainOp::Next,
            3 => ChainOp::Ref,
            4 => ChainOp::Refs,
            5 => ChainOp::Call,
            6 => ChainOp::Ret,
            _ => ChainOp::End,
        }
    }
}

/// A 128-bit DMAtag, decoded per spec §6.5 (lower 4 address bits are
/// already cleared by hardware).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTag {
    pub qwc: u16,
    pub id: u8,
    pub irq: bool,
    pub addr: u32,
    pub spr: bool,
    /// Bits 16-31 of the tag's low word, latched into the channel's CHCR
    /// on every tag read.
    pub chcr_high_bits: u32,
}

impl DmaTag {
    pub fn parse(quad: u128) -> Self {
        let low = quad as u64;
        DmaTag {
            qwc: (low & 0xFFFF) as u16,
            id: ((low >> 28) & 0x7) as u8,
            irq: (low >> 31) & 1 != 0,
            addr: (((low >> 32) as u32) & 0x7FFF_FFFF) & !0xF,
            spr: (low >> 63) & 1 != 0,
            chcr_high_bits: (low & 0xFFFF_0000) as u32,
        }
    }
}

/// Apply one source-chain DMAtag to `channel`'s address bookkeeping
/// (spec §4.3 "Chain operations"). Mirrors `handle_source_chain`: `call`
/// with ASP already at 2, or `ret` with ASP out of `0..=2`, is an
/// unrecoverable invariant violation.
pub fn apply_chain_tag(channel: &mut DmaChannel, tag: DmaTag, cycle: u64) -> Result<(), Fault> {
    channel.chcr = (channel.chcr & 0xFFFF) | tag.chcr_high_bits;
    channel.tag_id = tag.id;
    channel.qwc = tag.qwc;
    channel.can_stall_drain = false;

    match ChainOp::from_id(tag.id) {
        ChainOp::Refe => {
            channel.madr = tag.addr;
            channel.tadr = channel.tadr.wrapping_add(16);
            channel.tag_end = true;
        }
        ChainOp::Cnt => {
            channel.madr = channel.tadr.wrapping_add(16);
            channel.tadr = channel.madr;
        }
        ChainOp::Next => {
            channel.madr = channel.tadr.wrapping_add(16);
            channel.tadr = tag.addr;
        }
        ChainOp::Ref => {
            channel.madr = tag.addr;
            channel.tadr = channel.tadr.wrapping_add(16);
        }
        ChainOp::Refs => {
            channel.madr = tag.addr;
            channel.tadr = channel.tadr.wrapping_add(16);
            channel.can_stall_drain = true;
        }
        ChainOp::Call => {
            channel.madr = channel.tadr.wrapping_add(16);
            let asp = channel.asp();
            let saved = channel.madr.wrapping_add((channel.qwc as u32) << 4);
            match asp {
                0 => channel.asr[0] = saved,
                1 => channel.asr[1] = saved,
                _ => {
                    return Err(Fault::new(
                        "ee_dmac",
                        format!("'call' DMAtag issued with ASP already at {asp}"),
                        cycle,
                    ))
                }
            }
            channel.set_asp(asp + 1);
            channel.tadr = tag.addr;
        }
        ChainOp::Ret => {
            let asp = channel.asp();
            match asp {
                0 => channel.tag_end = true,
                1 => {
                    channel.tadr = channel.asr[0];
                    channel.set_asp(0);
                }
                2 => {
                    channel.tadr = channel.asr[1];
                    channel.set_asp(1);
                }
                _ => {
                    return Err(Fault::new(
                        "ee_dmac",
                        format!("'ret' DMAtag with ASP out of range ({asp})"),
                        cycle,
                    ))
                }
            }
        }
        ChainOp::End => {
            channel.madr = channel.tadr.wrapping_add(16);
            channel.tag_end = true;
        }
    }

    if tag.irq && channel.tie() {
        channel.tag_end = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_word(qwc: u16, id: u8, irq: bool, addr: u32) -> u128 {
        let mut low: u64 = qwc as u64;
        low |= (id as u64 & 0x7) << 28;
        if irq {
            low |= 1 << 31;
        }
        low |= (addr as u64 & 0x7FFF_FFF0) << 32;
        low as u128
    }

    #[test]
    fn cnt_points_next_tag_after_current_data() {
        let mut channel = DmaChannel::default();
        channel.tadr = 0x2000;
        let tag = DmaTag::parse(tag_word(4, 1, false, 0));
        apply_chain_tag(&mut channel, tag, 0).unwrap();
        assert_eq!(channel.madr, 0x2010);
        assert_eq!(channel.tadr, 0x2010);
        assert_eq!(channel.qwc, 4);
        assert!(!channel.tag_end);
    }

    #[test]
    fn end_tag_sets_tag_end() {
        let mut channel = DmaChannel::default();
        channel.tadr = 0x3000;
        let tag = DmaTag::parse(tag_word(1, 7, false, 0));
        apply_chain_tag(&mut channel, tag, 0).unwrap();
        assert!(channel.tag_end);
        assert_eq!(channel.madr, 0x3010);
    }

    #[test]
    fn call_then_ret_round_trips_tadr() {
        let mut channel = DmaChannel::default();
        channel.tadr = 0x1000;
        let call = DmaTag::parse(tag_word(0, 5, false, 0x5000));
        apply_chain_tag(&mut channel, call, 0).unwrap();
        assert_eq!(channel.asp(), 1);
        assert_eq!(channel.tadr, 0x5000);
        let saved_return = channel.asr[0];

        channel.tadr = 0x5010;
        let ret = DmaTag::parse(tag_word(0, 6, false, 0));
        apply_chain_tag(&mut channel, ret, 0).unwrap();
        assert_eq!(channel.asp(), 0);
        assert_eq!(channel.tadr, saved_return);
    }

    #[test]
    fn call_with_asp_already_saturated_is_fatal() {
        let mut channel = DmaChannel::default();
        channel.set_asp(2);
        let call = DmaTag::parse(tag_word(0, 5, false, 0x1234));
        let err = apply_chain_tag(&mut channel, call, 42).unwrap_err();
        assert_eq!(err.component, "ee_dmac");
        assert_eq!(err.cycle, 42);
    }

    #[test]
    fn irq_with_tie_forces_early_end() {
        let mut channel = DmaChannel::default();
        channel.chcr |= 1 << 7; // TIE
        channel.tadr = 0x4000;
        let tag = DmaTag::parse(tag_word(2, 3, true, 0x9000));
        apply_chain_tag(&mut channel, tag, 0).unwrap();
        assert!(channel.tag_end);
    }
}
