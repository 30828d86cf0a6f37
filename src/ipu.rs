//! IPU gating surface (SPEC_FULL.md §2A).
//!
//! The MPEG2/DCT decoder pipeline itself is out of scope (spec §1). The EE
//! DMAC only needs IPU_FROM/IPU_TO's `can_read_fifo`/`can_write_fifo` gates
//! (spec §4.3) to decide whether a quadword can move; this stub supplies
//! those two 8-quadword FIFOs and nothing else.

use crate::fifo::Fifo;

const IPU_FIFO_DEPTH: usize = 8;

/// IPU_TO/IPU_FROM FIFOs, gated the same way VIF/GIF gate the DMAC.
pub struct IpuPort {
    /// Quadwords written by IPU_TO (EE DMAC reads nothing from here; this
    /// is the decoder's input).
    input: Fifo<u128>,
    /// Quadwords the (external) decoder has produced for IPU_FROM to drain.
    output: Fifo<u128>,
}

impl IpuPort {
    pub fn new() -> Self {
        IpuPort {
            input: Fifo::new(IPU_FIFO_DEPTH),
            output: Fifo::new(IPU_FIFO_DEPTH),
        }
    }

    /// Gate for IPU_FROM: can the DMAC pull a quadword out of the decoder's
    /// output queue right now?
    pub fn can_read_fifo(&self) -> bool {
        !self.output.is_empty()
    }

    /// Gate for IPU_TO: can the DMAC push a quadword into the decoder's
    /// input queue right now?
    pub fn can_write_fifo(&self) -> bool {
        self.input.has_room()
    }

    pub fn read_fifo(&mut self) -> Option<u128> {
        self.output.pop()
    }

    #[must_use]
    pub fn write_fifo(&mut self, qw: u128) -> bool {
        self.input.push(qw)
    }

    /// Test/external-decoder hook: hand a decoded quadword to IPU_FROM.
    #[must_use]
    pub fn push_output(&mut self, qw: u128) -> bool {
        self.output.push(qw)
    }
}

impl Default for IpuPort {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_gate_reflects_fifo_room() {
        let mut ipu = IpuPort::new();
        for _ in 0..IPU_FIFO_DEPTH {
            assert!(ipu.can_write_fifo());
            assert!(ipu.write_fifo(0));
        }
        assert!(!ipu.can_write_fifo());
    }

    #[test]
    fn read_gate_reflects_output_contents() {
        let mut ipu = IpuPort::new();
        assert!(!ipu.can_read_fifo());
        assert!(ipu.push_output(0xABCD));
        assert!(ipu.can_read_fifo());
        assert_eq!(ipu.read_fifo(), Some(0xABCD));
        assert!(!ipu.can_read_fifo());
    }
}
