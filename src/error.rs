//! Error taxonomy for the bus core (spec §7).
//!
//! Two flavors: [`MemError`] carries the *recoverable* faults the EE memory
//! subsystem returns to the CPU layer as plain values, and [`Fault`] carries
//! the *unrecoverable* invariant violations (bad DMAtag id, bad VIFcode,
//! `call` with a full address-stack) that this core treats as a halt rather
//! than a caught exception, per the design notes in spec §9.

use std::fmt;

/// Recoverable memory-access fault, propagated up to the CPU layer as a
/// value (spec §7: "Recoverable faults ... are returned as values").
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    #[error("alignment error: {size}-byte access to {addr:#010x} is not {size}-byte aligned")]
    Alignment { addr: u32, size: u8 },
    #[error("access violation: no TLB mapping for {addr:#010x}")]
    AccessViolation { addr: u32 },
}

/// Unrecoverable invariant violation. The component names itself, the
/// offending address or opcode, and the cycle at which it happened; the
/// embedder is expected to log this at `error!` level and terminate with a
/// nonzero status (spec §7: "the emulator exits with a nonzero status and
/// the diagnostic on standard error").
#[derive(Debug, Clone)]
pub struct Fault {
    pub component: &'static str,
    pub detail: String,
    pub cycle: u64,
}

impl Fault {
    pub fn new(component: &'static str, detail: impl Into<String>, cycle: u64) -> Self {
        Fault { component, detail: detail.into(), cycle }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] fatal @ cycle {}: {}", self.component, self.cycle, self.detail)
    }
}

impl std::error::Error for Fault {}

/// Convenience alias used throughout the DMAC/VIF/GIF decoders for
/// operations that can hit an unrecoverable invariant violation.
pub type FaultResult<T> = Result<T, Fault>;
