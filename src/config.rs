//! Ambient configuration knobs that spec.md leaves implementation-defined.
//!
//! Kept as a plain struct constructed with [`Default`]: the core has no
//! config file of its own to parse, so there is nothing for a serde layer
//! to buy us at this scope (see SPEC_FULL.md §1A).

/// Cycle costs and capacities the spec names but leaves to the embedder to
/// tune (e.g. for slower/faster host machines in a dev build).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Cycles deducted from the current time slice on an icache miss
    /// (spec §4.2: "40 for icache miss").
    pub icache_miss_cycles: u32,
    /// Cycles deducted for an uncached word read (spec §4.2: "16 for
    /// uncached word").
    pub uncached_read_cycles: u32,
    /// Main RAM size in bytes (spec §6.1: 32 MiB).
    pub main_ram_size: usize,
    /// IOP RAM size in bytes (spec §6.1: 2 MiB window, physically 2 MiB).
    pub iop_ram_size: usize,
    /// Scratchpad size in bytes (spec §6.1: 16 KiB).
    pub scratchpad_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            icache_miss_cycles: 40,
            uncached_read_cycles: 16,
            main_ram_size: 32 * 1024 * 1024,
            iop_ram_size: 2 * 1024 * 1024,
            scratchpad_size: 16 * 1024,
        }
    }
}
