//! PS2 Emotion Engine bus-and-transfer core: the DMA engines, FIFOs and
//! memory subsystem that move data between main RAM, the IOP, the vector
//! units and the GS, decoupled from any particular CPU interpreter.

pub mod bus;
pub mod config;
pub mod dmac;
pub mod error;
pub mod fifo;
pub mod gif;
pub mod gs;
pub mod intc;
pub mod iop_dmac;
pub mod ipu;
pub mod memory;
pub mod scheduler;
pub mod sif;
pub mod vif;
pub mod vu;

pub use bus::Bus;
pub use config::BusConfig;
pub use error::{Fault, FaultResult, MemError};
