//! udma-emu library
//!
//! Emulation of the Hexagon user-mode DMA engine: descriptor codec, chain
//! walk, command surface and a simulated memory to run it against.

pub mod config;
pub mod device;
