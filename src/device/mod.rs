//! Device models for the user DMA subsystem.
//!
//! This module provides:
//! - The DMA engine itself ([`dma`])
//! - A simulated memory, MMU and PMU for the engine to run against ([`HostMemory`])
//! - A set of per-thread engines sharing one memory ([`DmaComplex`])
//!
//! # Overview
//!
//! ```text
//!   thread 0      thread 1            thread N
//!  ┌─────────┐  ┌─────────┐         ┌─────────┐
//!  │ DMA 0   │  │ DMA 1   │   ...   │ DMA N   │
//!  └────┬────┘  └────┬────┘         └────┬────┘
//!       └────────────┼───────────────────┘
//!                    ▼
//!            ┌───────────────┐
//!            │ SharedMemory  │  (one lock, one HostMemory)
//!            └───────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use udma_emu::device::dma::{Descriptor, DmaEngine, DmaStatus};
//! use udma_emu::device::HostMemory;
//!
//! let mut mem = HostMemory::new();
//! mem.map_ddr("ram", 0x1000_0000, 0x10000).unwrap();
//! mem.write_bytes(0x1000_1000, &[0xAB; 64]);
//! mem.write_bytes(0x1000_0000, &Descriptor::linear(0x1000_1000, 0x1000_2000, 64).to_bytes());
//!
//! let mut engine = DmaEngine::new(0, mem);
//! engine.start(0x1000_0000);
//! assert_eq!(engine.wait().value & 0x3, DmaStatus::Idle.bits());
//! assert_eq!(engine.adapter().read_u32(0x1000_2000), 0xABAB_ABAB);
//! ```

pub mod dma;
pub mod host_memory;
pub mod complex;

pub use complex::{DmaComplex, SharedMemory};
pub use host_memory::{DescriptorEvent, HostMemory, HostMemoryError, MemoryRegion};
