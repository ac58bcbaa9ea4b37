//! User DMA (udma) engine subsystem.
//!
//! This module implements the descriptor-driven copy engine that a hardware
//! thread drives through a small command set:
//! - Descriptor codec (linear and 2D layouts, validation, write-back)
//! - Transfer stepper (aligned chunking, byte-pair transforms)
//! - Completion tracker (bounded in-flight queue for pause and retry)
//! - Engine context (status state machine and chain walk)
//! - Command surface (dmstart, dmlink, dmpoll, dmwait, dmpause, dmresume, ...)
//!
//! # Architecture
//!
//! Each hardware thread owns one engine. The engine walks a linked list of
//! descriptors in memory, talking to the rest of the system only through a
//! [`DmaAdapter`].
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        DmaEngine                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐   │
//! │  │  commands    │──►│  step_chain  │──►│   tracker     │   │
//! │  │ start/link/… │   │ fetch/decode │   │ id, state,    │   │
//! │  └──────────────┘   │ chunk/xform  │   │ write-back    │   │
//! │                     └──────┬───────┘   └───────────────┘   │
//! └────────────────────────────┼───────────────────────────────┘
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │      DmaAdapter       │
//!                  │ translate/read/write  │
//!                  │ pmu/pcycle/cpu mode   │
//!                  └───────────────────────┘
//! ```
//!
//! Descriptor chain in memory:
//!
//! ```text
//!  desc A (16B)          desc B (32B, 2D)
//! ┌──────────────┐      ┌──────────────┐
//! │ next ────────┼─────►│ next = 0     │
//! │ flags|length │      │ flags|type=1 │
//! │ src          │      │ src          │
//! │ dst          │      │ dst          │
//! └──────────────┘      │ xform|alloc  │
//!                       │ height|width │
//!                       │ strides      │
//!                       │ offsets      │
//!                       └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use udma_emu::device::HostMemory;
//! use udma_emu::device::dma::{Descriptor, DmaEngine};
//!
//! let mut mem = HostMemory::new();
//! mem.map_ddr("ram", 0x1000_0000, 0x10000)?;
//! mem.write_bytes(0x1000_0000, &Descriptor::linear(0x1000_1000, 0x1000_2000, 64).to_bytes());
//!
//! let mut engine = DmaEngine::new(0, mem);
//! engine.start(0x1000_0000);
//! let status = engine.wait();
//! ```

pub mod adapter;
pub mod descriptor;
pub mod transfer;
pub mod tracker;
pub mod timing;
pub mod engine;
pub mod commands;

pub use adapter::{Access, DmaAdapter, MemoryType, Permissions, PmuCounter, Translation, TranslationFault};
pub use descriptor::{Descriptor, DescriptorError, DescriptorHeader, DescriptorKind, Region2d, Transform};
pub use transfer::{ActiveDescriptor, Chunk, ChunkLimits};
pub use tracker::{CompletionKind, DescriptorTracker, TrackedEntry, TrackerFull};
pub use timing::{InsnLatency, InsnTimer, TimerState};
pub use engine::{DescriptorCompletion, DmaEngine, EngineConfig, EngineStats, FaultCapture, TargetDescriptor};
pub use commands::{CommandResult, InsnChecker, CFG_BADVA, CFG_MODE, CFG_STATUS, CFG_SYNDROME};

/// Maximum number of engine instances (one per hardware thread).
pub const MAX_ENGINES: usize = 8;

/// Default number of descriptors the completion tracker can hold.
pub const DESC_TRACKER_CAPACITY: usize = 256;

/// Largest single chunk on a side that bypasses the cache.
pub const MAX_CHUNK_BYPASS: u32 = 256;

/// Largest single chunk on a cached side.
pub const MAX_CHUNK_CACHED: u32 = 128;

/// DM0 bits holding the external status; the rest is a descriptor address.
pub const DM0_STATUS_MASK: u32 = 0x3;

/// External status, mirrored into the low bits of DM0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum DmaStatus {
    /// Nothing running
    #[default]
    Idle = 0,
    /// Walking a chain
    Run = 1,
    /// A fault has been captured
    Error = 2,
}

impl DmaStatus {
    /// Raw DM0 status bits.
    #[inline]
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Internal engine status.
///
/// Paused reads as idle from the outside; the other states map one to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl EngineStatus {
    /// External status visible through DM0.
    pub fn external(self) -> DmaStatus {
        match self {
            Self::Idle | Self::Paused => DmaStatus::Idle,
            Self::Running => DmaStatus::Run,
            Self::Error => DmaStatus::Error,
        }
    }

    /// Whether the state diagram allows moving from `self` to `next`.
    ///
    /// ```text
    ///   Idle ──► Running ──► Paused ──► Running
    ///     ▲         │           │
    ///     │         ▼           ▼
    ///     └────── Error ◄───────┘      (any state may stop to Idle)
    /// ```
    ///
    /// Error never goes straight back to Running; it has to stop first.
    pub fn can_transition_to(self, next: EngineStatus) -> bool {
        match next {
            Self::Idle | Self::Error => true,
            Self::Running => self != Self::Error,
            Self::Paused => matches!(self, Self::Running | Self::Paused),
        }
    }
}

/// Lifecycle of a decoded descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DescriptorState {
    #[default]
    NotDone = 0,
    Done = 1,
    /// Recoverable exception while the engine kept running (e.g. TLB miss)
    ExceptRunning = 2,
    /// Exception raised while the engine was in error
    ExceptError = 3,
}

impl DescriptorState {
    pub fn is_exception(self) -> bool {
        matches!(self, Self::ExceptRunning | Self::ExceptError)
    }

    /// Entries in these states leave the tracker at the end of a tick.
    pub fn is_retired(self) -> bool {
        matches!(self, Self::Done | Self::ExceptError)
    }

    /// State an entry settles in once its execution has ended.
    ///
    /// An exception taken while running stays pending so the descriptor can
    /// be retried; everything else is finished.
    pub fn settled(self) -> Self {
        match self {
            Self::ExceptRunning | Self::ExceptError => self,
            Self::NotDone | Self::Done => Self::Done,
        }
    }
}

/// Fault syndrome codes reported through DM4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FaultReason {
    /// dmstart or dmresume issued while running
    CommandInRunState = 0,
    InvalidAlignment = 1,
    InvalidType = 2,
    UnsupportedAddress = 3,
    UnsupportedBypassMode = 4,
    UnsupportedCompressionMode = 5,
    RoiError = 6,
    InvalidAccessRights = 102,
    DataTimeout = 103,
    DataAbort = 104,
}

impl FaultReason {
    /// Numeric syndrome code.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode a syndrome code.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::CommandInRunState,
            1 => Self::InvalidAlignment,
            2 => Self::InvalidType,
            3 => Self::UnsupportedAddress,
            4 => Self::UnsupportedBypassMode,
            5 => Self::UnsupportedCompressionMode,
            6 => Self::RoiError,
            102 => Self::InvalidAccessRights,
            103 => Self::DataTimeout,
            104 => Self::DataAbort,
            _ => return None,
        })
    }
}

impl std::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CommandInRunState => "DMSTART_DMRESUME_IN_RUNSTATE",
            Self::InvalidAlignment => "DESCRIPTOR_INVALID_ALIGNMENT",
            Self::InvalidType => "DESCRIPTOR_INVALID_TYPE",
            Self::UnsupportedAddress => "UNSUPPORTED_ADDRESS",
            Self::UnsupportedBypassMode => "UNSUPPORTED_BYPASS_MODE",
            Self::UnsupportedCompressionMode => "UNSUPPORTED_COMPRESSION_MODE",
            Self::RoiError => "DESCRIPTOR_ROI_ERROR",
            Self::InvalidAccessRights => "INVALID_ACCESS_RIGHTS",
            Self::DataTimeout => "DATA_TIMEOUT",
            Self::DataAbort => "DATA_ABORT",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// DM2 mode/configuration register.
///
/// | Bits  | Field |
/// |-------|-------|
/// | 0     | no stall in guest mode |
/// | 1     | no stall in monitor mode |
/// | 3     | no continue on exception |
/// | 4     | no continue in debug mode |
/// | 6:5   | priority |
/// | 7     | DLBC enable |
/// | 8     | out-of-order write disable |
/// | 9     | error exception enable |
/// | 23:16 | max outstanding reads |
/// | 31:24 | max outstanding writes |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dm2Config(pub u32);

impl Dm2Config {
    const NO_STALL_GUEST: u32 = 1 << 0;
    const NO_STALL_MONITOR: u32 = 1 << 1;
    const NO_CONT_EXCEPT: u32 = 1 << 3;
    const NO_CONT_DEBUG: u32 = 1 << 4;
    const PRIORITY_SHIFT: u32 = 5;
    const PRIORITY_MASK: u32 = 0x3;
    const DLBC_ENABLE: u32 = 1 << 7;
    const OOO_DISABLE: u32 = 1 << 8;
    const ERROR_EXCEPTION_ENABLE: u32 = 1 << 9;
    const MAX_READS_SHIFT: u32 = 16;
    const MAX_WRITES_SHIFT: u32 = 24;

    /// Value after reset: priority 1, DLBC and error exceptions enabled.
    pub const RESET: Dm2Config =
        Dm2Config((1 << Self::PRIORITY_SHIFT) | Self::DLBC_ENABLE | Self::ERROR_EXCEPTION_ENABLE);

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn no_stall_guest(self) -> bool {
        self.0 & Self::NO_STALL_GUEST != 0
    }

    pub fn no_stall_monitor(self) -> bool {
        self.0 & Self::NO_STALL_MONITOR != 0
    }

    pub fn no_cont_except(self) -> bool {
        self.0 & Self::NO_CONT_EXCEPT != 0
    }

    pub fn no_cont_debug(self) -> bool {
        self.0 & Self::NO_CONT_DEBUG != 0
    }

    pub fn priority(self) -> u8 {
        ((self.0 >> Self::PRIORITY_SHIFT) & Self::PRIORITY_MASK) as u8
    }

    pub fn dlbc_enabled(self) -> bool {
        self.0 & Self::DLBC_ENABLE != 0
    }

    pub fn ooo_write_disabled(self) -> bool {
        self.0 & Self::OOO_DISABLE != 0
    }

    pub fn error_exception_enabled(self) -> bool {
        self.0 & Self::ERROR_EXCEPTION_ENABLE != 0
    }

    pub fn max_outstanding_reads(self) -> u8 {
        (self.0 >> Self::MAX_READS_SHIFT) as u8
    }

    pub fn max_outstanding_writes(self) -> u8 {
        (self.0 >> Self::MAX_WRITES_SHIFT) as u8
    }
}

impl Default for Dm2Config {
    fn default() -> Self {
        Self::RESET
    }
}

/// Errors from the engine API itself (not hardware faults, which are
/// captured in the fault registers instead).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DmaError {
    /// Engine number outside the configured set
    #[error("DMA engine {num} does not exist ({max} configured)")]
    InvalidEngine { num: usize, max: usize },
    /// More engines requested than hardware threads
    #[error("{requested} DMA engines requested, at most {max} supported")]
    TooManyEngines { requested: usize, max: usize },
    /// Descriptor could not be built or stored
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_status_mapping() {
        assert_eq!(EngineStatus::Idle.external(), DmaStatus::Idle);
        assert_eq!(EngineStatus::Running.external(), DmaStatus::Run);
        assert_eq!(EngineStatus::Paused.external(), DmaStatus::Idle);
        assert_eq!(EngineStatus::Error.external(), DmaStatus::Error);
        assert_eq!(DmaStatus::Error.bits(), 2);
    }

    #[test]
    fn test_error_cannot_resume_directly() {
        assert!(!EngineStatus::Error.can_transition_to(EngineStatus::Running));
        assert!(!EngineStatus::Idle.can_transition_to(EngineStatus::Paused));
        assert!(EngineStatus::Error.can_transition_to(EngineStatus::Idle));
        assert!(EngineStatus::Paused.can_transition_to(EngineStatus::Running));
    }

    #[test]
    fn test_fault_codes() {
        for code in [0, 1, 2, 3, 4, 5, 6, 102, 103, 104] {
            let reason = FaultReason::from_code(code).unwrap();
            assert_eq!(reason.code(), code);
        }
        assert_eq!(FaultReason::from_code(7), None);
        assert_eq!(FaultReason::RoiError.to_string(), "DESCRIPTOR_ROI_ERROR (6)");
    }

    #[test]
    fn test_dm2_reset_value() {
        let dm2 = Dm2Config::default();
        assert_eq!(dm2.bits(), 0x2A0);
        assert_eq!(dm2.priority(), 1);
        assert!(dm2.dlbc_enabled());
        assert!(dm2.error_exception_enabled());
        assert!(!dm2.no_stall_guest());
        assert!(!dm2.ooo_write_disabled());
    }

    #[test]
    fn test_dm2_fields() {
        let dm2 = Dm2Config(0x0408_0303);
        assert!(dm2.no_stall_guest());
        assert!(dm2.no_stall_monitor());
        assert!(dm2.ooo_write_disabled());
        assert!(!dm2.dlbc_enabled());
        assert_eq!(dm2.max_outstanding_reads(), 0x08);
        assert_eq!(dm2.max_outstanding_writes(), 0x04);
    }

    #[test]
    fn test_descriptor_state_retirement() {
        assert!(DescriptorState::Done.is_retired());
        assert!(DescriptorState::ExceptError.is_retired());
        assert!(!DescriptorState::ExceptRunning.is_retired());
        assert!(DescriptorState::ExceptRunning.is_exception());
        assert!(!DescriptorState::NotDone.is_retired());
    }

    #[test]
    fn test_descriptor_state_settled() {
        assert_eq!(DescriptorState::NotDone.settled(), DescriptorState::Done);
        assert_eq!(DescriptorState::Done.settled(), DescriptorState::Done);
        assert_eq!(DescriptorState::ExceptRunning.settled(), DescriptorState::ExceptRunning);
        assert_eq!(DescriptorState::ExceptError.settled(), DescriptorState::ExceptError);
    }
}
