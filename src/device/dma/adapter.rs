//! Boundary between the DMA engine and the rest of the system.
//!
//! The engine never touches memory, the MMU or the performance monitor
//! directly. Everything goes through a [`DmaAdapter`] owned by the engine:
//!
//! - address translation (with the memory type of the target)
//! - physical reads and writes
//! - PMU counter increments
//! - the current processor cycle and CPU mode (for stall suppression)
//! - notifications when descriptors start, finish or raise an error exception
//!
//! Only the first three are required; the rest have no-op defaults.

use bitflags::bitflags;
use thiserror::Error;

use super::{DescriptorState, FaultReason};

bitflags! {
    /// Page permissions returned by a translation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permissions: u8 {
        const USER = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
    }
}

/// Kind of memory an address resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryType {
    /// Main memory behind the AXI port
    #[default]
    Ddr,
    /// Secondary AXI port
    Axi2,
    /// AHB peripheral space
    Ahb,
    /// L2 tightly coupled memory
    L2Tcm,
    /// Vector TCM
    Vtcm,
    /// L2 interrupt controller registers
    L2Vic,
    /// Core configuration space (never DMA-able)
    InvalidCccc,
    /// Any other region the DMA may not touch
    InvalidDma,
}

impl MemoryType {
    /// Whether the DMA may target this memory at all.
    pub fn is_dma_capable(self) -> bool {
        !matches!(self, Self::InvalidCccc | Self::InvalidDma)
    }

    /// TCMs are never cached, so asking to bypass the cache is an error.
    pub fn forbids_bypass(self) -> bool {
        matches!(self, Self::L2Tcm | Self::Vtcm)
    }
}

/// Direction of an access, used for permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Descriptor fetch or source read
    Read,
    /// Destination write or descriptor write-back
    Write,
}

impl Access {
    /// Permission bit this access needs.
    pub fn required(self) -> Permissions {
        match self {
            Self::Read => Permissions::READ,
            Self::Write => Permissions::WRITE,
        }
    }
}

/// A successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub pa: u64,
    pub perms: Permissions,
    pub mem_type: MemoryType,
}

/// Why a translation failed.
///
/// A miss is recoverable: the engine raises an exception, the owning thread
/// fixes up the mapping and retries. An unsupported address is a hard fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslationFault {
    #[error("no translation for va 0x{va:08x}")]
    Miss { va: u32 },
    #[error("va 0x{va:08x} lacks {needed:?} permission")]
    AccessRights { va: u32, needed: Permissions },
    #[error("va 0x{va:08x} maps to {mem_type:?}, which the DMA cannot access")]
    Unsupported { va: u32, mem_type: MemoryType },
}

impl TranslationFault {
    /// Faulting virtual address.
    pub fn va(&self) -> u32 {
        match *self {
            Self::Miss { va } | Self::AccessRights { va, .. } | Self::Unsupported { va, .. } => va,
        }
    }

    /// True when the address can never be used by the DMA.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Performance monitor events the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PmuCounter {
    Active,
    StallDescFetch,
    StallSyncResp,
    StallTlbMiss,
    TlbMiss,
    PauseCycles,
    DmpollCycles,
    DmwaitCycles,
    SynchtCycles,
    TlbsynchCycles,
    DescDone,
    DlbcFetch,
    DlbcFetchCycles,
    UnalignedDescriptor,
    OrderingDescriptor,
    PaddingDescriptor,
    UnalignedRd,
    UnalignedWr,
    CoherentRdCycles,
    CoherentWrCycles,
    NoncoherentRdCycles,
    NoncoherentWrCycles,
    VtcmRdCycles,
    VtcmWrCycles,
    RdBufferLevelLow,
    RdBufferLevelHalf,
    RdBufferLevelHigh,
    RdBufferLevelFull,
    CmdStart,
    CmdLink,
    CmdResume,
}

impl PmuCounter {
    /// Event name as shown in PMU listings.
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "DMA_PMU_ACTIVE",
            Self::StallDescFetch => "DMA_PMU_STALL_DESC_FETCH",
            Self::StallSyncResp => "DMA_PMU_STALL_SYNC_RESP",
            Self::StallTlbMiss => "DMA_PMU_STALL_TLB_MISS",
            Self::TlbMiss => "DMA_PMU_TLB_MISS",
            Self::PauseCycles => "DMA_PMU_PAUSE_CYCLES",
            Self::DmpollCycles => "DMA_PMU_DMPOLL_CYCLES",
            Self::DmwaitCycles => "DMA_PMU_DMWAIT_CYCLES",
            Self::SynchtCycles => "DMA_PMU_SYNCHT_CYCLES",
            Self::TlbsynchCycles => "DMA_PMU_TLBSYNCH_CYCLES",
            Self::DescDone => "DMA_PMU_DESC_DONE",
            Self::DlbcFetch => "DMA_PMU_DLBC_FETCH",
            Self::DlbcFetchCycles => "DMA_PMU_DLBC_FETCH_CYCLES",
            Self::UnalignedDescriptor => "DMA_PMU_UNALIGNED_DESCRIPTOR",
            Self::OrderingDescriptor => "DMA_PMU_ORDERING_DESCRIPTOR",
            Self::PaddingDescriptor => "DMA_PMU_PADDING_DESCRIPTOR",
            Self::UnalignedRd => "DMA_PMU_UNALIGNED_RD",
            Self::UnalignedWr => "DMA_PMU_UNALIGNED_WR",
            Self::CoherentRdCycles => "DMA_PMU_COHERENT_RD_CYCLES",
            Self::CoherentWrCycles => "DMA_PMU_COHERENT_WR_CYCLES",
            Self::NoncoherentRdCycles => "DMA_PMU_NONCOHERENT_RD_CYCLES",
            Self::NoncoherentWrCycles => "DMA_PMU_NONCOHERENT_WR_CYCLES",
            Self::VtcmRdCycles => "DMA_PMU_VTCM_RD_CYCLES",
            Self::VtcmWrCycles => "DMA_PMU_VTCM_WR_CYCLES",
            Self::RdBufferLevelLow => "DMA_PMU_RD_BUFFER_LEVEL_LOW",
            Self::RdBufferLevelHalf => "DMA_PMU_RD_BUFFER_LEVEL_HALF",
            Self::RdBufferLevelHigh => "DMA_PMU_RD_BUFFER_LEVEL_HIGH",
            Self::RdBufferLevelFull => "DMA_PMU_RD_BUFFER_LEVEL_FULL",
            Self::CmdStart => "DMA_PMU_CMD_START",
            Self::CmdLink => "DMA_PMU_CMD_LINK",
            Self::CmdResume => "DMA_PMU_CMD_RESUME",
        }
    }
}

/// Everything the engine needs from its environment.
///
/// Implementations shared between several engines must serialize their own
/// mutation; the engine assumes each call is atomic.
pub trait DmaAdapter {
    /// Translate a virtual address for an access of `len` bytes.
    fn translate(&mut self, va: u32, len: u32, access: Access) -> Result<Translation, TranslationFault>;

    /// Fill `buf` from physical memory.
    fn read_bytes(&mut self, pa: u64, buf: &mut [u8]);

    /// Store `data` to physical memory.
    fn write_bytes(&mut self, pa: u64, data: &[u8]);

    /// Bump a performance counter.
    fn increment_counter(&mut self, _counter: PmuCounter, _amount: u64) {}

    /// Current processor cycle.
    fn current_pcycle(&self) -> u64 {
        0
    }

    fn in_guest_mode(&self) -> bool {
        false
    }

    fn in_monitor_mode(&self) -> bool {
        false
    }

    fn in_debug_mode(&self) -> bool {
        false
    }

    /// A descriptor entered the completion tracker.
    fn descriptor_started(&mut self, _id: u64, _va: u32) {}

    /// A descriptor left the completion tracker.
    fn descriptor_finished(&mut self, _id: u64, _va: u32, _state: DescriptorState) {}

    /// A fault was captured while error exceptions are enabled in DM2.
    fn raise_error_exception(&mut self, _badva: u32, _reason: FaultReason) {}
}

impl<A: DmaAdapter + ?Sized> DmaAdapter for Box<A> {
    fn translate(&mut self, va: u32, len: u32, access: Access) -> Result<Translation, TranslationFault> {
        (**self).translate(va, len, access)
    }

    fn read_bytes(&mut self, pa: u64, buf: &mut [u8]) {
        (**self).read_bytes(pa, buf)
    }

    fn write_bytes(&mut self, pa: u64, data: &[u8]) {
        (**self).write_bytes(pa, data)
    }

    fn increment_counter(&mut self, counter: PmuCounter, amount: u64) {
        (**self).increment_counter(counter, amount)
    }

    fn current_pcycle(&self) -> u64 {
        (**self).current_pcycle()
    }

    fn in_guest_mode(&self) -> bool {
        (**self).in_guest_mode()
    }

    fn in_monitor_mode(&self) -> bool {
        (**self).in_monitor_mode()
    }

    fn in_debug_mode(&self) -> bool {
        (**self).in_debug_mode()
    }

    fn descriptor_started(&mut self, id: u64, va: u32) {
        (**self).descriptor_started(id, va)
    }

    fn descriptor_finished(&mut self, id: u64, va: u32, state: DescriptorState) {
        (**self).descriptor_finished(id, va, state)
    }

    fn raise_error_exception(&mut self, badva: u32, reason: FaultReason) {
        (**self).raise_error_exception(badva, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_capabilities() {
        assert!(MemoryType::Ddr.is_dma_capable());
        assert!(MemoryType::Vtcm.is_dma_capable());
        assert!(!MemoryType::InvalidDma.is_dma_capable());
        assert!(!MemoryType::InvalidCccc.is_dma_capable());

        assert!(MemoryType::Vtcm.forbids_bypass());
        assert!(MemoryType::L2Tcm.forbids_bypass());
        assert!(!MemoryType::Ddr.forbids_bypass());
    }

    #[test]
    fn test_translation_fault_kinds() {
        let miss = TranslationFault::Miss { va: 0x4000 };
        assert_eq!(miss.va(), 0x4000);
        assert!(!miss.is_unsupported());

        let bad = TranslationFault::Unsupported { va: 0x8000, mem_type: MemoryType::InvalidDma };
        assert!(bad.is_unsupported());
        assert!(bad.to_string().contains("0x00008000"));
    }

    #[test]
    fn test_access_permissions() {
        let rw = Permissions::READ | Permissions::WRITE;
        assert!(rw.contains(Access::Read.required()));
        assert!(!Permissions::READ.contains(Access::Write.required()));
    }

    #[test]
    fn test_pmu_names() {
        assert_eq!(PmuCounter::DescDone.name(), "DMA_PMU_DESC_DONE");
        assert_eq!(PmuCounter::CmdResume.name(), "DMA_PMU_CMD_RESUME");
    }
}
