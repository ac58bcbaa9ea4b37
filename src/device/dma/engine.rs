//! Engine context and chain walk.
//!
//! A [`DmaEngine`] belongs to one hardware thread. It holds the status state
//! machine, the descriptor currently executing, the fault-capture registers
//! and the completion tracker, and it owns the [`DmaAdapter`] through which
//! every memory access goes.
//!
//! # Tick
//!
//! ```text
//!  tick(do_step)
//!    │
//!    ├─ Running, no exception, no pause point, not stalled?
//!    │     └─ step_chain: fetch ─► decode ─► chunk loop ─► track ─► next
//!    │
//!    └─ retire finished entries (write-back, completions)
//!          └─ nothing left in flight ─► stop (Idle)
//! ```
//!
//! A chain walk runs to completion, or to its first exception or pause point,
//! inside a single tick. There is no timing pipeline between a descriptor
//! finishing and its tracker entry settling.
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = DmaEngine::new(0, memory);
//! engine.start(0x1000_0000);
//! for done in engine.take_completions() {
//!     println!("descriptor 0x{:08x}: {:?}", done.va, done.state);
//! }
//! ```

use std::collections::VecDeque;

use smallvec::SmallVec;

use super::adapter::{Access, DmaAdapter, PmuCounter, TranslationFault};
use super::descriptor::{self, encode_back, Transform, LINEAR_SIZE, TWO_D_SIZE};
use super::timing::{InsnLatency, InsnTimer};
use super::tracker::DescriptorTracker;
use super::transfer::{ActiveDescriptor, Chunk, ChunkLimits};
use super::{DescriptorState, Dm2Config, DmaStatus, EngineStatus, FaultReason, DESC_TRACKER_CAPACITY};

/// Completions kept for [`DmaEngine::take_completions`] before the oldest
/// are dropped.
const COMPLETION_LOG_DEPTH: usize = 1024;

/// Static configuration of an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Model instruction latency
    pub timing: bool,
    /// Initial DM2 value
    pub dm2: Dm2Config,
    /// Completion tracker slots
    pub tracker_capacity: usize,
    pub limits: ChunkLimits,
    pub latency: InsnLatency,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timing: false,
            dm2: Dm2Config::RESET,
            tracker_capacity: DESC_TRACKER_CAPACITY,
            limits: ChunkLimits::default(),
            latency: InsnLatency::default(),
        }
    }
}

/// First-fault capture registers (DM4/DM5).
///
/// Only the first fault after the latch is armed is recorded. Acknowledging
/// the fault (poll/wait, or clearing DM4) arms it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCapture {
    pub captured: bool,
    pub armed: bool,
    pub reason: Option<FaultReason>,
    pub address: u32,
}

impl Default for FaultCapture {
    fn default() -> Self {
        Self { captured: false, armed: true, reason: None, address: 0 }
    }
}

impl FaultCapture {
    /// Latch a fault. Returns false when an earlier fault still holds the latch.
    pub fn record(&mut self, reason: FaultReason, address: u32) -> bool {
        if !self.armed {
            return false;
        }
        self.captured = true;
        self.armed = false;
        self.reason = Some(reason);
        self.address = address;
        true
    }

    pub fn rearm(&mut self) {
        self.armed = true;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// DM4 value: bit 0 captured, bits 7:4 engine number, bits 15:8 reason.
    pub fn dm4(&self, engine: usize) -> u32 {
        let reason = self.reason.map_or(0, |r| r.code() & 0xFF);
        u32::from(self.captured) | ((engine as u32 & 0xF) << 4) | (reason << 8)
    }
}

/// Caller-chosen stop point for precise pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetDescriptor {
    /// Descriptor to stop at (0 = none)
    pub va: u32,
    /// Stop once this many bytes of the line are left (0 = before any byte)
    pub bytes_to_write: u32,
    /// Lines left at the stop point (2D only)
    pub lines_to_write: u32,
}

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Descriptors retired as done
    pub descriptors: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub chunks: u64,
    /// Descriptors stopped by an exception
    pub exceptions: u64,
    /// Faults raised (including those dropped by the capture latch)
    pub faults: u64,
}

/// A descriptor that left the completion tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorCompletion {
    pub id: u64,
    pub va: u32,
    pub state: DescriptorState,
    /// Stopped at a pause point rather than running to the end
    pub paused: bool,
}

/// One user DMA engine.
pub struct DmaEngine<A: DmaAdapter> {
    /// Engine number (hardware thread)
    pub(super) num: usize,

    /// Internal status; the external status is derived from it
    pub(super) status: EngineStatus,

    /// Processor cycle seen by the last tick
    pub(super) tick_count: u64,

    /// Descriptor being executed (or last executed)
    pub(super) active: ActiveDescriptor,

    /// Stop point for precise pause
    pub(super) target: TargetDescriptor,

    /// Next descriptor to fetch (0 = none)
    pub(super) desc_new: u32,

    /// The next fetch replaces the tracker head instead of adding an entry
    pub(super) desc_restart: bool,

    /// Descriptor at which the chain stopped, reported by dmpause
    pub(super) pause_va: u32,

    /// A pause point was reached and not yet acknowledged
    pub(super) pause_pending: bool,

    /// An exception is waiting to be taken by poll/wait
    pub(super) exception_pending: bool,

    /// Descriptor that raised the pending exception
    pub(super) exception_va: u32,

    /// Data address that failed translation
    pub(super) exception_badva: u32,

    pub(super) fault: FaultCapture,

    /// DM2 mode register
    pub(super) dm2: Dm2Config,

    pub(super) timing: bool,
    pub(super) timer: InsnTimer,
    pub(super) latency: InsnLatency,

    pub(super) tracker: DescriptorTracker,
    pub(super) limits: ChunkLimits,
    pub(super) adapter: A,
    pub(super) stats: EngineStats,
    pub(super) completions: VecDeque<DescriptorCompletion>,
}

impl<A: DmaAdapter> DmaEngine<A> {
    /// Create engine `num` with the reset configuration.
    pub fn new(num: usize, adapter: A) -> Self {
        Self::with_config(num, adapter, EngineConfig::default())
    }

    pub fn with_config(num: usize, adapter: A, config: EngineConfig) -> Self {
        log::debug!(
            "DMA {}: created (timing={} dm2=0x{:08x} tracker={})",
            num,
            config.timing,
            config.dm2.bits(),
            config.tracker_capacity
        );
        Self {
            num,
            status: EngineStatus::Idle,
            tick_count: 0,
            active: ActiveDescriptor::default(),
            target: TargetDescriptor::default(),
            desc_new: 0,
            desc_restart: false,
            pause_va: 0,
            pause_pending: false,
            exception_pending: false,
            exception_va: 0,
            exception_badva: 0,
            fault: FaultCapture::default(),
            dm2: config.dm2,
            timing: config.timing,
            timer: InsnTimer::new(),
            latency: config.latency,
            tracker: DescriptorTracker::new(config.tracker_capacity),
            limits: config.limits,
            adapter,
            stats: EngineStats::default(),
            completions: VecDeque::new(),
        }
    }

    #[inline]
    pub fn num(&self) -> usize {
        self.num
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn into_adapter(self) -> A {
        self.adapter
    }

    #[inline]
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// Status as seen through DM0.
    #[inline]
    pub fn external_status(&self) -> DmaStatus {
        self.status.external()
    }

    pub fn dm2(&self) -> Dm2Config {
        self.dm2
    }

    pub fn fault(&self) -> &FaultCapture {
        &self.fault
    }

    pub fn active(&self) -> &ActiveDescriptor {
        &self.active
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn tracker(&self) -> &DescriptorTracker {
        &self.tracker
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn timing(&self) -> bool {
        self.timing
    }

    pub fn exception_pending(&self) -> bool {
        self.exception_pending
    }

    pub fn exception_va(&self) -> u32 {
        self.exception_va
    }

    pub fn exception_badva(&self) -> u32 {
        self.exception_badva
    }

    pub fn pause_va(&self) -> u32 {
        self.pause_va
    }

    /// In error, or holding an exception the owning thread has not taken.
    pub fn in_error(&self) -> bool {
        self.external_status() == DmaStatus::Error || self.exception_pending
    }

    /// Drain the descriptors retired since the last call, oldest first.
    pub fn take_completions(&mut self) -> Vec<DescriptorCompletion> {
        self.completions.drain(..).collect()
    }

    /// Move to `next` if the state diagram allows it.
    pub(super) fn set_status(&mut self, next: EngineStatus) -> bool {
        if !self.status.can_transition_to(next) {
            log::warn!("DMA {}: ignoring illegal transition {:?} -> {:?}", self.num, self.status, next);
            return false;
        }
        if self.status != next {
            log::trace!("DMA {}: {:?} -> {:?}", self.num, self.status, next);
        }
        self.status = next;
        true
    }

    /// Go idle, dropping the active descriptor and any stop point.
    pub fn stop(&mut self) {
        log::debug!("DMA {}: stop", self.num);
        self.set_status(EngineStatus::Idle);
        self.active.va = 0;
        self.active.exception = false;
        self.active.state = DescriptorState::NotDone;
        self.target.va = 0;
        self.pause_va = 0;
        self.pause_pending = false;
    }

    /// Enter the error state and latch the fault if the latch is armed.
    pub(super) fn set_dma_error(&mut self, addr: u32, reason: FaultReason) {
        self.set_status(EngineStatus::Error);
        self.stats.faults += 1;

        if self.fault.record(reason, addr) {
            log::warn!("DMA {}: entering error state: {} va=0x{:08x}", self.num, reason, addr);
        } else {
            log::debug!(
                "DMA {}: fault {} at 0x{:08x} dropped, {:?} still latched",
                self.num,
                reason,
                addr,
                self.fault.reason
            );
        }

        if self.dm2.error_exception_enabled() {
            self.exception_pending = true;
            self.adapter.raise_error_exception(addr, reason);
        }
    }

    /// Raise a fault as if the hardware had detected it.
    pub fn force_error(&mut self, addr: u32, reason: FaultReason) {
        log::debug!("DMA {}: forced {} at 0x{:08x}", self.num, reason, addr);
        self.set_dma_error(addr, reason);
    }

    /// Stop the chain walk at `va` once `bytes_to_write` bytes (and, for 2D,
    /// `lines_to_write` lines) are left. `va == 0` clears the stop point.
    pub fn target_descriptor(&mut self, va: u32, bytes_to_write: u32, lines_to_write: u32) {
        self.target.va = va;
        if va != 0 {
            self.target.bytes_to_write = bytes_to_write;
            self.target.lines_to_write = lines_to_write;
        }
    }

    pub fn set_timing(&mut self, on: bool) {
        self.timing = on;
    }

    /// An address-space tag was invalidated. Translations are never cached here.
    pub fn tlb_invalidate(&mut self, asid: u32) {
        log::trace!("DMA {}: tlb invalidate asid={}", self.num, asid);
    }

    pub fn tlb_invalidate_all(&mut self) {
        log::trace!("DMA {}: tlb invalidate all", self.num);
    }

    /// Advance the engine by one tick.
    pub fn tick(&mut self, do_step: bool) {
        self.tick_count = self.adapter.current_pcycle();

        if do_step
            && self.status == EngineStatus::Running
            && !self.exception_pending
            && !self.pause_pending
        {
            if self.stalled() {
                log::trace!("DMA {}: stalled by CPU mode (DM2=0x{:08x})", self.num, self.dm2.bits());
            } else {
                self.step_chain();
            }
        }

        self.release_retired();
    }

    fn stalled(&self) -> bool {
        let dm2 = self.dm2;
        (self.adapter.in_guest_mode() && !dm2.no_stall_guest())
            || (self.adapter.in_monitor_mode() && !dm2.no_stall_monitor())
            || (self.adapter.in_debug_mode() && dm2.no_cont_debug())
    }

    fn step_chain(&mut self) {
        self.pause_va = 0;
        self.active.pause = false;

        while self.desc_new != 0 {
            let va = self.desc_new;
            log::debug!("DMA {}: tick {}: fetching descriptor 0x{:08x} restart={}",
                self.num, self.tick_count, va, self.desc_restart);
            self.desc_new = 0;

            let Some(active) = self.fetch(va) else {
                let state = self.exception_state();
                self.active = ActiveDescriptor::unfetched(va, state);
                self.exception_pending = true;
                self.exception_va = va;
                self.stats.exceptions += 1;
                self.pause_va = va;
                self.track_active();
                return;
            };

            self.active = active;
            if self.active.transform().is_padding() {
                self.adapter.increment_counter(PmuCounter::PaddingDescriptor, 1);
            }
            if self.active.desc.header.order {
                self.adapter.increment_counter(PmuCounter::OrderingDescriptor, 1);
            }
            self.set_status(EngineStatus::Running);
            self.run_active();
            self.track_active();

            if self.active.stopped_early() || self.exception_pending || self.status == EngineStatus::Error {
                return;
            }
            match self.active.desc.header.next {
                0 => log::debug!("DMA {}: end of descriptor chain", self.num),
                next => self.desc_new = next,
            }
        }
    }

    fn exception_state(&self) -> DescriptorState {
        if self.status == EngineStatus::Error {
            DescriptorState::ExceptError
        } else {
            DescriptorState::ExceptRunning
        }
    }

    /// Translate, read and validate the descriptor at `va`.
    fn fetch(&mut self, va: u32) -> Option<ActiveDescriptor> {
        let base = va & !0xF;
        let translation = match self.adapter.translate(base, LINEAR_SIZE as u32, Access::Read) {
            Ok(t) => t,
            Err(fault) => {
                log::debug!("DMA {}: descriptor fetch at 0x{:08x} failed: {}", self.num, va, fault);
                self.translation_fault(fault);
                return None;
            }
        };
        if va & 0xF != 0 {
            self.adapter.increment_counter(PmuCounter::UnalignedDescriptor, 1);
        }

        let pa = translation.pa + u64::from(va & 0xF);
        let mut buf = [0u8; TWO_D_SIZE];
        self.adapter.read_bytes(pa, &mut buf[..LINEAR_SIZE]);
        let len = descriptor::encoded_len(&buf[..LINEAR_SIZE]);
        if len > LINEAR_SIZE {
            self.adapter.read_bytes(pa + LINEAR_SIZE as u64, &mut buf[LINEAR_SIZE..len]);
        }

        match descriptor::decode(pa, &buf[..len], self.dm2.dlbc_enabled()) {
            Ok(desc) => {
                log::debug!("DMA {}: descriptor 0x{:08x} pa=0x{:x}: {}", self.num, va, pa, desc);
                Some(ActiveDescriptor::new(va, pa, desc, self.limits))
            }
            Err(err) => {
                log::warn!("DMA {}: descriptor 0x{:08x} rejected: {}", self.num, va, err);
                self.set_dma_error(base, err.fault_reason());
                None
            }
        }
    }

    /// Record a failed translation. Misses are recoverable; the rest fault.
    pub(super) fn translation_fault(&mut self, fault: TranslationFault) {
        self.exception_pending = true;
        self.exception_badva = fault.va();
        match fault {
            TranslationFault::Miss { va } => {
                log::debug!("DMA {}: translation miss at 0x{:08x}", self.num, va);
                self.adapter.increment_counter(PmuCounter::TlbMiss, 1);
            }
            TranslationFault::AccessRights { va, .. } => {
                self.set_dma_error(va, FaultReason::InvalidAccessRights);
            }
            TranslationFault::Unsupported { va, .. } => {
                self.set_dma_error(va, FaultReason::UnsupportedAddress);
            }
        }
    }

    /// Move the active descriptor's bytes until it finishes, faults or
    /// reaches the stop point.
    fn run_active(&mut self) {
        loop {
            if self.target_reached() {
                log::debug!("DMA {}: stop point reached at 0x{:08x}", self.num, self.active.va);
                self.pause_va = self.active.va;
                self.pause_pending = true;
                self.active.pause = true;
                break;
            }

            let chunk = self.active.next_chunk();
            if chunk.is_empty() {
                break;
            }

            let Some((src_pa, dst_pa)) = self.translate_chunk(&chunk) else {
                self.active.exception = true;
                self.active.state = self.exception_state();
                self.exception_va = self.active.va;
                self.stats.exceptions += 1;
                log::debug!(
                    "DMA {}: descriptor 0x{:08x} stopped by exception ({:?}, badva=0x{:08x})",
                    self.num,
                    self.active.va,
                    self.active.state,
                    self.exception_badva
                );
                Self::write_back(&mut self.adapter, &self.active);
                return;
            };

            self.copy_chunk(&chunk, src_pa, dst_pa);
            self.active.advance(&chunk);
        }

        self.active.exception = false;
        self.active.state = DescriptorState::NotDone;
    }

    fn target_reached(&mut self) -> bool {
        let target = self.target;
        if target.va == 0 || target.va != self.active.va {
            return false;
        }

        let active = &self.active;
        let hit = if active.desc.is_2d() {
            ((active.lines_to_write == target.lines_to_write && active.bytes_to_write == target.bytes_to_write)
                || target.bytes_to_write == 0)
                && active.bytes_to_write != 0
        } else {
            active.bytes_to_write == target.bytes_to_write || target.bytes_to_write == 0
        };

        if hit {
            self.target.va = 0;
        }
        hit
    }

    fn translate_chunk(&mut self, chunk: &Chunk) -> Option<(u64, u64)> {
        let header = self.active.desc.header;
        let src = self.translate_side(chunk.src_va, chunk.read, Access::Read, header.src_bypass)?;
        // The odd byte of a compressed line writes nothing
        if chunk.write == 0 {
            return Some((src, 0));
        }
        let dst = self.translate_side(chunk.dst_va, chunk.write, Access::Write, header.dst_bypass)?;
        Some((src, dst))
    }

    fn translate_side(&mut self, va: u32, len: u32, access: Access, bypass: bool) -> Option<u64> {
        match self.adapter.translate(va, len, access) {
            Err(fault) => {
                self.translation_fault(fault);
                None
            }
            Ok(t) if !t.perms.contains(access.required()) => {
                self.exception_badva = va;
                self.set_dma_error(va, FaultReason::InvalidAccessRights);
                None
            }
            Ok(t) if bypass && t.mem_type.forbids_bypass() => {
                self.exception_badva = va;
                self.set_dma_error(va, FaultReason::UnsupportedBypassMode);
                None
            }
            Ok(t) => Some(t.pa),
        }
    }

    fn copy_chunk(&mut self, chunk: &Chunk, src_pa: u64, dst_pa: u64) {
        let mut data: SmallVec<[u8; 256]> = SmallVec::from_elem(0, chunk.read as usize);
        self.adapter.read_bytes(src_pa, &mut data);

        let transform = self.active.transform();
        if chunk.write == 0 {
            // Consumed without output
        } else if transform == Transform::None {
            self.adapter.write_bytes(dst_pa, &data);
        } else {
            let mut out: SmallVec<[u8; 256]> = SmallVec::from_elem(0, chunk.write as usize);
            transform.apply(&data, &mut out);
            self.adapter.write_bytes(dst_pa, &out);
        }

        if chunk.read != 0 && src_pa & (u64::from(chunk.read) - 1) != 0 {
            self.adapter.increment_counter(PmuCounter::UnalignedRd, 1);
        }
        if chunk.write != 0 && dst_pa & (u64::from(chunk.write) - 1) != 0 {
            self.adapter.increment_counter(PmuCounter::UnalignedWr, 1);
        }

        self.stats.chunks += 1;
        self.stats.bytes_read += u64::from(chunk.read);
        self.stats.bytes_written += u64::from(chunk.write);
        log::trace!(
            "DMA {}: chunk 0x{:08x} -> 0x{:08x} rd={} wr={}",
            self.num,
            chunk.src_va,
            chunk.dst_va,
            chunk.read,
            chunk.write
        );
    }

    /// Hand the active descriptor to the tracker and settle it.
    fn track_active(&mut self) {
        let id = if std::mem::take(&mut self.desc_restart) {
            match self.tracker.restart_head(self.active.clone()) {
                Some(id) => id,
                None => {
                    log::warn!("DMA {}: restart with an empty tracker", self.num);
                    self.insert_active()
                }
            }
        } else {
            self.insert_active()
        };

        self.active.id = id;
        self.adapter.descriptor_started(id, self.active.va);
        if let Some(state) = self.tracker.complete(id) {
            log::trace!("DMA {}: descriptor 0x{:08x} id={} settled {:?}", self.num, self.active.va, id, state);
        }
    }

    fn insert_active(&mut self) -> u64 {
        if self.tracker.is_full() {
            log::debug!("DMA {}: tracker full, retiring in place", self.num);
            self.retire_done();
        }
        match self.tracker.insert(self.active.clone()) {
            Ok(id) => id,
            Err(full) => {
                log::warn!("DMA {}: {}; descriptor 0x{:08x} not tracked", self.num, full, self.active.va);
                0
            }
        }
    }

    /// Retire settled entries, and go idle once nothing is left in flight.
    fn release_retired(&mut self) {
        self.retire_done();

        if self.status == EngineStatus::Running
            && self.desc_new == 0
            && self.tracker.is_empty()
            && !self.exception_pending
            && !self.pause_pending
        {
            self.stop();
        }
    }

    fn retire_done(&mut self) {
        for entry in self.tracker.pop_done() {
            let mut desc = entry.desc;
            if desc.state == DescriptorState::Done && !desc.stopped_early() {
                desc.desc.header.done = true;
                self.adapter.increment_counter(PmuCounter::DescDone, 1);
                self.stats.descriptors += 1;
            }
            Self::write_back(&mut self.adapter, &desc);
            self.adapter.descriptor_finished(entry.id, desc.va, desc.state);
            log::debug!(
                "DMA {}: released descriptor 0x{:08x} id={} state={:?} pause={}",
                self.num,
                desc.va,
                entry.id,
                desc.state,
                desc.pause
            );

            if self.completions.len() == COMPLETION_LOG_DEPTH {
                self.completions.pop_front();
            }
            self.completions.push_back(DescriptorCompletion {
                id: entry.id,
                va: desc.va,
                state: desc.state,
                paused: desc.pause,
            });
        }
    }

    /// Drop entries still waiting for a retry; their progress is already in memory.
    pub(super) fn abandon_in_flight(&mut self) {
        let abandoned = self.tracker.abandon_exceptions();
        if abandoned > 0 {
            log::debug!("DMA {}: abandoned {} excepted descriptor(s)", self.num, abandoned);
        }
        self.retire_done();
    }

    fn write_back(adapter: &mut A, entry: &ActiveDescriptor) {
        let Some(pa) = entry.pa else {
            return;
        };
        for (addr, word) in encode_back(pa, &entry.desc, entry.stopped_early()) {
            adapter.write_bytes(addr, &word.to_le_bytes());
        }
    }

    /// Re-run the oldest excepted descriptor after its cause was fixed.
    ///
    /// The tracker entry is updated in place, keeping its id. In the error
    /// state the fault must have been taken first; the engine then restarts
    /// from idle. Returns the descriptor retried, or 0.
    pub fn retry_after_exception(&mut self) -> u32 {
        if self.status == EngineStatus::Idle || self.exception_pending {
            return 0;
        }
        let Some(head) = self.tracker.peek_head() else {
            return 0;
        };
        if !head.desc.exception || head.desc.state == DescriptorState::NotDone {
            return 0;
        }
        let va = head.desc.va;

        match self.status {
            EngineStatus::Running => {}
            EngineStatus::Error => {
                self.stop();
                self.fault.rearm();
                self.set_status(EngineStatus::Running);
            }
            EngineStatus::Idle | EngineStatus::Paused => return 0,
        }

        log::debug!("DMA {}: retrying descriptor 0x{:08x} after exception", self.num, va);
        self.active.va = va;
        self.desc_new = va;
        self.desc_restart = true;
        self.tick(true);
        va
    }

    /// Whether the chain has reached descriptor `va` (or the stop point, if one is set).
    pub(super) fn reached_descriptor(&self, va: u32) -> bool {
        let want = if self.target.va != 0 { self.target.va } else { va };
        want != 0 && self.active.va == want
    }
}

impl<A: DmaAdapter> std::fmt::Debug for DmaEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaEngine")
            .field("num", &self.num)
            .field("status", &self.status)
            .field("active_va", &format_args!("0x{:08x}", self.active.va))
            .field("desc_new", &format_args!("0x{:08x}", self.desc_new))
            .field("exception_pending", &self.exception_pending)
            .field("tracked", &self.tracker.len())
            .field("fault", &self.fault)
            .finish()
    }
}

impl<A: DmaAdapter> std::fmt::Display for DmaEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DMA {}: {:?} active=0x{:08x} tracked={} bytes={}",
            self.num,
            self.status,
            self.active.va,
            self.tracker.len(),
            self.stats.bytes_written
        )?;
        if let Some(reason) = self.fault.reason {
            write!(f, " fault={} @0x{:08x}", reason, self.fault.address)?;
        }
        Ok(())
    }
}
