//! Command surface.
//!
//! These are the DMA instructions a hardware thread issues. Each takes and
//! returns plain integers. Commands that have to block hand back an
//! [`InsnChecker`] instead of spinning; the caller re-evaluates it with
//! [`DmaEngine::check`] (ticking the engine in between) until it holds.
//!
//! | Command           | Value returned                                  |
//! |-------------------|-------------------------------------------------|
//! | `start`           | 0                                               |
//! | `link`            | 0                                               |
//! | `poll`            | head or exception address \| DM0 status         |
//! | `wait`            | exception address (if any) \| DM0 status        |
//! | `wait_descriptor` | control word of the active descriptor           |
//! | `pause`           | descriptor at the pause point \| DM0 status     |
//! | `resume`          | 0                                               |
//! | `cfgrd`           | register value                                  |
//!
//! `start`, `link` and `resume` do nothing while the engine is in error.

use super::adapter::{Access, DmaAdapter, PmuCounter};
use super::descriptor::LINEAR_SIZE;
use super::engine::DmaEngine;
use super::timing::TimerState;
use super::{Dm2Config, DmaStatus, EngineStatus, FaultReason};

/// DM0: status and active descriptor.
pub const CFG_STATUS: u32 = 0;
/// DM2: mode register.
pub const CFG_MODE: u32 = 2;
/// DM4: fault syndrome.
pub const CFG_SYNDROME: u32 = 4;
/// DM5: fault address.
pub const CFG_BADVA: u32 = 5;

/// Condition the issuing thread blocks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnChecker {
    /// Instruction latency still counting down; re-issue once satisfied
    Latency,
    /// dmwait: the engine leaves the running state or raises an exception
    Wait,
    /// The chain reaches this descriptor
    WaitDescriptor(u32),
    /// dmpause: in-flight descriptors have drained
    Pause,
}

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandResult {
    /// Value written to the destination register
    pub value: u32,
    /// The command took a pending exception
    pub exception: bool,
    /// The thread must block until this holds
    pub checker: Option<InsnChecker>,
}

impl CommandResult {
    fn value(value: u32) -> Self {
        Self { value, ..Default::default() }
    }

    fn stall(checker: InsnChecker) -> Self {
        Self { checker: Some(checker), ..Default::default() }
    }

    /// True when the thread can continue straight away.
    pub fn is_complete(&self) -> bool {
        self.checker.is_none()
    }
}

impl<A: DmaAdapter> DmaEngine<A> {
    /// Run `command` once its instruction latency has elapsed.
    fn gated(
        &mut self,
        cycles: u32,
        pmu: Option<PmuCounter>,
        command: impl FnOnce(&mut Self) -> CommandResult,
    ) -> CommandResult {
        if self.timer.gate(self.timing, cycles, pmu) {
            return CommandResult::stall(InsnChecker::Latency);
        }
        let result = command(self);
        self.timer.finish();
        result
    }

    fn rejected_in_error(&self, command: &str) -> bool {
        if self.external_status() == DmaStatus::Error {
            log::debug!("DMA {}: {} ignored in error state", self.num, command);
            return true;
        }
        false
    }

    /// The thread takes the pending exception; the next fault can latch.
    fn take_exception(&mut self) -> bool {
        if !self.exception_pending {
            return false;
        }
        self.exception_pending = false;
        self.fault.rearm();
        true
    }

    /// Re-evaluate a checker. Returns true once the thread may continue.
    pub fn check(&mut self, checker: InsnChecker) -> bool {
        match checker {
            InsnChecker::Latency => {
                if self.timer.state() == TimerState::Active {
                    if let Some(counter) = self.timer.pmu() {
                        self.adapter.increment_counter(counter, 1);
                    }
                }
                self.timer.tick()
            }
            InsnChecker::Wait => {
                let done = matches!(self.external_status(), DmaStatus::Idle | DmaStatus::Error)
                    || self.exception_pending
                    || self.pause_pending;
                if !done {
                    self.adapter.increment_counter(PmuCounter::DmwaitCycles, 1);
                }
                done
            }
            InsnChecker::WaitDescriptor(va) => self.exception_pending || self.reached_descriptor(va),
            InsnChecker::Pause => {
                let done = self.tracker.is_empty();
                if !done {
                    self.adapter.increment_counter(PmuCounter::PauseCycles, 1);
                }
                done
            }
        }
    }

    /// dmstart: begin a new chain at `new`.
    pub fn start(&mut self, new: u32) -> CommandResult {
        if self.rejected_in_error("dmstart") {
            return CommandResult::default();
        }
        self.gated(self.latency.start, None, |engine| {
            if engine.status == EngineStatus::Running {
                engine.set_dma_error(new, FaultReason::CommandInRunState);
                return CommandResult::default();
            }
            log::debug!("DMA {}: dmstart 0x{:08x}", engine.num, new);
            engine.set_status(EngineStatus::Running);
            engine.active.va = new;
            engine.desc_new = new;
            engine.desc_restart = false;
            engine.adapter.increment_counter(PmuCounter::CmdStart, 1);
            engine.tick(true);
            CommandResult::default()
        })
    }

    /// dmlink: append `new` after the descriptor at `cur`.
    pub fn link(&mut self, cur: u32, new: u32) -> CommandResult {
        if self.rejected_in_error("dmlink") {
            return CommandResult::default();
        }
        self.gated(self.latency.link, None, |engine| engine.link_now(cur, new))
    }

    fn link_now(&mut self, cur: u32, new: u32) -> CommandResult {
        log::debug!("DMA {}: dmlink cur=0x{:08x} new=0x{:08x} ({:?})", self.num, cur, new, self.status);

        if matches!(self.status, EngineStatus::Running | EngineStatus::Paused) {
            if cur != 0 {
                if !self.tail_translates(cur) {
                    return CommandResult { exception: true, ..Default::default() };
                }
                if self.status == EngineStatus::Paused {
                    self.set_status(EngineStatus::Running);
                    if new != 0 {
                        self.active.va = new;
                        self.desc_new = new;
                        self.desc_restart = false;
                    }
                } else if new != 0 && self.desc_new == 0 && !self.pause_pending && !self.exception_pending {
                    self.desc_new = new;
                    self.desc_restart = false;
                }
                self.adapter.increment_counter(PmuCounter::CmdLink, 1);
                self.tick(true);
                return CommandResult::default();
            }

            // A null tail starts over with a fresh chain
            self.abandon_in_flight();
            self.stop();
        }

        if new != 0 {
            if cur != 0 && !self.tail_translates(cur) {
                return CommandResult { exception: true, ..Default::default() };
            }
            self.set_status(EngineStatus::Running);
            self.active.va = new;
            self.desc_new = new;
            self.desc_restart = false;
        }
        self.adapter.increment_counter(PmuCounter::CmdLink, 1);
        self.tick(true);
        CommandResult::default()
    }

    fn tail_translates(&mut self, cur: u32) -> bool {
        match self.adapter.translate(cur & !0xF, LINEAR_SIZE as u32, Access::Read) {
            Ok(_) => true,
            Err(fault) => {
                log::debug!("DMA {}: dmlink tail 0x{:08x}: {}", self.num, cur, fault);
                self.exception_va = cur;
                self.translation_fault(fault);
                false
            }
        }
    }

    /// dmpoll: oldest unretired descriptor (or the exception address) and status.
    pub fn poll(&mut self) -> CommandResult {
        self.gated(self.latency.poll, Some(PmuCounter::DmpollCycles), |engine| {
            let mut result = CommandResult::value(engine.tracker.peek_head().map_or(0, |e| e.desc.va));
            if engine.take_exception() {
                result.value = engine.exception_va;
                result.exception = true;
            }
            result.value |= engine.external_status().bits();
            result
        })
    }

    /// dmwait: block until the engine stops running.
    pub fn wait(&mut self) -> CommandResult {
        self.gated(self.latency.wait, Some(PmuCounter::DmwaitCycles), |engine| {
            let mut result = CommandResult::default();
            if engine.take_exception() {
                result.exception = true;
                result.value = engine.exception_va;
            } else {
                match engine.external_status() {
                    DmaStatus::Run => result.checker = Some(InsnChecker::Wait),
                    DmaStatus::Error if engine.dm2.error_exception_enabled() => result.exception = true,
                    _ => {}
                }
            }
            engine.target.va = 0;
            result.value |= engine.external_status().bits();
            result
        })
    }

    /// Block until the chain reaches `desc` (or the stop point, if one is set).
    pub fn wait_descriptor(&mut self, desc: u32) -> CommandResult {
        let mut result = CommandResult::default();
        if self.take_exception() {
            result.exception = true;
        } else if !self.reached_descriptor(desc) {
            result.checker = Some(InsnChecker::WaitDescriptor(desc));
        }
        result.value = self.active.desc.words()[1];
        result
    }

    /// dmpause: finish in-flight work, then stop where the chain got to.
    ///
    /// Also the way out of the error state.
    pub fn pause(&mut self) -> CommandResult {
        self.gated(self.latency.pause, Some(PmuCounter::PauseCycles), |engine| {
            let mut result = CommandResult::default();
            let mut va = engine.active.va;
            let mut status = engine.external_status().bits();

            match engine.status {
                EngineStatus::Error => {
                    log::debug!("DMA {}: dmpause clears error", engine.num);
                    engine.abandon_in_flight();
                    engine.stop();
                    engine.take_exception();
                    engine.fault.rearm();
                }
                EngineStatus::Running => {
                    if !engine.pause_pending && !engine.exception_pending {
                        engine.tick(true);
                    }
                    va = if engine.exception_pending {
                        engine.exception_va
                    } else if engine.pause_va != 0 {
                        engine.pause_va
                    } else {
                        engine.active.va
                    };

                    if engine.status == EngineStatus::Running {
                        engine.set_status(EngineStatus::Paused);
                        engine.take_exception();
                        engine.abandon_in_flight();
                        if engine.timing {
                            result.checker = Some(InsnChecker::Pause);
                            status = 0;
                        }
                        if engine.pause_va == 0 && engine.active.va == 0 {
                            status = 0;
                        }
                        log::debug!("DMA {}: paused at 0x{:08x}", engine.num, va);
                        engine.pause_va = 0;
                        engine.pause_pending = false;
                        engine.active.va = 0;
                        engine.desc_new = 0;
                        engine.desc_restart = false;
                    } else {
                        status = engine.external_status().bits();
                    }
                }
                EngineStatus::Idle | EngineStatus::Paused => {}
            }

            result.value = va | status;
            result
        })
    }

    /// dmresume: continue from the descriptor at `ptr`.
    ///
    /// `ptr == 0` stops the engine. Low bits `0b10` resume in error-recovery
    /// mode, which re-arms the fault latch and reports a run-state fault.
    pub fn resume(&mut self, ptr: u32) -> CommandResult {
        if self.rejected_in_error("dmresume") {
            return CommandResult::default();
        }
        self.gated(self.latency.resume, None, |engine| {
            if engine.status == EngineStatus::Running {
                engine.set_dma_error(ptr, FaultReason::CommandInRunState);
                return CommandResult::default();
            }

            if ptr == 0 {
                engine.stop();
            } else {
                let va = ptr & !0xF;
                engine.desc_restart = false;
                engine.active.va = va;
                engine.desc_new = va;
                if ptr & 0x3 == 0x2 {
                    log::debug!("DMA {}: dmresume 0x{:08x} in recovery mode", engine.num, va);
                    engine.fault.rearm();
                    engine.set_dma_error(0, FaultReason::CommandInRunState);
                } else {
                    log::debug!("DMA {}: dmresume 0x{:08x}", engine.num, va);
                    engine.set_status(EngineStatus::Running);
                    engine.tick(true);
                }
            }
            engine.adapter.increment_counter(PmuCounter::CmdResume, 1);
            CommandResult::default()
        })
    }

    /// dmcfgrd: read configuration register `index`. Reserved indices read 0.
    pub fn cfgrd(&self, index: u32) -> u32 {
        match index {
            CFG_STATUS => self.active.va | self.external_status().bits(),
            CFG_MODE => self.dm2.bits(),
            CFG_SYNDROME => self.fault.dm4(self.num),
            CFG_BADVA => self.fault.address,
            _ => 0,
        }
    }

    /// dmcfgwr: write configuration register `index`.
    ///
    /// In the error state only DM4 accepts writes; clearing its capture bit
    /// resets the fault registers.
    pub fn cfgwr(&mut self, index: u32, value: u32) {
        if self.external_status() == DmaStatus::Error && index != CFG_SYNDROME {
            log::debug!("DMA {}: dmcfgwr {} ignored in error state", self.num, index);
            return;
        }
        match index {
            CFG_SYNDROME => {
                if value & 1 == 0 {
                    self.fault.clear();
                }
            }
            CFG_MODE => {
                log::debug!("DMA {}: DM2 0x{:08x} -> 0x{:08x}", self.num, self.dm2.bits(), value);
                self.dm2 = Dm2Config(value);
            }
            CFG_BADVA => self.fault.address = value,
            _ => {}
        }
    }

    /// dmsyncht: all transfers are already globally visible.
    pub fn syncht(&mut self) -> CommandResult {
        log::trace!("DMA {}: dmsyncht", self.num);
        CommandResult::default()
    }

    /// dmtlbsynch: no translations are cached to synchronize.
    pub fn tlbsynch(&mut self) -> CommandResult {
        log::trace!("DMA {}: dmtlbsynch", self.num);
        CommandResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dma::descriptor::Descriptor;
    use crate::device::dma::engine::EngineConfig;
    use crate::device::dma::DescriptorState;
    use crate::device::host_memory::HostMemory;

    const DESC: u32 = 0x1000_0000;
    const SRC: u32 = 0x1000_1000;
    const DST: u32 = 0x1000_4000;
    const UNMAPPED: u32 = 0x3000_0000;

    fn memory() -> HostMemory {
        let mut mem = HostMemory::new();
        mem.map_ddr("ddr", 0x1000_0000, 0x8000).unwrap();
        mem
    }

    fn engine_with(descs: &[(u32, Descriptor)]) -> DmaEngine<HostMemory> {
        let mut mem = memory();
        mem.write_bytes(u64::from(SRC), &[0x5A; 256]);
        for (va, desc) in descs {
            mem.write_bytes(u64::from(*va), &desc.to_bytes());
        }
        DmaEngine::new(0, mem)
    }

    fn stalled_engine() -> DmaEngine<HostMemory> {
        let mut engine = engine_with(&[(DESC, Descriptor::linear(SRC, DST, 32))]);
        engine.adapter_mut().set_guest_mode(true);
        engine.start(DESC);
        assert_eq!(engine.status(), EngineStatus::Running);
        engine
    }

    #[test]
    fn test_poll_takes_exception_once() {
        let mut engine = engine_with(&[]);
        engine.start(UNMAPPED);

        let first = engine.poll();
        assert!(first.exception);
        assert_eq!(first.value, UNMAPPED | DmaStatus::Run.bits());

        let second = engine.poll();
        let third = engine.poll();
        assert!(!second.exception);
        assert_eq!(second, third);
        assert_eq!(second.value, UNMAPPED | DmaStatus::Run.bits());
    }

    #[test]
    fn test_cfg_registers() {
        let mut engine = DmaEngine::new(3, memory());
        assert_eq!(engine.cfgrd(CFG_MODE), Dm2Config::RESET.bits());
        assert_eq!(engine.cfgrd(CFG_MODE), 0x2A0);
        assert_eq!(engine.cfgrd(1), 0);
        assert_eq!(engine.cfgrd(3), 0);
        assert_eq!(engine.cfgrd(CFG_SYNDROME), 0x30);

        engine.cfgwr(3, 0xFFFF_FFFF);
        assert_eq!(engine.cfgrd(3), 0);

        engine.force_error(0x40, FaultReason::InvalidAccessRights);
        assert_eq!(engine.cfgrd(CFG_STATUS), DmaStatus::Error.bits());
        assert_eq!(engine.cfgrd(CFG_SYNDROME), 0x6631);
        assert_eq!(engine.cfgrd(CFG_BADVA), 0x40);

        // Only DM4 is writable in error
        engine.cfgwr(CFG_BADVA, 0x80);
        engine.cfgwr(CFG_MODE, 0);
        assert_eq!(engine.cfgrd(CFG_BADVA), 0x40);
        assert_eq!(engine.cfgrd(CFG_MODE), 0x2A0);

        engine.cfgwr(CFG_SYNDROME, 0);
        assert_eq!(engine.cfgrd(CFG_SYNDROME), 0x30);
        assert_eq!(engine.cfgrd(CFG_BADVA), 0);
    }

    #[test]
    fn test_cfgwr_mode() {
        let mut engine = DmaEngine::new(0, memory());
        engine.cfgwr(CFG_MODE, 0x0A1);
        assert_eq!(engine.dm2(), Dm2Config(0x0A1));
        assert!(engine.dm2().no_stall_guest());
        assert!(!engine.dm2().error_exception_enabled());
    }

    #[test]
    fn test_start_rejected_in_error() {
        let mut engine = engine_with(&[(DESC, Descriptor::linear(SRC, DST, 32))]);
        engine.force_error(0, FaultReason::DataAbort);

        engine.start(DESC);
        engine.resume(DESC);
        engine.link(0, DESC);
        assert_eq!(engine.status(), EngineStatus::Error);
        assert_eq!(engine.stats().bytes_written, 0);
    }

    #[test]
    fn test_start_while_running_faults() {
        let mut engine = stalled_engine();
        engine.start(DESC + 0x10);

        assert_eq!(engine.status(), EngineStatus::Error);
        assert_eq!(engine.fault().reason, Some(FaultReason::CommandInRunState));
        assert_eq!(engine.fault().address, DESC + 0x10);
    }

    #[test]
    fn test_resume_while_running_faults() {
        let mut engine = stalled_engine();
        engine.resume(DESC);
        assert_eq!(engine.fault().reason, Some(FaultReason::CommandInRunState));
    }

    #[test]
    fn test_timing_latency() {
        let config = EngineConfig { timing: true, ..Default::default() };
        let mut engine = DmaEngine::with_config(0, memory(), config);

        let issued = engine.poll();
        assert_eq!(issued.checker, Some(InsnChecker::Latency));
        for cycle in 1..20 {
            assert!(!engine.check(InsnChecker::Latency));
            // Counted on every waiting cycle, not once at the end
            assert_eq!(engine.adapter().counter(PmuCounter::DmpollCycles), cycle);
        }
        assert!(engine.check(InsnChecker::Latency));
        assert_eq!(engine.adapter().counter(PmuCounter::DmpollCycles), 20);

        let executed = engine.poll();
        assert!(executed.is_complete());
        assert_eq!(executed.value, DmaStatus::Idle.bits());

        // The next command pays its own latency
        assert_eq!(engine.wait().checker, Some(InsnChecker::Latency));
    }

    #[test]
    fn test_timing_off_runs_immediately() {
        let mut engine = DmaEngine::new(0, memory());
        assert!(engine.poll().is_complete());
        assert!(engine.pause().is_complete());
    }

    #[test]
    fn test_wait_blocks_while_running() {
        let mut engine = stalled_engine();
        let result = engine.wait();
        assert_eq!(result.checker, Some(InsnChecker::Wait));
        assert_eq!(result.value & 0x3, DmaStatus::Run.bits());
        assert!(!engine.check(InsnChecker::Wait));

        engine.adapter_mut().set_guest_mode(false);
        engine.tick(true);
        assert!(engine.check(InsnChecker::Wait));
        assert_eq!(engine.stats().bytes_written, 32);
    }

    #[test]
    fn test_wait_takes_exception() {
        let mut engine = engine_with(&[(DESC, Descriptor::linear(SRC, UNMAPPED, 32))]);
        engine.start(DESC);

        let result = engine.wait();
        assert!(result.exception);
        assert!(result.is_complete());
        assert_eq!(result.value, DESC | DmaStatus::Run.bits());
        assert!(!engine.exception_pending());
    }

    #[test]
    fn test_wait_descriptor() {
        let descs = [
            (DESC, Descriptor::linear(SRC, DST, 16).with_next(DESC + 0x10)),
            (DESC + 0x10, Descriptor::linear(SRC, DST + 16, 16).with_next(DESC + 0x20)),
            (DESC + 0x20, Descriptor::linear(SRC, DST + 32, 16)),
        ];
        let mut engine = engine_with(&descs);
        engine.target_descriptor(DESC + 0x10, 0, 0);
        engine.start(DESC);

        let reached = engine.wait_descriptor(DESC + 0x10);
        assert!(reached.is_complete());
        assert_eq!(reached.value & 0x00FF_FFFF, 16);

        let later = engine.wait_descriptor(DESC + 0x20);
        assert_eq!(later.checker, Some(InsnChecker::WaitDescriptor(DESC + 0x20)));
        assert!(!engine.check(InsnChecker::WaitDescriptor(DESC + 0x20)));
    }

    #[test]
    fn test_pause_clears_error() {
        let mut engine = engine_with(&[(DESC, Descriptor::linear(SRC, DST, 32))]);
        engine.force_error(0x40, FaultReason::DataAbort);

        let result = engine.pause();
        assert_eq!(result.value & 0x3, DmaStatus::Error.bits());
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert!(!engine.exception_pending());

        engine.start(DESC);
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.stats().bytes_written, 32);
    }

    #[test]
    fn test_pause_abandons_excepted_descriptor() {
        let mut engine = engine_with(&[(DESC, Descriptor::linear(SRC, UNMAPPED, 32))]);
        engine.start(DESC);
        assert_eq!(engine.tracker().len(), 1);

        let result = engine.pause();
        assert_eq!(result.value & !0xF, DESC);
        assert_eq!(engine.status(), EngineStatus::Paused);
        assert!(engine.tracker().is_empty());
        assert_eq!(engine.take_completions()[0].state, DescriptorState::ExceptError);
    }

    #[test]
    fn test_pause_in_timing_mode_waits_for_drain() {
        let mut mem = memory();
        mem.write_bytes(u64::from(DESC), &Descriptor::linear(SRC, DST, 32).to_bytes());
        mem.set_guest_mode(true);
        let config = EngineConfig { timing: true, ..Default::default() };
        let mut engine = DmaEngine::with_config(0, mem, config);

        while !engine.start(DESC).is_complete() {
            while !engine.check(InsnChecker::Latency) {}
        }
        let result = loop {
            let result = engine.pause();
            if result.checker != Some(InsnChecker::Latency) {
                break result;
            }
            while !engine.check(InsnChecker::Latency) {}
        };
        assert_eq!(result.checker, Some(InsnChecker::Pause));
        assert_eq!(result.value & 0x3, 0);
        assert!(engine.check(InsnChecker::Pause));
        assert_eq!(engine.status(), EngineStatus::Paused);
    }

    #[test]
    fn test_resume_stop_and_recovery() {
        let mut engine = engine_with(&[(DESC, Descriptor::linear(SRC, DST, 32))]);
        engine.resume(0);
        assert_eq!(engine.status(), EngineStatus::Idle);

        engine.resume(DESC | 0x2);
        assert_eq!(engine.status(), EngineStatus::Error);
        assert_eq!(engine.fault().reason, Some(FaultReason::CommandInRunState));
        assert_eq!(engine.fault().address, 0);
        assert_eq!(engine.stats().bytes_written, 0);
    }

    #[test]
    fn test_link_first_descriptor_starts() {
        let mut engine = engine_with(&[(DESC, Descriptor::linear(SRC, DST, 64))]);
        engine.link(0, DESC);
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.stats().bytes_written, 64);
        assert_eq!(engine.adapter().counter(PmuCounter::CmdLink), 1);
    }

    #[test]
    fn test_link_from_paused() {
        let descs = [
            (DESC, Descriptor::linear(SRC, DST, 32)),
            (DESC + 0x10, Descriptor::linear(SRC, DST + 0x100, 32)),
        ];
        let mut engine = engine_with(&descs);
        engine.target_descriptor(DESC, 0, 0);
        engine.start(DESC);
        engine.pause();
        assert_eq!(engine.status(), EngineStatus::Paused);

        engine.link(DESC, DESC + 0x10);
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.stats().bytes_written, 32);
        let mut moved = [0u8; 32];
        engine.adapter().read_bytes(u64::from(DST + 0x100), &mut moved);
        assert_eq!(moved, [0x5A; 32]);
        let mut skipped = [0u8; 32];
        engine.adapter().read_bytes(u64::from(DST), &mut skipped);
        assert_eq!(skipped, [0; 32]);
    }

    #[test]
    fn test_link_null_tail_restarts() {
        let mut engine = stalled_engine();
        engine.adapter_mut().set_guest_mode(false);
        engine.link(0, DESC);
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.stats().bytes_written, 32);
    }

    #[test]
    fn test_link_untranslatable_tail() {
        let mut engine = stalled_engine();
        let result = engine.link(UNMAPPED, DESC + 0x10);
        assert!(result.exception);
        assert!(engine.exception_pending());
        assert_eq!(engine.exception_va(), UNMAPPED);
        assert_eq!(engine.exception_badva(), UNMAPPED);
        assert_eq!(engine.status(), EngineStatus::Running);
    }

    #[test]
    fn test_sync_commands() {
        let mut engine = DmaEngine::new(0, memory());
        assert_eq!(engine.syncht(), CommandResult::default());
        assert_eq!(engine.tlbsynch(), CommandResult::default());
        engine.tlb_invalidate(5);
        engine.tlb_invalidate_all();
        assert_eq!(engine.status(), EngineStatus::Idle);
    }
}
