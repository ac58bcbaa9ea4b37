//! Instruction latency model.
//!
//! The engine has no cycle-accurate pipeline. The only timing it models is
//! how long a DMA instruction occupies the issuing thread, and only when the
//! timing switch is on:
//!
//! ```text
//!  issue #1 ──► timer Idle → Active(n), command returns Latency checker
//!  check()  ──► n-1 ... 0 → Expired (checker satisfied)
//!  issue #2 ──► timer Expired → command executes, timer back to Idle
//! ```
//!
//! With timing off every command executes on first issue.

use super::adapter::PmuCounter;

/// Per-command latency in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsnLatency {
    pub poll: u32,
    pub wait: u32,
    pub start: u32,
    pub link: u32,
    pub pause: u32,
    pub resume: u32,
}

impl InsnLatency {
    /// Latencies of the reference core.
    pub const fn reference() -> Self {
        Self { poll: 20, wait: 24, start: 20, link: 20, pause: 20, resume: 20 }
    }
}

impl Default for InsnLatency {
    fn default() -> Self {
        Self::reference()
    }
}

/// State of the instruction timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerState {
    #[default]
    Idle,
    Active,
    Expired,
    /// Timing is off
    NotUsed,
}

/// Countdown for the instruction currently being issued.
#[derive(Debug, Clone, Default)]
pub struct InsnTimer {
    state: TimerState,
    remaining: u32,
    pmu: Option<PmuCounter>,
}

impl InsnTimer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> TimerState {
        self.state
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Counter bumped on every cycle a latency checker spends waiting.
    #[inline]
    pub fn pmu(&self) -> Option<PmuCounter> {
        self.pmu
    }

    /// Gate a command on its latency.
    ///
    /// Returns true when the command has to wait (the caller installs a
    /// latency checker and re-issues it later); false when it may execute.
    pub fn gate(&mut self, timing_on: bool, cycles: u32, pmu: Option<PmuCounter>) -> bool {
        if !timing_on {
            self.state = TimerState::NotUsed;
            return false;
        }
        match self.state {
            TimerState::Idle | TimerState::NotUsed => {
                if cycles == 0 {
                    self.state = TimerState::Expired;
                    return false;
                }
                self.state = TimerState::Active;
                self.remaining = cycles;
                self.pmu = pmu;
                true
            }
            TimerState::Active => true,
            TimerState::Expired => false,
        }
    }

    /// Count one cycle down. Returns true once the latency has elapsed.
    pub fn tick(&mut self) -> bool {
        if self.state == TimerState::Active {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.state = TimerState::Expired;
            }
        }
        self.state != TimerState::Active
    }

    /// The gated command has executed.
    pub fn finish(&mut self) {
        if self.state != TimerState::NotUsed {
            self.state = TimerState::Idle;
        }
        self.remaining = 0;
        self.pmu = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_latencies() {
        let lat = InsnLatency::default();
        assert_eq!(lat.poll, 20);
        assert_eq!(lat.wait, 24);
        assert_eq!(lat.resume, 20);
    }

    #[test]
    fn test_timing_off_never_gates() {
        let mut timer = InsnTimer::new();
        assert!(!timer.gate(false, 20, None));
        assert_eq!(timer.state(), TimerState::NotUsed);
    }

    #[test]
    fn test_countdown() {
        let mut timer = InsnTimer::new();
        assert!(timer.gate(true, 3, Some(PmuCounter::DmpollCycles)));
        assert_eq!(timer.state(), TimerState::Active);

        // Re-issuing while counting still waits
        assert!(timer.gate(true, 3, None));
        assert!(!timer.tick());
        assert!(!timer.tick());
        assert!(timer.tick());
        assert_eq!(timer.state(), TimerState::Expired);
        assert_eq!(timer.pmu(), Some(PmuCounter::DmpollCycles));

        // Now the command runs, and the next one is gated again
        assert!(!timer.gate(true, 3, None));
        timer.finish();
        assert_eq!(timer.state(), TimerState::Idle);
        assert!(timer.gate(true, 1, None));
    }

    #[test]
    fn test_zero_latency_runs_immediately() {
        let mut timer = InsnTimer::new();
        assert!(!timer.gate(true, 0, None));
    }
}
