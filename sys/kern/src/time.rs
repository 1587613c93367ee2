// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.
//!
//! Kernel time is a 32-bit tick counter that wraps. All "has this moment
//! arrived yet" questions are answered with a half-range signed comparison,
//! which stays correct across the wrap as long as the two instants being
//! compared are less than half the counter range apart. Event cycle times
//! and deadline budgets are bounded well below that
//! ([`abi::EVENT_TIME_MASK`], [`abi::MAX_TASK_BUDGET_US`]), so the
//! comparison is never ambiguous in practice.

use abi::TICK_PERIOD_US;

/// The kernel clock.
///
/// Until the kernel goes live the step size is 0, so the clock is created
/// halted; `start` both zeroes the counter and sets the step, inside the
/// final startup critical section, so no reader can ever observe a
/// pre-start sentinel value.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Clock {
    now: u32,
    step: u32,
}

impl Clock {
    pub(crate) const fn halted() -> Self {
        Self { now: 0, step: 0 }
    }

    /// Current kernel time in ticks.
    pub(crate) fn now(&self) -> u32 {
        self.now
    }

    /// Whether the clock has been started.
    pub(crate) fn is_running(&self) -> bool {
        self.step != 0
    }

    /// Zeroes the counter and begins advancing by one tick per timer
    /// interrupt.
    pub(crate) fn start(&mut self) {
        self.now = 0;
        self.step = 1;
    }

    /// Advances by one step. Called from the timer interrupt only.
    pub(crate) fn advance(&mut self) {
        self.now = self.now.wrapping_add(self.step);
    }
}

/// Half-range comparison: true once `now` has reached or passed `due`.
pub(crate) fn is_due(due: u32, now: u32) -> bool {
    due.wrapping_sub(now) as i32 <= 0
}

/// Half-range comparison: true once `now` is strictly past `deadline`,
/// i.e. the budgeted amount of wall-clock time has been fully consumed.
pub(crate) fn deadline_missed(deadline: u32, now: u32) -> bool {
    now.wrapping_sub(deadline) as i32 > 0
}

/// Converts a microsecond budget into ticks, rounding up so a nonzero
/// budget never becomes an instantly-expired zero.
pub(crate) fn us_to_ticks(us: u32) -> u32 {
    us.div_ceil(TICK_PERIOD_US)
}
