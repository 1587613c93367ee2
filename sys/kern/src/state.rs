// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel state, as one value.
//!
//! Everything the scheduler, the event registry, the process table and the
//! syscall layer mutate lives in a single [`Kernel`] struct. The port owns
//! exactly one instance and hands out short-lived `&mut` borrows through
//! `arch::with_kernel`, which insists that the preemption gate is held.
//! That turns the interrupt-masking discipline of the original design into
//! something the borrow checker can see: state is only reachable inside a
//! critical section, and a critical section cannot outlive its borrow.

use abi::{Priority, ProcId, MAX_EVENT_PRIORITY};

use crate::event::EventTable;
use crate::proc::ProcessTable;
use crate::task::{FrameStack, TaskTable};
use crate::time::Clock;

/// Index value meaning "no event": used for the in-progress slot while the
/// idle context runs, and for the pending-event hint while nothing is
/// pending. Compares greater than every real slot index, which is exactly
/// what the hint update wants.
pub(crate) const NO_EVENT: usize = usize::MAX;

pub(crate) struct Kernel {
    pub(crate) events: EventTable,
    pub(crate) tasks: TaskTable,
    pub(crate) procs: ProcessTable,
    pub(crate) clock: Clock,

    /// Priority the current context executes at. Tracks the priority of the
    /// event being serviced, raised transiently by the ceiling protocol;
    /// 0 while the idle context runs.
    pub(crate) current_priority: Priority,
    /// Slot index of the event whose tasks are running, or `NO_EVENT`.
    pub(crate) current_event: usize,
    /// Slot index of the most urgent event triggered from interrupt context
    /// since the last scheduler pass, or `NO_EVENT`. Consumed by the
    /// interrupt epilogue.
    pub(crate) pending_event: usize,
    /// Lowest interrupt priority at which the next nested `run_task` may
    /// enter. Raised past the current level on entry and restored on exit,
    /// bounding recursion (and therefore kernel stack use) by the number of
    /// interrupt priority levels.
    pub(crate) run_task_floor: u8,
    /// Stack of live user-task activations, innermost last.
    pub(crate) frames: FrameStack,
    /// Numerically highest process ID actually used by the application;
    /// that process is the supervisor. Computed during startup validation.
    pub(crate) max_pid_in_use: ProcId,
    /// Set once startup validation has passed and the clock is running.
    /// Configuration calls are rejected from then on.
    pub(crate) live: bool,
}

impl Kernel {
    pub(crate) fn new() -> Self {
        Self {
            events: EventTable::new(),
            tasks: TaskTable::new(),
            procs: ProcessTable::new(),
            clock: Clock::halted(),
            // Until startup completes, sit above every event priority so
            // that triggers out of init code are recorded but deferred.
            current_priority: Priority(MAX_EVENT_PRIORITY + 1),
            current_event: NO_EVENT,
            pending_event: NO_EVENT,
            run_task_floor: 0,
            frames: FrameStack::new(),
            max_pid_in_use: ProcId::KERNEL,
            live: false,
        }
    }
}
