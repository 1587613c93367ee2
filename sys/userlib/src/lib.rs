// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User application support library.
//!
//! This contains the syscall stubs for code running *inside* a process,
//! and re-exports the contents of the `abi` crate that gets shared with
//! the kernel. Everything here may be called from a user task body and
//! nowhere else; kernel tasks and the idle context use the kernel's own
//! `os_*` API instead.
//!
//! # Syscall stub implementations
//!
//! On a bare-metal port each stub would be a hand-written trap sequence:
//! marshal the arguments into registers, execute the trap instruction, and
//! unmarshal the results. On the hosted port the "trap" is a plain call
//! into the kernel's trap entry point -- same numbering, same argument
//! words, same non-returning behavior for the calls that end the task.
//! Keeping the numeric interface identical is the point: these wrappers
//! are the ABI's reference user.

#![cfg_attr(target_os = "none", no_std)]

pub use abi::*;

use abi::Sysnum;

fn trap(nr: Sysnum, args: [usize; 3]) -> usize {
    kern::syscalls::user_trap(nr as u32, args)
}

/// Triggers the event named `id`.
///
/// Returns `true` if the activation was accepted; `false` means the event
/// was not idle and the activation was counted as lost. Naming an ID that
/// does not exist, or an event whose minimum triggering process outranks
/// the caller, aborts the calling task.
pub fn trigger_event(id: EventId) -> bool {
    trap(Sysnum::TriggerEvent, [id.0 as usize, 0, 0]) != 0
}

/// Runs the task described by `desc` in its owning process, at the
/// caller's current priority, and returns its result. The caller blocks
/// for the duration -- this is a function call that happens to cross a
/// protection boundary.
///
/// Returns the callee's result, or [`TASK_ABORTED`] if the callee was
/// aborted. The call itself aborts the *caller* if the descriptor is not
/// readable, the caller holds no grant for the target process, or the
/// invocation recurses at a non-increasing interrupt priority.
pub fn run_task(desc: &TaskDesc, arg: usize) -> i32 {
    trap(
        Sysnum::RunTask,
        [desc as *const TaskDesc as usize, arg, 0],
    ) as isize as i32
}

/// Ends the calling task immediately with `result`, exactly as if its
/// entry function had returned it. A negative `result` is counted as a
/// `UserAbort` failure of the owning process.
pub fn terminate_task(result: i32) -> ! {
    trap(Sysnum::TerminateTask, [result as isize as usize, 0, 0]);
    unreachable!("terminate_task returned");
}

/// Raises the effective priority to `ceiling` and returns the prior value
/// to pass to [`resume_all_interrupts_by_priority`]. This is the
/// priority-ceiling mutual-exclusion lock: while raised, no event at or
/// below the ceiling can launch tasks.
///
/// The ceiling is capped at [`MAX_LOCKABLE_PRIORITY`]; user code cannot
/// lock out the supervisor's priority range, no matter what it asks for.
pub fn suspend_all_interrupts_by_priority(ceiling: Priority) -> Priority {
    Priority(trap(
        Sysnum::SuspendAllInterruptsByPriority,
        [ceiling.0 as usize, 0, 0],
    ) as u8)
}

/// Lowers the effective priority back to `prior`, which must come from a
/// matching [`suspend_all_interrupts_by_priority`]. Anything that was
/// deferred behind the ceiling runs before this returns. Trying to lower
/// below the task's base priority aborts the caller.
pub fn resume_all_interrupts_by_priority(prior: Priority) {
    trap(
        Sysnum::ResumeAllInterruptsByPriority,
        [prior.0 as usize, 0, 0],
    );
}

/// Suspends the process `target`, permanently. The caller must outrank
/// the target numerically and hold a suspend grant for it; otherwise the
/// caller is aborted. The target's in-flight tasks are aborted at their
/// next kernel transition, and its events stop launching tasks.
pub fn suspend_process(target: ProcId) {
    trap(Sysnum::SuspendProcess, [target.0 as usize, 0, 0]);
}
