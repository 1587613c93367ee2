// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! This builds on architecture-specific parts defined in the `arch::*`
//! modules: the port gets user code into [`user_trap`] with a syscall
//! number and raw argument words, and everything after that is portable.
//!
//! # Syscall implementations
//!
//! Each syscall is implemented by a function with the signature:
//!
//! ```ignore
//! fn syscall(caller: ProcId, args: [usize; 3]) -> Result<usize, UserError>;
//! ```
//!
//! On success the value becomes the trap's return value. A
//! `UserError::Unrecoverable` aborts the calling task with the given fault
//! kind -- there is no "errno" for privilege violations, by design: a task
//! that feeds the kernel garbage has already demonstrated it cannot be
//! trusted to check an error code either, and the supervisor would like to
//! hear about it.

use core::convert::TryFrom;

use abi::{
    FaultKind, Priority, ProcId, Sysnum, TaskDesc, MAX_LOCKABLE_PRIORITY,
    MAX_TASK_BUDGET_US, TASK_ABORTED,
};

use crate::arch;
use crate::err::UserError;
use crate::preempt::Section;
use crate::sched;
use crate::task;
use crate::time;
use crate::umem::USlice;

/// Entry point accessed by the port's syscall trap sequence. `nr` and
/// `args` arrive exactly as user code supplied them.
///
/// Aborting outcomes do not return: the port unwinds the calling task into
/// its launch primitive.
pub fn user_trap(nr: u32, args: [usize; 3]) -> usize {
    let caller = {
        let _section = Section::enter();
        arch::with_kernel(|k| {
            let frame = k.frames.top();
            uassert!(frame.is_some(), "syscall with no user task on CPU");
            match frame {
                // A kernel transition is where a freshly suspended
                // process's tasks get caught.
                Some(f) if !k.procs.is_running(f.pid) => {
                    Err(FaultKind::ProcessAbort)
                }
                Some(f) => Ok(f.pid),
                None => Err(FaultKind::SyscallBadArg),
            }
        })
    };
    let caller = match caller {
        Ok(pid) => pid,
        Err(kind) => arch::abort_current_task(kind),
    };

    let result = match Sysnum::try_from(nr) {
        Ok(Sysnum::TriggerEvent) => trigger_event(caller, args),
        Ok(Sysnum::RunTask) => run_task(caller, args),
        Ok(Sysnum::TerminateTask) => terminate_task(caller, args),
        Ok(Sysnum::SuspendAllInterruptsByPriority) => {
            raise_priority_by_ceiling(caller, args)
        }
        Ok(Sysnum::ResumeAllInterruptsByPriority) => {
            lower_priority(caller, args)
        }
        Ok(Sysnum::SuspendProcess) => suspend_process(caller, args),
        // Bogus syscall number! That's a fault.
        Err(()) => Err(UserError::Unrecoverable(FaultKind::SyscallBadArg)),
    };

    match result {
        Ok(v) => v,
        Err(UserError::Recoverable(code)) => code as usize,
        Err(UserError::Unrecoverable(kind)) => arch::abort_current_task(kind),
    }
}

/// Triggers an event by public ID, subject to the event's
/// minimum-triggerer rule. Returns 1 if the activation was accepted, 0 if
/// it was lost.
fn trigger_event(
    caller: ProcId,
    args: [usize; 3],
) -> Result<usize, UserError> {
    let id = abi::EventId(args[0] as u8);
    let idx = {
        let _section = Section::enter();
        arch::with_kernel(|k| {
            if args[0] > u8::MAX as usize {
                return None;
            }
            sched::resolve_trigger(k, id, caller)
        })
    }
    .ok_or(UserError::Unrecoverable(FaultKind::SyscallBadArg))?;

    Ok(sched::trigger_slot(idx) as usize)
}

/// Runs a task in another process, on the caller's priority, and hands the
/// caller its result.
///
/// The descriptor is read from caller memory after validating the caller
/// can actually read it. Authority comes from the grant bitmap; recursion
/// is bounded by requiring every nested invocation to arrive at a strictly
/// higher interrupt priority than the one before, tracked in a
/// module-floor variable touched only under the gate.
fn run_task(caller: ProcId, args: [usize; 3]) -> Result<usize, UserError> {
    let desc = USlice::<TaskDesc>::from_raw(args[0], 1)?;
    let arg = args[1];

    let (entry, owner, budget, level) = {
        let _section = Section::enter();
        arch::with_kernel(|k| {
            if !k.procs.can_read(caller, &desc) {
                return Err(UserError::Unrecoverable(FaultKind::SyscallBadArg));
            }
            // Safety: just validated against the caller's region table.
            let desc = &unsafe { desc.assume_readable() }[0];

            if !desc.owner.is_user() {
                return Err(UserError::Unrecoverable(FaultKind::SyscallBadArg));
            }
            if !k.procs.may_run_task(caller, desc.owner) {
                return Err(UserError::Unrecoverable(FaultKind::SyscallBadArg));
            }
            if desc.budget_us > MAX_TASK_BUDGET_US {
                return Err(UserError::Unrecoverable(FaultKind::SyscallBadArg));
            }
            let level = arch::current_irq_priority();
            if level < k.run_task_floor {
                // Re-entry at a non-increasing priority: this is how
                // unbounded recursion (and kernel stack exhaustion) would
                // start, so it is cut off here.
                return Err(UserError::Unrecoverable(FaultKind::SyscallBadArg));
            }
            Ok((
                desc.entry,
                desc.owner,
                time::us_to_ticks(desc.budget_us),
                level,
            ))
        })
    }?;

    let saved_floor = {
        let _section = Section::enter();
        arch::with_kernel(|k| {
            let saved = k.run_task_floor;
            k.run_task_floor = level + 1;
            saved
        })
    };

    let target_running = {
        let _section = Section::enter();
        arch::with_kernel(|k| k.procs.is_running(owner))
    };
    let outcome = if target_running {
        task::launch_user_task(entry, owner, arg, budget)
    } else {
        Err(FaultKind::ProcessAbort)
    };

    {
        let _section = Section::enter();
        arch::with_kernel(|k| k.run_task_floor = saved_floor);
    }

    let value = match outcome {
        Ok(v) => v,
        Err(_) => TASK_ABORTED,
    };
    Ok(value as isize as usize)
}

/// Ends the calling task here and now, propagating `result` to whoever
/// launched it. Negative results are counted as `UserAbort`. Never
/// returns.
fn terminate_task(
    _caller: ProcId,
    args: [usize; 3],
) -> Result<usize, UserError> {
    arch::terminate_current_task(args[0] as isize as i32)
}

/// Ceiling-protocol raise, user flavor: the ceiling is capped at
/// `MAX_LOCKABLE_PRIORITY`, so no process can lock out the supervisor's
/// event range. Returns the prior effective priority.
fn raise_priority_by_ceiling(
    _caller: ProcId,
    args: [usize; 3],
) -> Result<usize, UserError> {
    let ceiling =
        Priority((args[0] as u8).min(MAX_LOCKABLE_PRIORITY));
    let prior = sched::os_suspend_all_tasks_by_priority(ceiling);
    Ok(prior.0 as usize)
}

/// Ceiling-protocol lower, user flavor. The restore value must lie
/// between the task's base priority and the current effective priority;
/// anything else is not a lower, it is an attempt to escape the protocol.
fn lower_priority(
    _caller: ProcId,
    args: [usize; 3],
) -> Result<usize, UserError> {
    let restore = Priority(args[0] as u8);
    {
        let _section = Section::enter();
        arch::with_kernel(|k| {
            let base = match k.frames.top() {
                Some(f) => f.base_priority,
                None => Priority::IDLE,
            };
            if base.exceeds(restore) || restore.exceeds(k.current_priority) {
                Err(UserError::Unrecoverable(FaultKind::SyscallBadArg))
            } else {
                Ok(())
            }
        })
    }?;
    sched::os_resume_all_tasks_by_priority(restore);
    Ok(0)
}

/// Suspends another process. The caller must outrank the target
/// numerically *and* hold a suspend grant for it; both rules together mean
/// the supervisor can put down any process and nobody can put down the
/// supervisor.
fn suspend_process(
    caller: ProcId,
    args: [usize; 3],
) -> Result<usize, UserError> {
    let target = ProcId(args[0] as u8);
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if !target.is_user() || caller <= target {
            return Err(UserError::Unrecoverable(FaultKind::SyscallBadArg));
        }
        if !k.procs.may_suspend(caller, target) {
            return Err(UserError::Unrecoverable(FaultKind::SyscallBadArg));
        }
        k.procs.suspend(target);
        Ok(0)
    })
}
