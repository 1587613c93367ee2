// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler.
//!
//! There is no ready queue and no context to switch in the usual sense:
//! scheduling *is* function calls. Triggering an event from task context
//! calls straight into the scheduling loop, which calls the event's tasks;
//! a more urgent trigger arriving mid-task recurses the same way, so the
//! call stack at any moment is exactly the preemption nesting. Triggers
//! from interrupt context cannot call user code directly, so they leave a
//! hint that the interrupt epilogue turns into a scheduling-loop call on
//! the way out.
//!
//! The loop itself walks the priority-sorted descriptor array, most urgent
//! first, and stops at the first descriptor that does not out-prioritize
//! whatever it interrupted. Everything else -- the ceiling protocol,
//! deferred wakeups after a priority drop, the bounded equal-priority
//! rescan -- falls out of where that walk starts and what "current
//! priority" was saved on the way in.
//!
//! # Critical sections
//!
//! The walk holds the preemption gate except while task bodies run. One
//! subtlety is deliberate and load-bearing: completing an event (state back
//! to idle, follow the group link) and acknowledging the next one (state to
//! in-progress) happen inside the *same* gate span. If the gate reopened
//! between them, an interrupt could re-trigger the just-completed event and
//! call back into the loop, and every such round trip would pile another
//! scheduler frame on the stack; merging the two sections bounds the
//! recursion at one frame per priority level.

use abi::{EventId, FaultKind, Priority, ProcId};

use crate::arch;
use crate::preempt::Section;
use crate::state::{Kernel, NO_EVENT};
use crate::task::{self, TaskEntry};
use crate::time;

/// What a trigger attempt decided, under the gate, before any task runs.
enum Disposition {
    /// State became `Triggered`; an enclosing scheduler pass or a later
    /// priority drop will pick it up.
    Deferred,
    /// State became `Triggered` and the caller should run the scheduling
    /// loop now.
    RunNow,
    /// The event was not idle; the activation was counted as lost.
    Lost,
}

/// Core of the trigger operation, common to the timer, the kernel API and
/// the syscall surface. Caller holds the gate.
fn trigger_in_place(k: &mut Kernel, idx: usize, from_isr: bool) -> Disposition {
    if !k.events.slot_mut(idx).mark_triggered() {
        return Disposition::Lost;
    }
    let priority = k.events.slot(idx).priority;
    if !priority.exceeds(k.current_priority) {
        // Either a scheduler pass at this priority is already on the
        // stack and will re-check the group, or the ceiling protocol has
        // raised the floor past us. Leave the state set and walk away.
        Disposition::Deferred
    } else if from_isr {
        // Can't launch user code from an interrupt. Remember the most
        // urgent deferred event (lower slot index = more urgent) for the
        // epilogue.
        if idx < k.pending_event {
            k.pending_event = idx;
        }
        Disposition::Deferred
    } else {
        Disposition::RunNow
    }
}

/// Triggers the event in `idx`, launching its tasks immediately when the
/// context allows it. Returns false exactly when the activation was lost.
pub(crate) fn trigger_slot(idx: usize) -> bool {
    let section = Section::enter();
    let disp = arch::with_kernel(|k| {
        trigger_in_place(k, idx, arch::in_interrupt())
    });
    let section = match disp {
        Disposition::RunNow => process_triggered_events(section, idx),
        _ => section,
    };
    drop(section);
    !matches!(disp, Disposition::Lost)
}

/// Triggers an event from kernel context. No privilege gate: kernel code
/// may trigger anything. Returns false when the activation was lost.
pub fn os_trigger_event(id: EventId) -> bool {
    let idx = {
        let _section = Section::enter();
        arch::with_kernel(|k| k.events.slot_of(id))
    };
    uassert!(idx.is_some());
    match idx {
        Some(idx) => trigger_slot(idx),
        None => false,
    }
}

/// The scheduling loop: runs every triggered event more urgent than the
/// interrupted context, most urgent first.
///
/// `start` is a hint: the slot to consider first. The caller must hold the
/// gate and passes its `Section` in; the loop opens it only around task
/// execution and hands it back at the end, so the final completion and the
/// caller's subsequent cleanup share one critical section.
pub(crate) fn process_triggered_events(
    mut section: Section,
    start: usize,
) -> Section {
    enum Step {
        /// Reached a descriptor that doesn't out-prioritize the saved
        /// context (possibly the terminator). Done.
        Stop,
        /// Idle or in-progress descriptor; look at the next slot.
        Advance(usize),
        /// Acknowledged this descriptor; run its tasks.
        Launch {
            first_task: usize,
            task_count: usize,
            priority: Priority,
        },
    }

    let (saved_event, saved_priority) = arch::with_kernel(|k| {
        (k.current_event, k.current_priority)
    });

    let mut idx = start;
    loop {
        // Acknowledgment: this shares its gate span with the completion at
        // the bottom of the previous iteration.
        let step = arch::with_kernel(|k| {
            let ev = k.events.slot(idx);
            if !ev.priority.exceeds(saved_priority) {
                Step::Stop
            } else if ev.state == abi::EventState::Triggered {
                let priority = ev.priority;
                let (first_task, task_count) = (ev.first_task, ev.task_count);
                k.events.slot_mut(idx).acknowledge();
                k.current_event = idx;
                k.current_priority = priority;
                Step::Launch {
                    first_task,
                    task_count,
                    priority,
                }
            } else {
                Step::Advance(idx + 1)
            }
        });

        match step {
            Step::Stop => break,
            Step::Advance(next) => idx = next,
            Step::Launch {
                first_task,
                task_count,
                priority,
            } => {
                let (s, ()) = section
                    .open_for(|| run_task_sequence(first_task, task_count));
                section = s;

                // Completion. The launch primitive restores the base
                // priority even when a task aborts mid-ceiling, so this
                // holds unconditionally.
                idx = arch::with_kernel(|k| {
                    uassert!(k.current_priority == priority);
                    k.events.slot_mut(idx).complete();
                    k.events.slot(idx).group_link
                });
            }
        }
    }

    arch::with_kernel(|k| {
        k.current_event = saved_event;
        k.current_priority = saved_priority;
    });
    section
}

/// Runs one event's tasks in registration order. Called with the gate
/// open; takes it briefly per task to read the (frozen) tables.
fn run_task_sequence(first_task: usize, task_count: usize) {
    for i in first_task..first_task + task_count {
        let (entry, owner, budget, owner_running) = {
            let _section = Section::enter();
            arch::with_kernel(|k| {
                let t = k.tasks.task(i);
                (t.entry, t.owner, t.budget, k.procs.is_running(t.owner))
            })
        };
        match entry {
            TaskEntry::Kernel(f) => f(),
            TaskEntry::User(f) => {
                if owner_running {
                    // Failures are accounted inside the launch; an event
                    // task has no one to surface its result to.
                    let _ = task::launch_user_task(f, owner, 0, budget);
                }
                // A suspended owner's tasks are skipped without ceremony;
                // the suspension itself already charged the process.
            }
        }
    }
}

/// Interrupt epilogue: if an interrupt left a deferred-event hint, consume
/// it and run the scheduling loop. Called by the port on the return path
/// of every outermost interrupt, inside that path's closing critical
/// section.
pub(crate) fn run_isr_epilogue() {
    let section = Section::enter();
    let pending = arch::with_kernel(|k| {
        core::mem::replace(&mut k.pending_event, NO_EVENT)
    });
    let section = if pending != NO_EVENT {
        process_triggered_events(section, pending)
    } else {
        section
    };
    drop(section);
}

/// One kernel clock interrupt's worth of bookkeeping: advance time, then
/// trigger every cyclic event that has come due, pushing each one's due
/// time on by one cycle. Runs in interrupt context under the gate, so the
/// triggers all take the hint path.
pub(crate) fn clock_tick(k: &mut Kernel) {
    if !k.clock.is_running() {
        return;
    }
    k.clock.advance();
    let now = k.clock.now();
    for idx in 0..k.events.len() {
        let ev = k.events.slot(idx);
        if ev.cycle != 0 && time::is_due(ev.next_due, now) {
            let _ = trigger_in_place(k, idx, true);
            let ev = k.events.slot_mut(idx);
            ev.next_due = ev.next_due.wrapping_add(ev.cycle);
        }
    }
}

/// Checks the user task closest to the CPU against its deadline and its
/// process's liveness. Called by the port once per timer interrupt;
/// returns the fault to abort the task with, if any.
pub(crate) fn current_task_violation(k: &Kernel) -> Option<FaultKind> {
    let frame = k.frames.top()?;
    if !k.procs.is_running(frame.pid) {
        return Some(FaultKind::ProcessAbort);
    }
    if let Some(deadline) = frame.deadline {
        if time::deadline_missed(deadline, k.clock.now()) {
            return Some(FaultKind::Deadline);
        }
    }
    None
}

/// Raises the effective priority to `ceiling` if that is an actual raise,
/// and returns the prior value. This is the ceiling-protocol lock
/// operation: while raised, no event at or below the ceiling can launch.
pub fn os_suspend_all_tasks_by_priority(ceiling: Priority) -> Priority {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        let prior = k.current_priority;
        if ceiling.exceeds(prior) {
            k.current_priority = ceiling;
        }
        prior
    })
}

/// Lowers the effective priority back to `prior` and immediately runs the
/// scheduling loop over the range that just became eligible, so anything
/// that was deferred behind the ceiling runs before this function returns.
pub fn os_resume_all_tasks_by_priority(prior: Priority) {
    let section = Section::enter();
    let start = arch::with_kernel(|k| {
        let old = k.current_priority;
        k.current_priority = prior;
        k.events.first_at_or_below(old)
    });
    let section = process_triggered_events(section, start);
    drop(section);
}

/// Reads the kernel clock, in ticks since startup completed.
pub fn current_time() -> u32 {
    let _section = Section::enter();
    arch::with_kernel(|k| k.clock.now())
}

/// Effective priority of the calling context: the priority of the event
/// being serviced, as modified by the ceiling protocol. 0 in the idle
/// context.
pub fn current_task_priority() -> Priority {
    let _section = Section::enter();
    arch::with_kernel(|k| k.current_priority)
}

/// Base priority of the calling context: what the effective priority will
/// return to when every ceiling is released. 0 in the idle context.
pub fn task_base_priority() -> Priority {
    let _section = Section::enter();
    arch::with_kernel(|k| match k.frames.top() {
        Some(f) => f.base_priority,
        None => {
            if k.current_event == NO_EVENT {
                Priority::IDLE
            } else {
                k.events.slot(k.current_event).priority
            }
        }
    })
}

/// Internal: resolves an event ID for the syscall layer and applies the
/// event's minimum-triggerer rule to `caller`.
pub(crate) fn resolve_trigger(
    k: &Kernel,
    id: EventId,
    caller: ProcId,
) -> Option<usize> {
    let idx = k.events.slot_of(id)?;
    if caller < k.events.slot(idx).min_pid_to_trigger {
        return None;
    }
    Some(idx)
}
