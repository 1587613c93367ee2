// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.
//!
//! A task is a function, the process it runs in, and a deadline budget.
//! Tasks have no identity beyond their position in one dense array: each
//! event owns a contiguous run of entries, executed in registration order
//! on every activation. There are exactly two entry shapes -- kernel tasks
//! and user tasks -- and the dispatch between them is the single point
//! where the kernel decides whether a function call needs the full
//! privilege-descent treatment.
//!
//! The launch primitive at the bottom of this module is the only way user
//! code ever runs. It brackets the callee with a bookkeeping frame (owning
//! process, armed deadline, priority to restore), converts every abnormal
//! outcome into a counted fault against the owning process, and guarantees
//! the effective priority is back at its entry value afterwards no matter
//! what the task did.

use abi::{
    ConfigError, EventId, FaultKind, InitTaskFn, KernelTaskFn, Priority,
    ProcId, UserTaskFn, MAX_EVENT_PRIORITY, MAX_IRQ_PRIORITY,
    MAX_TASKS, MAX_TASK_BUDGET_US, NUM_PROCESSES,
};
use static_assertions::const_assert;

use crate::arch;
use crate::preempt::Section;
use crate::state::Kernel;
use crate::time;

/// Depth bound for the frame stack. Preemption nests at most once per
/// event priority, and `run_task` recursion at most once per interrupt
/// priority level; the margin on top is for init tasks and future ports.
const MAX_TASK_NESTING: usize =
    MAX_EVENT_PRIORITY as usize + MAX_IRQ_PRIORITY as usize + 8;

const_assert!(MAX_TASK_NESTING > NUM_PROCESSES + 1);

/// Entry point of a task, in one of the two shapes the kernel knows how to
/// call. Kernel tasks are invoked directly; user tasks go through the
/// launch primitive.
#[derive(Copy, Clone, Debug)]
pub(crate) enum TaskEntry {
    Kernel(KernelTaskFn),
    User(UserTaskFn),
}

/// One task-table entry.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Task {
    pub(crate) entry: TaskEntry,
    pub(crate) owner: ProcId,
    /// Deadline budget in ticks; 0 disables monitoring.
    pub(crate) budget: u32,
}

impl Task {
    const INIT: Self = Self {
        entry: TaskEntry::Kernel(unregistered_slot),
        owner: ProcId::KERNEL,
        budget: 0,
    };
}

/// Filler for task slots beyond the registered range. Never reachable:
/// events only ever reference slots handed out by registration.
fn unregistered_slot() {
    panic!("launch of unregistered task slot");
}

/// One initialization task; at most one per process.
#[derive(Copy, Clone)]
pub(crate) struct InitTask {
    pub(crate) entry: InitTaskFn,
    pub(crate) budget: u32,
}

pub(crate) struct TaskTable {
    tasks: [Task; MAX_TASKS],
    count: usize,
    init: [Option<InitTask>; NUM_PROCESSES + 1],
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self {
            tasks: [Task::INIT; MAX_TASKS],
            count: 0,
            init: [None; NUM_PROCESSES + 1],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn task(&self, idx: usize) -> &Task {
        &self.tasks[idx]
    }

    pub(crate) fn init_task(&self, pid: ProcId) -> Option<InitTask> {
        self.init[pid.0 as usize]
    }
}

/// Inserts a task at the end of its event's run, shifting every later
/// entry (and the runs referring to them) right by one. Linear, and
/// configuration-time only.
fn insert_task(
    k: &mut Kernel,
    id: EventId,
    entry: TaskEntry,
    owner: ProcId,
    budget_ticks: u32,
) -> Result<(), ConfigError> {
    let slot = k.events.slot_of(id).ok_or(ConfigError::BadEventId)?;
    if k.tasks.count >= MAX_TASKS {
        return Err(ConfigError::TooManyTasksRegistered);
    }

    let ev = k.events.slot(slot);
    let insert_at = if ev.task_count == 0 {
        k.tasks.count
    } else {
        ev.first_task + ev.task_count
    };

    let count = k.tasks.count;
    k.tasks.tasks.copy_within(insert_at..count, insert_at + 1);
    k.tasks.tasks[insert_at] = Task {
        entry,
        owner,
        budget: budget_ticks,
    };
    k.tasks.count += 1;

    for i in 0..k.events.len() {
        if i == slot {
            continue;
        }
        let e = k.events.slot_mut(i);
        if e.task_count > 0 && e.first_task >= insert_at {
            e.first_task += 1;
        }
    }
    let e = k.events.slot_mut(slot);
    if e.task_count == 0 {
        e.first_task = insert_at;
    }
    e.task_count += 1;
    Ok(())
}

/// Attaches a user task to an event. Configuration-time only. The budget
/// is given in microseconds and stored in ticks.
pub fn register_user_task(
    event: EventId,
    entry: UserTaskFn,
    pid: ProcId,
    budget_us: u32,
) -> Result<(), ConfigError> {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if k.live {
            return Err(ConfigError::ConfigurationOfRunningKernel);
        }
        if !pid.is_user() {
            return Err(ConfigError::BadProcessId);
        }
        if budget_us > MAX_TASK_BUDGET_US {
            return Err(ConfigError::TaskBudgetTooBig);
        }
        insert_task(
            k,
            event,
            TaskEntry::User(entry),
            pid,
            time::us_to_ticks(budget_us),
        )
    })
}

/// Attaches a kernel task to an event. Configuration-time only. Kernel
/// tasks run privileged and unmonitored, so there is no budget to give.
pub fn register_os_task(
    event: EventId,
    entry: KernelTaskFn,
) -> Result<(), ConfigError> {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if k.live {
            return Err(ConfigError::ConfigurationOfRunningKernel);
        }
        insert_task(k, event, TaskEntry::Kernel(entry), ProcId::KERNEL, 0)
    })
}

/// Registers the initialization task of a process (or of the kernel, for
/// `ProcId::KERNEL`). At most one per process; they run during startup,
/// kernel first, then processes in ascending ID order.
pub fn register_init_task(
    entry: InitTaskFn,
    pid: ProcId,
    budget_us: u32,
) -> Result<(), ConfigError> {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if k.live {
            return Err(ConfigError::ConfigurationOfRunningKernel);
        }
        if pid.0 as usize > NUM_PROCESSES {
            return Err(ConfigError::BadProcessId);
        }
        // Kernel tasks are never monitored, init or otherwise.
        if budget_us > MAX_TASK_BUDGET_US
            || (pid == ProcId::KERNEL && budget_us != 0)
        {
            return Err(ConfigError::TaskBudgetTooBig);
        }
        let slot = &mut k.tasks.init[pid.0 as usize];
        if slot.is_some() {
            return Err(ConfigError::InitTaskRedefined);
        }
        *slot = Some(InitTask {
            entry,
            budget: time::us_to_ticks(budget_us),
        });
        Ok(())
    })
}

/// Bookkeeping for one live user-task activation.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Frame {
    pub(crate) pid: ProcId,
    /// Absolute tick at which the activation's budget runs out, if
    /// monitored.
    pub(crate) deadline: Option<u32>,
    /// Effective priority on entry; unconditionally restored on exit.
    pub(crate) base_priority: Priority,
}

impl Frame {
    const INIT: Self = Self {
        pid: ProcId::KERNEL,
        deadline: None,
        base_priority: Priority::IDLE,
    };
}

/// Stack of live activations, innermost last. Preempted activations keep
/// their frames; the top frame always describes the user task closest to
/// the CPU.
pub(crate) struct FrameStack {
    frames: [Frame; MAX_TASK_NESTING],
    depth: usize,
}

impl FrameStack {
    pub(crate) fn new() -> Self {
        Self {
            frames: [Frame::INIT; MAX_TASK_NESTING],
            depth: 0,
        }
    }

    pub(crate) fn push(&mut self, f: Frame) {
        uassert!(self.depth < MAX_TASK_NESTING);
        self.frames[self.depth] = f;
        self.depth += 1;
    }

    pub(crate) fn pop(&mut self) -> Frame {
        uassert!(self.depth > 0);
        self.depth -= 1;
        self.frames[self.depth]
    }

    pub(crate) fn top(&self) -> Option<&Frame> {
        self.depth.checked_sub(1).map(|i| &self.frames[i])
    }
}

/// Launches a user task and runs it to its end, whatever end that is.
///
/// `Ok` carries the task's own result (negative results are counted as
/// `UserAbort` against the owner but still surfaced); `Err` carries the
/// fault that killed it, already counted. Either way, on return the
/// effective priority is back at its entry value -- if the task left a
/// priority ceiling raised, the deferred-event scan an orderly lower would
/// have performed happens here.
pub(crate) fn launch_user_task(
    entry: UserTaskFn,
    owner: ProcId,
    arg: usize,
    budget_ticks: u32,
) -> Result<i32, FaultKind> {
    launch_frame(owner, budget_ticks, move || entry(owner, arg))
}

/// Launches an initialization task. Same contract as
/// [`launch_user_task`], different entry shape.
pub(crate) fn launch_init_task(
    entry: InitTaskFn,
    pid: ProcId,
    budget_ticks: u32,
) -> Result<i32, FaultKind> {
    launch_frame(pid, budget_ticks, move || entry(pid))
}

fn launch_frame(
    owner: ProcId,
    budget_ticks: u32,
    body: impl FnOnce() -> i32,
) -> Result<i32, FaultKind> {
    let section = Section::enter();
    arch::with_kernel(|k| {
        let deadline = if budget_ticks != 0 {
            Some(k.clock.now().wrapping_add(budget_ticks))
        } else {
            None
        };
        k.frames.push(Frame {
            pid: owner,
            deadline,
            base_priority: k.current_priority,
        });
    });

    // The privilege descent, stack switch and exception netting all live
    // behind this port call.
    let (section, outcome) =
        section.open_for(|| arch::enter_user_task(body));

    let (ceiling_left_raised, result) = arch::with_kernel(|k| {
        let frame = k.frames.pop();
        let raised = k
            .current_priority
            .exceeds(frame.base_priority)
            .then_some(k.current_priority);
        k.current_priority = frame.base_priority;
        let result = match outcome {
            Ok(v) => {
                if v < 0 {
                    k.procs.record_failure(owner, FaultKind::UserAbort);
                }
                Ok(v)
            }
            Err(kind) => {
                k.procs.record_failure(owner, kind);
                Err(kind)
            }
        };
        (raised, result)
    });

    let section = if let Some(old) = ceiling_left_raised {
        klog!("task in {:?} exited with ceiling {:?} raised", owner, old);
        let start =
            arch::with_kernel(|k| k.events.first_at_or_below(old));
        crate::sched::process_triggered_events(section, start)
    } else {
        section
    };
    drop(section);
    result
}
