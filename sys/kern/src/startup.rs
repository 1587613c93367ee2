// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! Startup is where the safety argument is actually made. Everything the
//! running kernel relies on -- the sorted descriptor array, the group
//! links, "no grant names the supervisor," "nothing above the lockable
//! range belongs to an ordinary process" -- is either established or
//! verified here, and a configuration that fails any check never starts.
//! After this module returns `Ok`, the kernel takes no configuration input
//! ever again.

use abi::{
    target_mask, ConfigError, FaultKind, Priority, ProcId,
    MAX_LOCKABLE_PRIORITY, NUM_PROCESSES,
};
use static_assertions::const_assert;

use crate::arch;
use crate::preempt::Section;
use crate::state::Kernel;
use crate::task::{self, TaskEntry};

// Consistency of the enumerations shared with port-level entry sequences.
const_assert!(FaultKind::COUNT == 13);
const_assert!(abi::Sysnum::SuspendProcess as u32 == 5);
const_assert!((MAX_LOCKABLE_PRIORITY as usize) < abi::MAX_EVENT_PRIORITY as usize);

/// Validates the accumulated configuration, runs the initialization tasks,
/// and releases the scheduler. Called exactly once, from the main context,
/// after all `create_*`/`register_*`/`grant_*` calls; on success the caller
/// becomes the idle context.
///
/// Any error leaves the kernel halted: the clock never starts and no task
/// will ever run.
pub fn start_kernel() -> Result<(), ConfigError> {
    {
        let section = Section::enter();
        arch::with_kernel(validate_and_seal)?;
        drop(section);
    }

    // The memory protection hardware is owned by the port; the kernel only
    // insists it is set up before any user code runs.
    arch::init_memory_protection();

    // Initialization tasks run with preemption enabled but with the
    // effective priority still parked above every event, so anything they
    // trigger is recorded and deferred until the kernel goes live. Kernel
    // init first, then processes in ascending ID order.
    for pid in 0..=NUM_PROCESSES as u8 {
        let pid = ProcId(pid);
        let init = {
            let _section = Section::enter();
            arch::with_kernel(|k| k.tasks.init_task(pid))
        };
        let Some(init) = init else { continue };
        let result = if pid == ProcId::KERNEL {
            // Kernel init runs in place; it is as trusted as we are.
            (init.entry)(pid)
        } else {
            task::launch_init_task(init.entry, pid, init.budget)
                .unwrap_or(abi::TASK_ABORTED)
        };
        if result < 0 {
            return Err(ConfigError::InitTaskFailed);
        }
    }

    // Go live, atomically: processes become running, the clock starts from
    // zero, and the effective priority drops to idle, all in one critical
    // section, so the first observable instant of the running system is a
    // consistent t=0.
    let section = Section::enter();
    arch::with_kernel(|k| {
        k.procs.mark_configured_running();
        k.clock.start();
        k.current_priority = Priority::IDLE;
        k.live = true;
    });
    // Anything the init tasks triggered has been waiting behind the
    // parked priority; service it before handing the idle context back.
    let section = crate::sched::process_triggered_events(section, 0);
    drop(section);
    klog!("kernel live");
    Ok(())
}

/// The validation pass. Runs under the gate; mutates only to build the
/// run-time lookup structures and to record the supervisor.
fn validate_and_seal(k: &mut Kernel) -> Result<(), ConfigError> {
    if k.live {
        return Err(ConfigError::ConfigurationOfRunningKernel);
    }
    if k.events.len() == 0 || k.tasks.len() == 0 {
        return Err(ConfigError::NoEventOrTaskRegistered);
    }

    // Identify the supervisor: the highest process ID in actual use.
    let mut max_pid = ProcId::KERNEL;
    for i in 0..k.tasks.len() {
        max_pid = max_pid.max(k.tasks.task(i).owner);
    }
    for pid in 1..=NUM_PROCESSES as u8 {
        if k.tasks.init_task(ProcId(pid)).is_some() {
            max_pid = max_pid.max(ProcId(pid));
        }
    }
    k.max_pid_in_use = max_pid;

    // Every task must belong to the kernel or to a process that was
    // successfully registered.
    for i in 0..k.tasks.len() {
        let owner = k.tasks.task(i).owner;
        if owner != ProcId::KERNEL && !k.procs.is_configured(owner) {
            return Err(ConfigError::TaskBelongsToInvalidProcess);
        }
    }
    for pid in 1..=NUM_PROCESSES as u8 {
        let pid = ProcId(pid);
        if k.tasks.init_task(pid).is_some() && !k.procs.is_configured(pid) {
            return Err(ConfigError::TaskBelongsToInvalidProcess);
        }
    }

    // Nobody gets authority over the supervisor. One mask comparison per
    // permission word.
    if max_pid.is_user() {
        if k.procs.run_task_grants() & target_mask(max_pid) != 0 {
            return Err(ConfigError::RunTaskBadPermission);
        }
        if k.procs.suspend_grants() & target_mask(max_pid) != 0 {
            return Err(ConfigError::SuspendProcessBadPermission);
        }
    }

    // Per-event checks: no empty events, and the priority range above the
    // user-lockable ceiling is reserved for the kernel and the supervisor.
    // The latter is the central safety constraint: it is what makes a
    // user-reachable priority ceiling unable to delay the supervisor.
    for idx in 0..k.events.len() {
        let ev = k.events.slot(idx);
        if ev.task_count == 0 {
            return Err(ConfigError::EventWithoutTask);
        }
        if ev.priority.exceeds(Priority(MAX_LOCKABLE_PRIORITY)) {
            for t in ev.first_task..ev.first_task + ev.task_count {
                let task = k.tasks.task(t);
                let trusted = match task.entry {
                    TaskEntry::Kernel(_) => true,
                    TaskEntry::User(_) => task.owner == max_pid,
                };
                if !trusted {
                    return Err(
                        ConfigError::HighPriorityTaskInLowPrivilegeProcess,
                    );
                }
            }
        }
    }

    k.events.build_schedule_links();
    Ok(())
}
