// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Aegis kernel.
//!
//! This is the application-independent part of a small safety kernel:
//! strictly priority-based, preemptive scheduling of a fixed set of
//! run-to-completion tasks, grouped into memory-isolated processes. The one
//! promise the kernel makes is narrow and deliberate: if the tasks of the
//! supervisory process are themselves correct, they will run correctly and
//! on time no matter how badly any other process misbehaves.
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. Static configuration. Everything -- processes, events, tasks,
//!    cross-process permissions -- is declared before `start_kernel` and
//!    never changes afterwards.
//! 2. A strong preference for safe code where reasonable. The kernel state
//!    is a single value behind `arch::with_kernel`, reachable only while
//!    preemption is suspended, so the borrow checker polices the same
//!    discipline the interrupt mask enforces on hardware.
//! 3. A preference for simple and clear algorithms over fast and clever
//!    algorithms. Tables are small fixed arrays and searches are linear;
//!    the numbers involved (dozens of events, a handful of processes) make
//!    anything smarter a waste of debugging time.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod err;
pub mod event;
pub mod preempt;
pub mod proc;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod time;
pub mod umem;

mod state;

pub use event::{activation_loss_count, create_event, event_priority};
pub use proc::{
    failure_count, grant_permission_run_task,
    grant_permission_suspend_process, os_suspend_process, register_process,
    stack_reserve, total_failure_count,
};
pub use sched::{
    current_task_priority, current_time, os_resume_all_tasks_by_priority,
    os_suspend_all_tasks_by_priority, os_trigger_event, task_base_priority,
};
pub use startup::start_kernel;
pub use task::{register_init_task, register_os_task, register_user_task};
