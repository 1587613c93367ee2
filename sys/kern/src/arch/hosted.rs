// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted port: runs the kernel as a library inside an ordinary process,
//! with simulated time and simulated interrupt priority.
//!
//! This is the port the test suites build against. Its translations of the
//! hardware concepts are deliberately literal:
//!
//! - The interrupt controller's current-priority register is a
//!   thread-local integer; "interrupts" are ordinary function calls made
//!   through [`fire_interrupt`], which models the hardware rule that only
//!   a strictly higher priority may preempt, and runs the kernel's
//!   interrupt epilogue on the way back to level 0.
//! - Suspending preemption is a nesting counter. Nothing asynchronous can
//!   actually happen in a single-threaded simulation, so the counter's
//!   job is policing: `with_kernel` refuses to expose kernel state unless
//!   the gate is held, and an "interrupt" refuses to fire while it is.
//! - The privilege descent is an unwind boundary. A user task ends by
//!   returning, or by a `TaskExit` panic, which stands in for the trap
//!   return and exception paths of a real CPU. A panic that is *not* a
//!   `TaskExit` plays the role of a machine exception and is reported as a
//!   `ProgramInterrupt` fault, which is precisely what makes fault
//!   injection in tests a one-liner.
//! - Each thread owns an independent kernel instance, so concurrently
//!   running tests cannot see each other. (A nod to the original design
//!   note that simulators might prefer a thread local over a global.)
//!
//! What is *not* modeled: stacks (no consumption, no overflow), the MPU
//! (region checks still happen in software at the syscall boundary), and
//! spontaneous interrupts (time moves only when a test calls
//! [`fire_timer_tick`]).

use core::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};

use abi::{FaultKind, KERNEL_TICK_IRQ_PRIORITY, MAX_IRQ_PRIORITY};

use crate::state::Kernel;

/// Log things from kernel context. On this port the messages go to the
/// `log` facade; wire up `env_logger` in a test to watch the scheduler
/// think.
macro_rules! klog {
    ($s:expr) => { log::trace!($s) };
    ($s:expr, $($tt:tt)*) => { log::trace!($s, $($tt)*) };
}

/// Kernel assertion. The hosted port keeps these on unconditionally; a
/// bare-metal port might map them to a breakpoint or a reset.
macro_rules! uassert {
    ($cond:expr) => { assert!($cond) };
    ($cond:expr, $($rest:tt)*) => { assert!($cond, $($rest)*) };
}

std::thread_local! {
    static KERNEL: RefCell<Kernel> = {
        install_task_exit_hook();
        RefCell::new(Kernel::new())
    };
    static GATE_DEPTH: Cell<u32> = const { Cell::new(0) };
    static IRQ_PRIORITY: Cell<u8> = const { Cell::new(0) };
}

/// Token returned by [`suspend_preemption`]; restoring it reopens the gate
/// to the state it had before. Tokens nest and must be restored in LIFO
/// order.
#[derive(Copy, Clone, Debug)]
pub struct PreemptionToken(u32);

/// Suspends all maskable preemption and returns the prior state.
pub(crate) fn suspend_preemption() -> PreemptionToken {
    GATE_DEPTH.with(|d| {
        let prior = d.get();
        d.set(prior + 1);
        PreemptionToken(prior)
    })
}

/// Restores the preemption state captured in `token`.
pub(crate) fn resume_preemption(token: PreemptionToken) {
    GATE_DEPTH.with(|d| {
        uassert!(
            d.get() == token.0 + 1,
            "preemption tokens restored out of order"
        );
        d.set(token.0);
    });
}

fn preemption_suspended() -> bool {
    GATE_DEPTH.with(|d| d.get() > 0)
}

/// Interrupt-controller priority of the context being serviced; 0 at task
/// level.
pub fn current_irq_priority() -> u8 {
    IRQ_PRIORITY.with(|p| p.get())
}

/// Whether the caller is an interrupt service context.
pub fn in_interrupt() -> bool {
    current_irq_priority() > 0
}

/// Grants access to the kernel state. Callable only while the preemption
/// gate is held; the borrow lasts exactly as long as the closure, which is
/// what lets task bodies (which run with the gate open) re-enter the
/// kernel through syscalls without aliasing anything.
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    uassert!(
        preemption_suspended(),
        "kernel state touched outside a critical section"
    );
    KERNEL.with(|k| f(&mut k.borrow_mut()))
}

/// How a user task leaves the CPU other than by returning. Travels as a
/// panic payload from the syscall layer to the launch boundary.
enum TaskExit {
    /// `terminate_task`: the carried value is the task's result.
    Terminated(i32),
    /// Killed by the kernel; the carried value is the fault to account.
    Aborted(FaultKind),
}

/// Runs a user task body to whatever end it meets.
///
/// On hardware this is the privilege descent and process-stack switch; the
/// hosted equivalent is an unwind boundary that nets every non-local exit.
pub(crate) fn enter_user_task(
    body: impl FnOnce() -> i32,
) -> Result<i32, FaultKind> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(v) => Ok(v),
        Err(payload) => match payload.downcast_ref::<TaskExit>() {
            Some(TaskExit::Terminated(v)) => Ok(*v),
            Some(TaskExit::Aborted(kind)) => Err(*kind),
            // Any other panic is the hosted analogue of a machine
            // exception in user code.
            None => Err(FaultKind::ProgramInterrupt),
        },
    }
}

/// Kills the user task currently on the CPU with `kind`. Unwinds to the
/// launch primitive; never returns.
pub(crate) fn abort_current_task(kind: FaultKind) -> ! {
    uassert!(user_frame_active(), "abort with no user task on CPU");
    std::panic::panic_any(TaskExit::Aborted(kind))
}

/// Ends the user task currently on the CPU with `result`, as if its entry
/// function had returned it. Never returns.
pub(crate) fn terminate_current_task(result: i32) -> ! {
    uassert!(user_frame_active(), "terminate with no user task on CPU");
    std::panic::panic_any(TaskExit::Terminated(result))
}

fn user_frame_active() -> bool {
    let _section = crate::preempt::Section::enter();
    with_kernel(|k| k.frames.top().is_some())
}

/// Sets up the memory protection hardware. The hosted port has none;
/// pointer validation happens in software at the syscall boundary instead.
pub(crate) fn init_memory_protection() {}

/// Delivers one interrupt at `level`, running `handler` as its service
/// routine. Models the controller's preemption rule (only strictly higher
/// levels nest) and, on the return to task level, runs the kernel's
/// interrupt epilogue followed by deadline/liveness enforcement against
/// the interrupted task.
///
/// May be called from the idle context or from inside a task body (that is
/// how tests preempt a task); never from inside a critical section, which
/// is exactly the masking the gate exists to provide.
pub fn fire_interrupt(level: u8, handler: impl FnOnce()) {
    uassert!(
        !preemption_suspended(),
        "interrupt delivered inside a critical section"
    );
    let prev = IRQ_PRIORITY.with(|p| p.get());
    uassert!(level > prev, "interrupt level {} can't preempt {}", level, prev);
    uassert!(level <= MAX_IRQ_PRIORITY);

    IRQ_PRIORITY.with(|p| p.set(level));
    handler();
    IRQ_PRIORITY.with(|p| p.set(prev));

    if prev == 0 {
        crate::sched::run_isr_epilogue();
        let violation = {
            let _section = crate::preempt::Section::enter();
            with_kernel(|k| crate::sched::current_task_violation(k))
        };
        if let Some(kind) = violation {
            abort_current_task(kind);
        }
    }
}

/// Delivers one kernel clock interrupt: time advances, due cyclic events
/// are triggered (and deferred to the epilogue, as from any interrupt),
/// and the interrupted task is checked against its deadline and its
/// process's liveness.
pub fn fire_timer_tick() {
    fire_interrupt(KERNEL_TICK_IRQ_PRIORITY, || {
        let _section = crate::preempt::Section::enter();
        with_kernel(crate::sched::clock_tick);
    });
}

/// Burns `n` ticks of simulated wall-clock time. This is how a task body
/// "computes for a while" in tests: each tick is a real clock interrupt,
/// so more urgent events preempt the caller exactly as they would on
/// hardware.
pub fn busy_wait_ticks(n: u32) {
    for _ in 0..n {
        fire_timer_tick();
    }
}

/// Silences the panics that are really task exits. Installed once per
/// process, the first time a kernel comes into existence on any thread.
fn install_task_exit_hook() {
    static HOOK: std::sync::Once = std::sync::Once::new();
    HOOK.call_once(|| {
        let default = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<TaskExit>().is_none() {
                default(info);
            }
        }));
    });
}
