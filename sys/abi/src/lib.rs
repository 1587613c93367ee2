// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and application code.
//!
//! Everything in here is part of the contract between the kernel and the
//! processes it hosts: identifiers, the static sizing of the system, the
//! configuration and fault enumerations, and the descriptor types that cross
//! the syscall boundary. Keeping these in a separate crate lets user code
//! name them without linking the kernel itself.

#![no_std]

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of user processes. Process IDs run `0..=NUM_PROCESSES`, with 0
/// reserved for the kernel itself.
///
/// This is deliberately a small, fixed number: the permission machinery
/// packs a (caller, target) pair into a single bit of a 16-bit word, which
/// caps us at four user processes. See `permission_bit`.
pub const NUM_PROCESSES: usize = 4;

/// Maximum number of events that can be created. One extra descriptor slot
/// is reserved internally for the list terminator.
pub const MAX_EVENTS: usize = 32;

/// Maximum number of tasks, across all events.
pub const MAX_TASKS: usize = 64;

/// Highest usable event priority. Priorities run `1..=MAX_EVENT_PRIORITY`;
/// 0 is the idle context and the list terminator.
pub const MAX_EVENT_PRIORITY: u8 = 12;

/// Highest priority that unprivileged code may raise the effective priority
/// to (the priority-ceiling "lockable" range). Events above this threshold
/// are reserved for kernel tasks and the supervisory process, which is what
/// makes the ceiling protocol safe to expose to user code at all.
pub const MAX_LOCKABLE_PRIORITY: u8 = 8;

/// Number of distinct interrupt-controller priority levels, `1..=15`. Level
/// 0 means "not in an interrupt."
pub const MAX_IRQ_PRIORITY: u8 = 15;

/// Interrupt priority of the kernel clock tick. Deliberately low so that
/// device interrupts can preempt tick bookkeeping.
pub const KERNEL_TICK_IRQ_PRIORITY: u8 = 1;

/// Duration of one kernel clock tick, in microseconds.
pub const TICK_PERIOD_US: u32 = 1_000;

/// Longest permitted deadline budget for a single task activation, in
/// microseconds (about 18 s). Budgets are stored in ticks; this bound keeps
/// the converted value well inside the range where the wrapping deadline
/// comparison stays unambiguous.
pub const MAX_TASK_BUDGET_US: u32 = 18_000_000;

/// Mask of the bits an event's cycle time and first activation time may
/// use. The top two bits must stay clear so that the wrapping "is it due
/// yet" comparison cannot be confused by a cycle close to the counter
/// range.
pub const EVENT_TIME_MASK: u32 = (1 << 30) - 1;

/// Result a task creator observes when the task was aborted rather than run
/// to completion. Distinctive on purpose; a well-behaved task returning
/// this value of its own volition is indistinguishable from an abort, which
/// is why well-behaved tasks return small negative numbers for their own
/// errors.
pub const TASK_ABORTED: i32 = i32::MIN;

const_assert!(NUM_PROCESSES * NUM_PROCESSES <= 16);
const_assert!(MAX_EVENTS <= u8::MAX as usize);
const_assert!((MAX_LOCKABLE_PRIORITY) < MAX_EVENT_PRIORITY);
const_assert!((MAX_EVENT_PRIORITY as usize) < u8::MAX as usize);
const_assert!(MAX_TASK_BUDGET_US / TICK_PERIOD_US < EVENT_TIME_MASK);

/// Entry shape of a kernel task: runs privileged, takes nothing, returns
/// nothing, and is trusted not to misbehave.
pub type KernelTaskFn = fn();

/// Entry shape of a user task: runs unprivileged in its owning process,
/// receives the owning process ID and an opaque argument, and returns a
/// signed result. Negative results are counted as failures against the
/// owning process.
pub type UserTaskFn = fn(ProcId, usize) -> i32;

/// Entry shape of an initialization task: like a user task, but run once
/// during startup, before the scheduler goes live. A negative result aborts
/// startup.
pub type InitTaskFn = fn(ProcId) -> i32;

/// Identifies a process, i.e. a memory isolation domain.
///
/// `ProcId(0)` is the kernel. `1..=NUM_PROCESSES` are user processes. By
/// convention the numerically highest process actually used by an
/// application is its supervisor, and the kernel's startup validation
/// enforces that no other process can be granted authority over it.
///
/// `ProcId` derives `Ord`: the numeric order *is* the trust order.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default,
    Serialize, Deserialize, FromBytes, IntoBytes, Immutable, KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct ProcId(pub u8);

impl ProcId {
    /// The kernel's own "process."
    pub const KERNEL: Self = Self(0);

    /// Threshold value meaning "only the kernel may do this" when used as
    /// an event's minimum triggering process. One past the last real
    /// process on purpose.
    pub const KERNEL_ONLY: Self = Self(NUM_PROCESSES as u8 + 1);

    /// True for IDs naming an actual user process.
    pub fn is_user(self) -> bool {
        (1..=NUM_PROCESSES as u8).contains(&self.0)
    }
}

/// Indicates urgency of an event and of the tasks it launches.
///
/// Priorities are small numbers; numerically *greater* is more urgent, so a
/// priority 5 event preempts a priority 2 task. Priority 0 is not a real
/// event priority: it is the effective priority of the idle context and of
/// the descriptor-list terminator.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means more urgent or
/// merely numerically greater. Use [`Priority::exceeds`].
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize,
    FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority of the idle context and the descriptor-list terminator.
    pub const IDLE: Self = Self(0);

    /// Checks if `self` is strictly more urgent than `other`.
    ///
    /// This is easier to read than comparing the numeric values at call
    /// sites, and it is the only comparison the scheduler ever needs.
    pub fn exceeds(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// True for values that may be assigned to an event.
    pub fn is_valid_for_event(self) -> bool {
        (1..=MAX_EVENT_PRIORITY).contains(&self.0)
    }
}

/// Public handle for an event, assigned in creation order.
///
/// IDs are dense and stable: the descriptor an ID names keeps its identity
/// no matter how many higher-priority events are created afterwards.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize,
    FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
#[repr(transparent)]
pub struct EventId(pub u8);

/// Activation state of an event.
///
/// The only legal cycle is `Idle → Triggered → InProgress → Idle`. The
/// kernel asserts this on every transition; [`EventState::may_transition_to`]
/// is the single source of truth for what is legal, and is exercised by
/// property tests.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum EventState {
    /// Nothing to do; a trigger will be accepted.
    #[default]
    Idle,
    /// An activation is outstanding but the scheduler has not yet
    /// acknowledged it.
    Triggered,
    /// The scheduler is running (or is about to run) the event's tasks.
    InProgress,
}

impl EventState {
    /// Whether the state machine permits going from `self` to `next`.
    pub fn may_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (EventState::Idle, EventState::Triggered)
                | (EventState::Triggered, EventState::InProgress)
                | (EventState::InProgress, EventState::Idle)
        )
    }
}

/// Configuration of one event, passed to `create_event`.
///
/// `cycle` and `first_activation` are in kernel ticks and must fit in
/// [`EVENT_TIME_MASK`]. A `cycle` of 0 makes this a pure software-triggered
/// event, in which case `first_activation` must also be 0.
#[derive(Copy, Clone, Debug)]
pub struct EventConfig {
    /// Trigger period in ticks; 0 for software-only events.
    pub cycle: u32,
    /// Absolute time of the first cyclic activation, in ticks.
    pub first_activation: u32,
    /// Scheduling priority, `1..=MAX_EVENT_PRIORITY`.
    pub priority: Priority,
    /// Lowest process ID allowed to trigger this event by syscall. 0 and 1
    /// both mean "any process"; [`ProcId::KERNEL_ONLY`] reserves the event
    /// for the kernel.
    pub min_pid_to_trigger: ProcId,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            cycle: 0,
            first_activation: 0,
            priority: Priority(1),
            min_pid_to_trigger: ProcId(0),
        }
    }
}

/// Descriptor for a task invoked across a process boundary with `run_task`.
///
/// Unlike the tasks registered against events at configuration time, one of
/// these is built by the *calling* process and handed to the kernel by
/// reference at run time. The kernel validates that the caller can actually
/// read the descriptor before believing anything in it.
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct TaskDesc {
    /// Function to execute in the target process.
    pub entry: UserTaskFn,
    /// Process the function will run in. The caller needs a run-task grant
    /// naming this process.
    pub owner: ProcId,
    /// Deadline budget for the invocation, in microseconds; 0 disables
    /// monitoring.
    pub budget_us: u32,
}

/// Static configuration of one user process, passed to `register_process`.
#[derive(Copy, Clone, Debug)]
pub struct ProcessConfig {
    /// Size of the process's stack area in bytes. Must be nonzero and
    /// 8-aligned; a process with an invalid stack configuration is treated
    /// as not configured at all.
    pub stack_size: usize,
    /// Memory regions this process may access. Checked by the kernel when
    /// user code passes pointers across the syscall boundary; enforced in
    /// hardware by the memory protection unit on real targets.
    pub regions: &'static [MemRegion],
}

bitflags::bitflags! {
    /// Access rights conferred by a memory region.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct RegionAttributes: u32 {
        /// Region can be read by the owning process.
        const READ = 1 << 0;
        /// Region can be written by the owning process.
        const WRITE = 1 << 1;
        /// Region can contain executable code.
        const EXECUTE = 1 << 2;
        /// Region contains memory-mapped registers; the kernel will refuse
        /// to dereference syscall arguments pointing into it.
        const DEVICE = 1 << 3;
    }
}

/// Description of one memory region.
///
/// Regions may overlap, and several processes may share a region. Regions
/// must not butt up against the very end of the address space; keeping one
/// byte free there lets `contains` avoid overflow checks.
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct MemRegion {
    /// Address of start of region.
    pub base: usize,
    /// Size of region, in bytes.
    pub size: usize,
    /// What the owning process may do with it.
    pub attributes: RegionAttributes,
}

impl MemRegion {
    /// A read-write-execute region covering (almost) the whole address
    /// space, minus the final byte. Useful for hosted testing, where the
    /// process's code and data live wherever the host linker put them.
    pub const fn all() -> Self {
        Self {
            base: 0,
            size: usize::MAX,
            attributes: RegionAttributes::READ
                .union(RegionAttributes::WRITE)
                .union(RegionAttributes::EXECUTE),
        }
    }

    /// Computes the address one past the end of this region.
    pub fn end_addr(&self) -> usize {
        // Wrapping add avoids the overflow check, which is justified by our
        // invariant that regions don't reach the end of the address space.
        self.base.wrapping_add(self.size)
    }

    /// Tests whether `self` contains `addr`.
    pub fn contains(&self, addr: usize) -> bool {
        let next_addr = addr.wrapping_add(1);
        if next_addr < addr {
            return false;
        }
        self.base <= addr && next_addr <= self.end_addr()
    }
}

/// Computes the bit index, in a 16-bit permission word, of the grant from
/// `caller` to `target`. Both must be user process IDs.
///
/// The packing is `NUM_PROCESSES * (caller - 1) + (target - 1)`, which
/// makes the permission check a single shift-and-mask with no branches.
pub const fn permission_bit(caller: ProcId, target: ProcId) -> u16 {
    1 << (NUM_PROCESSES as u16 * (caller.0 as u16 - 1) + (target.0 as u16 - 1))
}

/// Computes the mask of every grant bit naming `target` as its target.
///
/// For the four-process configuration this is the classic
/// `0x1111 << (target - 1)` shape. Startup validation compares the
/// permission words against this mask for the supervisor process, which is
/// how "nobody is granted authority over the supervisor" becomes a single
/// integer comparison.
pub const fn target_mask(target: ProcId) -> u16 {
    let mut mask = 0u16;
    let mut caller = 1;
    while caller <= NUM_PROCESSES {
        mask |= 1
            << (NUM_PROCESSES as u16 * (caller as u16 - 1)
                + (target.0 as u16 - 1));
        caller += 1;
    }
    mask
}

/// Failure classification for task aborts.
///
/// The first twelve are detected by the processor or the kernel; the last
/// is a task declaring its own failure. Each increments a per-process
/// counter of its kind, plus the process's total. The taxonomy follows the
/// exception model of the e200z4 family this kernel is aimed at; the hosted
/// port maps what it can onto it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FaultKind {
    /// Task was killed because its process was suspended.
    ProcessAbort = 0,
    /// Machine check exception.
    MachineCheck = 1,
    /// The task overran its deadline budget.
    Deadline = 2,
    /// Data storage (memory protection) violation.
    StorageFault = 3,
    /// Bad argument to, or illegal use of, a system call.
    SyscallBadArg = 4,
    /// Misaligned memory access.
    Alignment = 5,
    /// Illegal instruction or comparable program-state exception.
    ProgramInterrupt = 6,
    /// Floating point used while the FPU is unavailable.
    FpuUnavailable = 7,
    /// Data TLB miss.
    TlbData = 8,
    /// Instruction TLB miss.
    TlbInstruction = 9,
    /// Trap instruction executed outside a system call.
    Trap = 10,
    /// SPE instruction used without permission.
    SpeInstruction = 11,
    /// The task terminated itself with a negative result.
    UserAbort = 12,
}

impl FaultKind {
    /// Number of distinct fault kinds; sizes the per-process counters.
    pub const COUNT: usize = 13;

    /// Counter index for this kind.
    pub fn as_index(self) -> usize {
        self as usize
    }
}

const_assert!(FaultKind::UserAbort as usize == FaultKind::COUNT - 1);

/// Errors reported by the configuration-time API and by `start_kernel`.
///
/// Success is expressed as `Ok`, so there is no "no error" member. Any of
/// these means the static configuration is wrong and the system must not be
/// started.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The event table is full.
    TooManyEvents,
    /// Event priority was 0 or above `MAX_EVENT_PRIORITY`.
    InvalidEventPriority,
    /// Cycle/first-activation combination is inconsistent or uses reserved
    /// bits.
    BadEventTiming,
    /// The minimum triggering process ID names nothing that could ever
    /// trigger.
    EventNotTriggerable,
    /// A configuration call was made after the kernel went live.
    ConfigurationOfRunningKernel,
    /// No event with that ID exists.
    BadEventId,
    /// Process ID out of range for the operation.
    BadProcessId,
    /// The task table is full.
    TooManyTasksRegistered,
    /// Startup requires at least one event and one task.
    NoEventOrTaskRegistered,
    /// An event reached startup with no tasks attached.
    EventWithoutTask,
    /// A task entry point failed validation.
    BadTaskFunction,
    /// A deadline budget exceeds `MAX_TASK_BUDGET_US`.
    TaskBudgetTooBig,
    /// A second initialization task was registered for the same process.
    InitTaskRedefined,
    /// An initialization task returned a negative result during startup.
    InitTaskFailed,
    /// A process was registered with an unusable stack configuration.
    PrcStackInvalid,
    /// A task names a process that was never successfully registered.
    TaskBelongsToInvalidProcess,
    /// An event above the lockable priority range contains a task owned by
    /// a process other than the kernel or the supervisor.
    HighPriorityTaskInLowPrivilegeProcess,
    /// A run-task grant names the supervisor as its target.
    RunTaskBadPermission,
    /// A suspend-process grant names the supervisor as its target.
    SuspendProcessBadPermission,
}

/// System call numbers.
///
/// These are fixed: they are baked into the user-mode entry stubs and into
/// any debugger that wants to interpret a stopped task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    TriggerEvent = 0,
    RunTask = 1,
    TerminateTask = 2,
    SuspendAllInterruptsByPriority = 3,
    ResumeAllInterruptsByPriority = 4,
    SuspendProcess = 5,
}

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::TriggerEvent),
            1 => Ok(Self::RunTask),
            2 => Ok(Self::TerminateTask),
            3 => Ok(Self::SuspendAllInterruptsByPriority),
            4 => Ok(Self::ResumeAllInterruptsByPriority),
            5 => Ok(Self::SuspendProcess),
            _ => Err(()),
        }
    }
}
