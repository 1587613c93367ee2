// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process table.
//!
//! A process is a memory isolation domain and a failure-accounting domain;
//! it owns no execution state of its own (tasks run to completion on the
//! kernel's terms). The table is a fixed array indexed by process ID, with
//! slot 0 standing for the kernel itself.
//!
//! Cross-process authority -- the right to run a task inside another
//! process, or to suspend one -- is a bitmap of grants packed so that a
//! permission check is a single shift-and-mask (`abi::permission_bit`).
//! Grants are established during configuration and frozen at startup, where
//! validation also guarantees that no grant ever names the supervisor as
//! its target.

use abi::{
    permission_bit, ConfigError, FaultKind, MemRegion, ProcId, ProcessConfig,
    RegionAttributes, NUM_PROCESSES,
};

use crate::arch;
use crate::preempt::Section;
use crate::umem::USlice;

/// One process record. All records exist from boot; registration merely
/// fills one in and marks it configured.
#[derive(Copy, Clone)]
pub(crate) struct Process {
    configured: bool,
    running: bool,
    total_failures: u32,
    failures: [u32; FaultKind::COUNT],
    regions: &'static [MemRegion],
    stack_reserve: usize,
}

impl Process {
    const INIT: Self = Self {
        configured: false,
        running: false,
        total_failures: 0,
        failures: [0; FaultKind::COUNT],
        regions: &[],
        stack_reserve: 0,
    };
}

pub(crate) struct ProcessTable {
    procs: [Process; NUM_PROCESSES + 1],
    run_task_grants: u16,
    suspend_grants: u16,
}

impl ProcessTable {
    pub(crate) fn new() -> Self {
        let mut procs = [Process::INIT; NUM_PROCESSES + 1];
        // The kernel itself is always configured; it is brought up by the
        // reset path, not by `register_process`.
        procs[0].configured = true;
        Self {
            procs,
            run_task_grants: 0,
            suspend_grants: 0,
        }
    }

    pub(crate) fn configure(&mut self, pid: ProcId, cfg: &ProcessConfig) {
        let p = &mut self.procs[pid.0 as usize];
        p.configured = true;
        p.regions = cfg.regions;
        p.stack_reserve = cfg.stack_size;
    }

    pub(crate) fn is_configured(&self, pid: ProcId) -> bool {
        self.procs[pid.0 as usize].configured
    }

    pub(crate) fn is_running(&self, pid: ProcId) -> bool {
        self.procs[pid.0 as usize].running
    }

    /// Marks every configured process as running. Called once, in the final
    /// startup critical section.
    pub(crate) fn mark_configured_running(&mut self) {
        for p in &mut self.procs {
            if p.configured {
                p.running = true;
            }
        }
    }

    /// Marks `pid` as suspended. There is no way back: a suspended process
    /// stays suspended until reset.
    pub(crate) fn suspend(&mut self, pid: ProcId) {
        self.procs[pid.0 as usize].running = false;
    }

    /// Bumps the per-kind and total failure counters for `pid`. Both
    /// saturate rather than wrap, so a process that has failed four billion
    /// times does not suddenly look healthy.
    pub(crate) fn record_failure(&mut self, pid: ProcId, kind: FaultKind) {
        let p = &mut self.procs[pid.0 as usize];
        p.total_failures = p.total_failures.saturating_add(1);
        let c = &mut p.failures[kind.as_index()];
        *c = c.saturating_add(1);
    }

    pub(crate) fn total_failures(&self, pid: ProcId) -> u32 {
        self.procs[pid.0 as usize].total_failures
    }

    pub(crate) fn failures(&self, pid: ProcId, kind: FaultKind) -> u32 {
        self.procs[pid.0 as usize].failures[kind.as_index()]
    }

    pub(crate) fn stack_reserve(&self, pid: ProcId) -> usize {
        self.procs[pid.0 as usize].stack_reserve
    }

    pub(crate) fn grant_run_task(&mut self, caller: ProcId, target: ProcId) {
        self.run_task_grants |= permission_bit(caller, target);
    }

    pub(crate) fn grant_suspend(&mut self, caller: ProcId, target: ProcId) {
        self.suspend_grants |= permission_bit(caller, target);
    }

    pub(crate) fn run_task_grants(&self) -> u16 {
        self.run_task_grants
    }

    pub(crate) fn suspend_grants(&self) -> u16 {
        self.suspend_grants
    }

    pub(crate) fn may_run_task(&self, caller: ProcId, target: ProcId) -> bool {
        self.run_task_grants & permission_bit(caller, target) != 0
    }

    pub(crate) fn may_suspend(&self, caller: ProcId, target: ProcId) -> bool {
        self.suspend_grants & permission_bit(caller, target) != 0
    }

    /// Tests whether `pid` has read access to `slice` as normal memory.
    /// This is used to validate kernel accesses to the memory on the
    /// process's behalf.
    ///
    /// Note that every process can "read" any empty slice: an empty slice
    /// confers no authority as far as the kernel is concerned.
    #[must_use]
    pub(crate) fn can_read<T>(&self, pid: ProcId, slice: &USlice<T>) -> bool {
        if slice.is_empty() {
            return true;
        }
        self.procs[pid.0 as usize].regions.iter().any(|region| {
            region.contains(slice.base_addr())
                && region.contains(slice.end_addr() - 1)
                && region.attributes.contains(RegionAttributes::READ)
                && !region.attributes.contains(RegionAttributes::DEVICE)
        })
    }
}

/// Describes a user process to the kernel: stack sizing and the memory
/// regions the process may hand to syscalls. Configuration-time only.
///
/// A process whose stack configuration is unusable is reported immediately
/// and left unconfigured, which in turn makes startup reject any task
/// registered for it.
pub fn register_process(
    pid: ProcId,
    cfg: ProcessConfig,
) -> Result<(), ConfigError> {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if k.live {
            return Err(ConfigError::ConfigurationOfRunningKernel);
        }
        if !pid.is_user() {
            return Err(ConfigError::BadProcessId);
        }
        if cfg.stack_size == 0 || cfg.stack_size % 8 != 0 {
            return Err(ConfigError::PrcStackInvalid);
        }
        k.procs.configure(pid, &cfg);
        Ok(())
    })
}

/// Grants `caller` the right to run tasks inside `target` with the
/// `run_task` syscall. Configuration-time only; whether the grant is
/// *acceptable* (it must not name the supervisor) is checked at startup,
/// once the supervisor is known.
pub fn grant_permission_run_task(
    caller: ProcId,
    target: ProcId,
) -> Result<(), ConfigError> {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if k.live {
            return Err(ConfigError::ConfigurationOfRunningKernel);
        }
        if !caller.is_user() || !target.is_user() {
            return Err(ConfigError::BadProcessId);
        }
        k.procs.grant_run_task(caller, target);
        Ok(())
    })
}

/// Grants `caller` the right to suspend `target`. Same rules as
/// [`grant_permission_run_task`].
pub fn grant_permission_suspend_process(
    caller: ProcId,
    target: ProcId,
) -> Result<(), ConfigError> {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if k.live {
            return Err(ConfigError::ConfigurationOfRunningKernel);
        }
        if !caller.is_user() || !target.is_user() {
            return Err(ConfigError::BadProcessId);
        }
        k.procs.grant_suspend(caller, target);
        Ok(())
    })
}

/// Suspends `target` from kernel context. Its in-flight tasks are aborted
/// at their next kernel transition; future activations of its tasks are
/// skipped. The kernel API is trusted and performs no grant check, but it
/// still refuses to name the kernel itself or the supervisor: no code
/// path in this kernel suspends the supervisor, ever.
pub fn os_suspend_process(target: ProcId) {
    uassert!(target.is_user());
    let _section = Section::enter();
    arch::with_kernel(|k| {
        uassert!(
            target != k.max_pid_in_use,
            "refusing to suspend the supervisor"
        );
        k.procs.suspend(target);
    });
}

/// Reads the total failure counter of `pid`.
pub fn total_failure_count(pid: ProcId) -> u32 {
    let _section = Section::enter();
    arch::with_kernel(|k| k.procs.total_failures(pid))
}

/// Reads the failure counter of `pid` for one particular kind.
pub fn failure_count(pid: ProcId, kind: FaultKind) -> u32 {
    let _section = Section::enter();
    arch::with_kernel(|k| k.procs.failures(pid, kind))
}

/// Reads the stack reserve of `pid`. Hosted builds do not model stack
/// consumption, so this reports the configured size; a bare-metal port
/// would subtract the high-water mark found by stack painting.
pub fn stack_reserve(pid: ProcId) -> usize {
    let _section = Section::enter();
    arch::with_kernel(|k| k.procs.stack_reserve(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_counters_saturate() {
        let mut t = ProcessTable::new();
        let pid = ProcId(2);
        for _ in 0..3 {
            t.record_failure(pid, FaultKind::Deadline);
        }
        assert_eq!(t.failures(pid, FaultKind::Deadline), 3);
        assert_eq!(t.total_failures(pid), 3);

        // Force the counters to the rim and step over it.
        t.procs[2].total_failures = u32::MAX;
        t.procs[2].failures[FaultKind::Deadline.as_index()] = u32::MAX;
        t.record_failure(pid, FaultKind::Deadline);
        assert_eq!(t.failures(pid, FaultKind::Deadline), u32::MAX);
        assert_eq!(t.total_failures(pid), u32::MAX);
    }

    #[test]
    fn grants_are_per_pair() {
        let mut t = ProcessTable::new();
        t.grant_run_task(ProcId(1), ProcId(2));
        assert!(t.may_run_task(ProcId(1), ProcId(2)));
        assert!(!t.may_run_task(ProcId(2), ProcId(1)));
        assert!(!t.may_run_task(ProcId(1), ProcId(3)));
        assert!(!t.may_suspend(ProcId(1), ProcId(2)));
    }

    #[test]
    fn read_validation_uses_regions() {
        static REGIONS: [MemRegion; 1] = [MemRegion {
            base: 0x4000,
            size: 0x1000,
            attributes: RegionAttributes::READ,
        }];
        let mut t = ProcessTable::new();
        t.configure(
            ProcId(1),
            &ProcessConfig {
                stack_size: 256,
                regions: &REGIONS,
            },
        );

        let inside = USlice::<u32>::from_raw(0x4000, 4).unwrap();
        let spanning = USlice::<u32>::from_raw(0x4FFC, 2).unwrap();
        let outside = USlice::<u32>::from_raw(0x8000, 1).unwrap();
        assert!(t.can_read(ProcId(1), &inside));
        assert!(!t.can_read(ProcId(1), &spanning));
        assert!(!t.can_read(ProcId(1), &outside));
        // Empty slices confer no authority and are always "readable."
        assert!(t.can_read(ProcId(2), &USlice::<u32>::from_raw(0, 0).unwrap()));
    }
}
