// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration and startup validation.
//!
//! Every test gets a fresh kernel: the hosted port keeps one instance per
//! thread and the test harness runs each test on its own thread.

use abi::{
    ConfigError, EventConfig, EventId, MemRegion, Priority, ProcId,
    ProcessConfig, MAX_LOCKABLE_PRIORITY, MAX_TASK_BUDGET_US,
};

static ALL_REGIONS: [MemRegion; 1] = [MemRegion::all()];

fn user_process(pid: u8) {
    kern::register_process(
        ProcId(pid),
        ProcessConfig {
            stack_size: 1024,
            regions: &ALL_REGIONS,
        },
    )
    .unwrap();
}

fn sw_event(priority: u8) -> EventId {
    kern::create_event(EventConfig {
        priority: Priority(priority),
        ..EventConfig::default()
    })
    .unwrap()
}

fn nop_os_task() {}

fn nop_user_task(_pid: ProcId, _arg: usize) -> i32 {
    0
}

#[test]
fn minimal_configuration_starts_and_then_freezes() {
    let ev = sw_event(3);
    kern::register_os_task(ev, nop_os_task).unwrap();
    kern::start_kernel().unwrap();

    assert_eq!(
        kern::create_event(EventConfig::default()).unwrap_err(),
        ConfigError::ConfigurationOfRunningKernel
    );
    assert_eq!(
        kern::register_os_task(ev, nop_os_task).unwrap_err(),
        ConfigError::ConfigurationOfRunningKernel
    );
    assert_eq!(
        kern::register_process(
            ProcId(1),
            ProcessConfig {
                stack_size: 1024,
                regions: &ALL_REGIONS,
            }
        )
        .unwrap_err(),
        ConfigError::ConfigurationOfRunningKernel
    );
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::ConfigurationOfRunningKernel
    );
}

#[test]
fn startup_requires_events_and_tasks() {
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::NoEventOrTaskRegistered
    );
}

#[test]
fn startup_rejects_event_without_task() {
    let a = sw_event(3);
    let _b = sw_event(4);
    kern::register_os_task(a, nop_os_task).unwrap();
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::EventWithoutTask
    );
}

#[test]
fn startup_rejects_task_in_unregistered_process() {
    let ev = sw_event(3);
    kern::register_user_task(ev, nop_user_task, ProcId(1), 0).unwrap();
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::TaskBelongsToInvalidProcess
    );
}

#[test]
fn process_registration_validates_stack() {
    let bad = |stack_size| {
        kern::register_process(
            ProcId(1),
            ProcessConfig {
                stack_size,
                regions: &ALL_REGIONS,
            },
        )
        .unwrap_err()
    };
    assert_eq!(bad(0), ConfigError::PrcStackInvalid);
    assert_eq!(bad(1020), ConfigError::PrcStackInvalid);
    assert_eq!(
        kern::register_process(
            ProcId(0),
            ProcessConfig {
                stack_size: 1024,
                regions: &ALL_REGIONS,
            }
        )
        .unwrap_err(),
        ConfigError::BadProcessId
    );
}

#[test]
fn task_registration_validates_arguments() {
    let ev = sw_event(3);
    user_process(1);
    assert_eq!(
        kern::register_user_task(ev, nop_user_task, ProcId(0), 0)
            .unwrap_err(),
        ConfigError::BadProcessId
    );
    assert_eq!(
        kern::register_user_task(ev, nop_user_task, ProcId(5), 0)
            .unwrap_err(),
        ConfigError::BadProcessId
    );
    assert_eq!(
        kern::register_user_task(
            ev,
            nop_user_task,
            ProcId(1),
            MAX_TASK_BUDGET_US + 1
        )
        .unwrap_err(),
        ConfigError::TaskBudgetTooBig
    );
    assert_eq!(
        kern::register_user_task(EventId(7), nop_user_task, ProcId(1), 0)
            .unwrap_err(),
        ConfigError::BadEventId
    );
}

#[test]
fn init_task_cannot_be_redefined() {
    fn init(_pid: ProcId) -> i32 {
        0
    }
    user_process(1);
    kern::register_init_task(init, ProcId(1), 0).unwrap();
    assert_eq!(
        kern::register_init_task(init, ProcId(1), 0).unwrap_err(),
        ConfigError::InitTaskRedefined
    );
}

#[test]
fn failing_init_task_aborts_startup() {
    fn bad_init(_pid: ProcId) -> i32 {
        -1
    }
    let ev = sw_event(3);
    kern::register_os_task(ev, nop_os_task).unwrap();
    user_process(1);
    kern::register_init_task(bad_init, ProcId(1), 0).unwrap();
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::InitTaskFailed
    );
}

#[test]
fn init_tasks_run_kernel_first_then_ascending() {
    use std::sync::Mutex;
    static ORDER: Mutex<Vec<u8>> = Mutex::new(Vec::new());
    fn record(pid: ProcId) -> i32 {
        ORDER.lock().unwrap().push(pid.0);
        0
    }

    let ev = sw_event(3);
    kern::register_os_task(ev, nop_os_task).unwrap();
    user_process(1);
    user_process(3);
    // Registration order scrambled on purpose.
    kern::register_init_task(record, ProcId(3), 0).unwrap();
    kern::register_init_task(record, ProcId(0), 0).unwrap();
    kern::register_init_task(record, ProcId(1), 0).unwrap();
    kern::start_kernel().unwrap();

    assert_eq!(*ORDER.lock().unwrap(), vec![0, 1, 3]);
}

#[test]
fn grants_must_not_name_the_supervisor() {
    let ev = sw_event(3);
    user_process(1);
    user_process(2);
    kern::register_user_task(ev, nop_user_task, ProcId(1), 0).unwrap();
    kern::register_user_task(ev, nop_user_task, ProcId(2), 0).unwrap();
    // Process 2 is the highest in use, hence the supervisor.
    kern::grant_permission_run_task(ProcId(1), ProcId(2)).unwrap();
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::RunTaskBadPermission
    );
}

#[test]
fn suspend_grants_must_not_name_the_supervisor() {
    let ev = sw_event(3);
    user_process(1);
    user_process(2);
    kern::register_user_task(ev, nop_user_task, ProcId(2), 0).unwrap();
    kern::register_os_task(ev, nop_os_task).unwrap();
    kern::grant_permission_suspend_process(ProcId(1), ProcId(2)).unwrap();
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::SuspendProcessBadPermission
    );
}

#[test]
fn lockable_range_is_reserved_for_kernel_and_supervisor() {
    let high = sw_event(MAX_LOCKABLE_PRIORITY + 1);
    user_process(1);
    user_process(2);
    kern::register_user_task(high, nop_user_task, ProcId(1), 0).unwrap();
    // Give the supervisor a task somewhere so process 2 is the max in use.
    let low = sw_event(2);
    kern::register_user_task(low, nop_user_task, ProcId(2), 0).unwrap();
    assert_eq!(
        kern::start_kernel().unwrap_err(),
        ConfigError::HighPriorityTaskInLowPrivilegeProcess
    );
}

#[test]
fn lockable_range_admits_supervisor_and_kernel_tasks() {
    let high = sw_event(MAX_LOCKABLE_PRIORITY + 1);
    user_process(2);
    kern::register_user_task(high, nop_user_task, ProcId(2), 0).unwrap();
    kern::register_os_task(high, nop_os_task).unwrap();
    let low = sw_event(2);
    kern::register_os_task(low, nop_os_task).unwrap();
    kern::start_kernel().unwrap();
}

#[test]
fn event_ids_reflect_creation_order_not_priority() {
    let prios = [2u8, 9, 4, 9, 1, 12, 4];
    let ids: Vec<EventId> = prios.iter().map(|&p| sw_event(p)).collect();
    for (id, &p) in ids.iter().zip(&prios) {
        assert_eq!(kern::event_priority(*id), Priority(p));
    }
    // IDs are dense and ordered by creation.
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(id.0 as usize, i);
    }
}

#[test]
fn init_triggered_events_run_at_go_live() {
    use std::sync::atomic::{AtomicU32, Ordering};
    static FIRED: AtomicU32 = AtomicU32::new(0);
    static EV: AtomicU32 = AtomicU32::new(0);
    fn count() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }
    fn init(_pid: ProcId) -> i32 {
        // Deferred: the kernel isn't live yet, so this must not launch
        // anything here...
        assert!(kern::os_trigger_event(EventId(EV.load(Ordering::Relaxed) as u8)));
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
        0
    }

    let ev = sw_event(6);
    EV.store(ev.0 as u32, Ordering::Relaxed);
    kern::register_os_task(ev, count).unwrap();
    user_process(1);
    kern::register_init_task(init, ProcId(1), 0).unwrap();
    kern::start_kernel().unwrap();

    // ...but it must have run by the time startup hands control back.
    assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    assert_eq!(kern::activation_loss_count(ev), 0);
}
