// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler behavior, driven through kernel tasks and the hosted port's
//! simulated clock and interrupts.
//!
//! Time only moves when a test says so, which makes every trace in here
//! exact: the asserted counts are not "about right," they are the only
//! possible outcome of the tick sequence the test generates.

use std::sync::atomic::{AtomicU32, Ordering};

use abi::{EventConfig, EventId, Priority};
use kern::arch::{busy_wait_ticks, fire_interrupt, fire_timer_tick};

fn event(priority: u8, cycle: u32, first: u32) -> EventId {
    kern::create_event(EventConfig {
        cycle,
        first_activation: first,
        priority: Priority(priority),
        ..EventConfig::default()
    })
    .unwrap()
}

#[test]
fn cyclic_event_fires_on_cadence() {
    static FIRED: AtomicU32 = AtomicU32::new(0);
    fn count() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    // Set RUST_LOG=trace to watch the scheduler think.
    let _ = env_logger::builder().is_test(true).try_init();

    let ev = event(3, 10, 10);
    kern::register_os_task(ev, count).unwrap();
    kern::start_kernel().unwrap();

    for _ in 0..100 {
        fire_timer_tick();
    }
    assert_eq!(FIRED.load(Ordering::Relaxed), 10);
    assert_eq!(kern::activation_loss_count(ev), 0);
    assert_eq!(kern::current_time(), 100);
}

#[test]
fn urgent_event_preempts_busy_task() {
    static A_RUNS: AtomicU32 = AtomicU32::new(0);
    static B_RUNS: AtomicU32 = AtomicU32::new(0);
    fn a_task() {
        busy_wait_ticks(3);
        A_RUNS.fetch_add(1, Ordering::Relaxed);
    }
    fn b_task() {
        B_RUNS.fetch_add(1, Ordering::Relaxed);
    }

    let a = event(2, 5, 5);
    let b = event(5, 1, 1);
    kern::register_os_task(a, a_task).unwrap();
    kern::register_os_task(b, b_task).unwrap();
    kern::start_kernel().unwrap();

    while kern::current_time() < 20 {
        fire_timer_tick();
    }

    // The busy stretches inside `a_task` push the final time past 20, but
    // b must have fired on every single tick regardless of who was on the
    // CPU when it came due.
    let elapsed = kern::current_time();
    assert_eq!(elapsed, 23);
    assert_eq!(B_RUNS.load(Ordering::Relaxed), elapsed);
    assert_eq!(A_RUNS.load(Ordering::Relaxed), 4);
    assert_eq!(kern::activation_loss_count(a), 0);
    assert_eq!(kern::activation_loss_count(b), 0);
}

#[test]
fn overrunning_cyclic_event_loses_activations() {
    static RUNS: AtomicU32 = AtomicU32::new(0);
    fn overrunner() {
        busy_wait_ticks(5);
        RUNS.fetch_add(1, Ordering::Relaxed);
    }

    let ev = event(3, 2, 2);
    kern::register_os_task(ev, overrunner).unwrap();
    kern::start_kernel().unwrap();

    while kern::current_time() < 20 {
        fire_timer_tick();
    }

    // Runs start at t = 2, 8, 14, 20; each one sits on the CPU for five
    // ticks and eats the two activations that come due meanwhile.
    assert_eq!(kern::current_time(), 25);
    assert_eq!(RUNS.load(Ordering::Relaxed), 4);
    assert_eq!(kern::activation_loss_count(ev), 8);
}

#[test]
fn equal_priority_ping_pong_terminates() {
    static A_RUNS: AtomicU32 = AtomicU32::new(0);
    static B_RUNS: AtomicU32 = AtomicU32::new(0);
    static C_RUNS: AtomicU32 = AtomicU32::new(0);
    static B_ID: AtomicU32 = AtomicU32::new(0);
    static A_ID: AtomicU32 = AtomicU32::new(0);
    fn a_task() {
        assert!(kern::os_trigger_event(EventId(
            B_ID.load(Ordering::Relaxed) as u8
        )));
        A_RUNS.fetch_add(1, Ordering::Relaxed);
    }
    fn b_task() {
        assert!(kern::os_trigger_event(EventId(
            A_ID.load(Ordering::Relaxed) as u8
        )));
        B_RUNS.fetch_add(1, Ordering::Relaxed);
    }
    fn c_task() {
        C_RUNS.fetch_add(1, Ordering::Relaxed);
    }

    let a = event(4, 0, 0);
    let b = event(4, 0, 0);
    let c = event(2, 0, 0);
    A_ID.store(a.0 as u32, Ordering::Relaxed);
    B_ID.store(b.0 as u32, Ordering::Relaxed);
    kern::register_os_task(a, a_task).unwrap();
    kern::register_os_task(b, b_task).unwrap();
    kern::register_os_task(c, c_task).unwrap();
    kern::start_kernel().unwrap();

    // If the group link were a plain cycle this call would never return.
    assert!(kern::os_trigger_event(a));

    // a ran once and left exactly one activation (b's) pending; neither
    // lost anything.
    assert_eq!(A_RUNS.load(Ordering::Relaxed), 1);
    assert_eq!(B_RUNS.load(Ordering::Relaxed), 0);
    assert_eq!(kern::activation_loss_count(a), 0);
    assert_eq!(kern::activation_loss_count(b), 0);

    // The pending activation doesn't starve anything below the group: c is
    // immediately serviceable.
    assert!(kern::os_trigger_event(c));
    assert_eq!(C_RUNS.load(Ordering::Relaxed), 1);

    // And b really is still pending: another trigger is a loss.
    assert!(!kern::os_trigger_event(b));
    assert_eq!(kern::activation_loss_count(b), 1);
}

#[test]
fn equal_priority_group_rechecked_after_completion() {
    static ORDER: AtomicU32 = AtomicU32::new(0);
    static E_SEQ: AtomicU32 = AtomicU32::new(0);
    static F_SEQ: AtomicU32 = AtomicU32::new(0);
    static E_ID: AtomicU32 = AtomicU32::new(0);
    fn e_task() {
        E_SEQ.store(ORDER.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Relaxed);
    }
    fn f_task() {
        assert!(kern::os_trigger_event(EventId(
            E_ID.load(Ordering::Relaxed) as u8
        )));
        F_SEQ.store(ORDER.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Relaxed);
    }

    let e = event(4, 0, 0);
    let f = event(4, 0, 0);
    E_ID.store(e.0 as u32, Ordering::Relaxed);
    kern::register_os_task(e, e_task).unwrap();
    kern::register_os_task(f, f_task).unwrap();
    kern::start_kernel().unwrap();

    // f occupies the later slot of the group; on completion the scheduler
    // walks back to the head of the group and finds e's fresh activation
    // before descending.
    assert!(kern::os_trigger_event(f));
    assert_eq!(F_SEQ.load(Ordering::Relaxed), 1);
    assert_eq!(E_SEQ.load(Ordering::Relaxed), 2);
}

#[test]
fn triggers_from_interrupts_wait_for_the_epilogue() {
    static FIRED: AtomicU32 = AtomicU32::new(0);
    static EV: AtomicU32 = AtomicU32::new(0);
    fn count() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    let ev = event(7, 0, 0);
    EV.store(ev.0 as u32, Ordering::Relaxed);
    kern::register_os_task(ev, count).unwrap();
    kern::start_kernel().unwrap();

    fire_interrupt(3, || {
        assert!(kern::os_trigger_event(EventId(
            EV.load(Ordering::Relaxed) as u8
        )));
        // Still inside the interrupt: nothing may have launched.
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
    });
    // The epilogue on the way out of the interrupt ran the event.
    assert_eq!(FIRED.load(Ordering::Relaxed), 1);
}

#[test]
fn priority_order_holds_across_mixed_triggers() {
    use std::sync::Mutex;
    static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
    static H_ID: AtomicU32 = AtomicU32::new(0);
    static L_ID: AtomicU32 = AtomicU32::new(0);
    fn h_task() {
        ORDER.lock().unwrap().push("h");
    }
    fn m_task() {
        // Less urgent: noted, deferred past us.
        assert!(kern::os_trigger_event(EventId(
            L_ID.load(Ordering::Relaxed) as u8
        )));
        // More urgent: preempts this task on the spot.
        assert!(kern::os_trigger_event(EventId(
            H_ID.load(Ordering::Relaxed) as u8
        )));
        ORDER.lock().unwrap().push("m");
    }
    fn l_task() {
        ORDER.lock().unwrap().push("l");
    }

    let h = event(8, 0, 0);
    let m = event(5, 0, 0);
    let l = event(3, 0, 0);
    H_ID.store(h.0 as u32, Ordering::Relaxed);
    L_ID.store(l.0 as u32, Ordering::Relaxed);
    kern::register_os_task(h, h_task).unwrap();
    kern::register_os_task(m, m_task).unwrap();
    kern::register_os_task(l, l_task).unwrap();
    kern::start_kernel().unwrap();

    assert!(kern::os_trigger_event(m));
    assert_eq!(*ORDER.lock().unwrap(), vec!["h", "m", "l"]);
}

#[test]
fn ceiling_raise_defers_and_lower_releases() {
    static FIRED: AtomicU32 = AtomicU32::new(0);
    fn count() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    let ev = event(5, 0, 0);
    kern::register_os_task(ev, count).unwrap();
    kern::start_kernel().unwrap();

    let prior = kern::os_suspend_all_tasks_by_priority(Priority(5));
    assert_eq!(prior, Priority(0));
    assert_eq!(kern::current_task_priority(), Priority(5));

    // Accepted, but held behind the ceiling.
    assert!(kern::os_trigger_event(ev));
    assert_eq!(FIRED.load(Ordering::Relaxed), 0);

    // Lowering runs the deferred work before returning.
    kern::os_resume_all_tasks_by_priority(prior);
    assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    assert_eq!(kern::current_task_priority(), Priority(0));
}

#[test]
fn tasks_of_one_event_run_in_registration_order() {
    use std::sync::Mutex;
    static ORDER: Mutex<Vec<u8>> = Mutex::new(Vec::new());
    fn first() {
        ORDER.lock().unwrap().push(1);
    }
    fn second() {
        ORDER.lock().unwrap().push(2);
    }
    fn third() {
        ORDER.lock().unwrap().push(3);
    }

    // A second event forces the task table to interleave storage, which is
    // exactly what the run bookkeeping has to survive.
    let other = event(9, 0, 0);
    let ev = event(4, 0, 0);
    kern::register_os_task(ev, first).unwrap();
    kern::register_os_task(other, third).unwrap();
    kern::register_os_task(ev, second).unwrap();
    kern::start_kernel().unwrap();

    assert!(kern::os_trigger_event(ev));
    assert_eq!(*ORDER.lock().unwrap(), vec![1, 2]);
    assert!(kern::os_trigger_event(other));
    assert_eq!(*ORDER.lock().unwrap(), vec![1, 2, 3]);
}
