// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The event registry.
//!
//! Events are the only things that make tasks run. Each descriptor owns a
//! priority, an optional cycle time, and a contiguous run of entries in the
//! task table. Descriptors live in one fixed array kept sorted by
//! non-increasing priority, so the scheduler's walk "most urgent first" is
//! a plain forward traversal; a terminator of priority 0 sits one past the
//! last real descriptor and stops every walk without a bounds check of its
//! own.
//!
//! Because descriptors move around as higher-priority events are created,
//! application code never holds a slot index. It holds an [`EventId`]
//! assigned in creation order, and a small table maps IDs to slots after
//! every insertion.

use abi::{
    ConfigError, EventConfig, EventId, EventState, Priority, ProcId,
    EVENT_TIME_MASK, MAX_EVENTS, MAX_EVENT_PRIORITY,
};
use static_assertions::const_assert;

use crate::arch;
use crate::preempt::Section;

// Slot indices (including the terminator's) must fit the 8-bit maps below.
const_assert!(MAX_EVENTS + 1 <= u8::MAX as usize);

/// One event descriptor.
#[derive(Copy, Clone, Debug)]
pub(crate) struct EventDesc {
    pub(crate) state: EventState,
    pub(crate) priority: Priority,
    /// Trigger period in ticks; 0 for software-triggered events.
    pub(crate) cycle: u32,
    /// Absolute tick of the next cyclic activation. Wraps with the clock.
    pub(crate) next_due: u32,
    /// Lowest process permitted to trigger this event by syscall.
    pub(crate) min_pid_to_trigger: ProcId,
    /// Count of activations that were lost because the event was not idle
    /// when triggered. Saturating.
    pub(crate) activation_loss: u32,
    /// First entry of this event's task run in the task table.
    pub(crate) first_task: usize,
    /// Number of tasks in the run.
    pub(crate) task_count: usize,
    /// Where the scheduler continues after completing this event: back to
    /// the head of this priority group for every member but the head, and
    /// past the group for the head itself. Built at startup.
    pub(crate) group_link: usize,
    /// Creation-order identity, used to rebuild the ID map when slots
    /// shift.
    pub(crate) id: EventId,
}

impl EventDesc {
    /// The terminator, and the initial value of unused slots.
    const GUARD: Self = Self {
        state: EventState::Idle,
        priority: Priority::IDLE,
        cycle: 0,
        next_due: 0,
        min_pid_to_trigger: ProcId::KERNEL_ONLY,
        activation_loss: 0,
        first_task: 0,
        task_count: 0,
        group_link: 0,
        id: EventId(0),
    };

    /// Records an activation attempt. Succeeds only from `Idle`; otherwise
    /// the activation is lost and counted.
    #[must_use]
    pub(crate) fn mark_triggered(&mut self) -> bool {
        if self.state == EventState::Idle {
            uassert!(self.state.may_transition_to(EventState::Triggered));
            self.state = EventState::Triggered;
            true
        } else {
            self.activation_loss = self.activation_loss.saturating_add(1);
            false
        }
    }

    /// Scheduler acknowledgment: the event's tasks are about to run.
    pub(crate) fn acknowledge(&mut self) {
        uassert!(self.state.may_transition_to(EventState::InProgress));
        self.state = EventState::InProgress;
    }

    /// Scheduler completion: the event's tasks have run; the event may be
    /// triggered again.
    pub(crate) fn complete(&mut self) {
        uassert!(self.state.may_transition_to(EventState::Idle));
        self.state = EventState::Idle;
    }
}

pub(crate) struct EventTable {
    /// Descriptors, sorted by non-increasing priority, terminator last.
    slots: [EventDesc; MAX_EVENTS + 1],
    /// Number of real descriptors; also the terminator's slot index.
    count: usize,
    /// Creation-order ID to current slot index.
    by_id: [u8; MAX_EVENTS],
    /// For each priority `p`, the first slot whose priority does not exceed
    /// `p`. Built at startup; used to resume scanning after the effective
    /// priority is lowered.
    first_at_or_below: [u8; MAX_EVENT_PRIORITY as usize + 1],
}

impl EventTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: [EventDesc::GUARD; MAX_EVENTS + 1],
            count: 0,
            by_id: [0; MAX_EVENTS],
            first_at_or_below: [0; MAX_EVENT_PRIORITY as usize + 1],
        }
    }

    /// Number of real descriptors.
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn slot(&self, idx: usize) -> &EventDesc {
        &self.slots[idx]
    }

    pub(crate) fn slot_mut(&mut self, idx: usize) -> &mut EventDesc {
        &mut self.slots[idx]
    }

    /// Maps a public ID to its current slot.
    pub(crate) fn slot_of(&self, id: EventId) -> Option<usize> {
        if (id.0 as usize) < self.count {
            Some(self.by_id[id.0 as usize] as usize)
        } else {
            None
        }
    }

    /// Entry point for a scan that should consider everything of priority
    /// `p` and below. Priorities above the event range are treated as the
    /// top of it.
    pub(crate) fn first_at_or_below(&self, p: Priority) -> usize {
        let p = p.0.min(MAX_EVENT_PRIORITY) as usize;
        self.first_at_or_below[p] as usize
    }

    /// Creates a descriptor, keeping the array sorted. The new descriptor
    /// goes to the first slot where it strictly out-prioritizes the
    /// incumbent, i.e. after any existing descriptors of equal priority.
    pub(crate) fn create(
        &mut self,
        cfg: &EventConfig,
    ) -> Result<EventId, ConfigError> {
        if self.count >= MAX_EVENTS {
            return Err(ConfigError::TooManyEvents);
        }
        if !cfg.priority.is_valid_for_event() {
            return Err(ConfigError::InvalidEventPriority);
        }
        if cfg.cycle == 0 && cfg.first_activation != 0 {
            return Err(ConfigError::BadEventTiming);
        }
        if cfg.cycle & !EVENT_TIME_MASK != 0
            || cfg.first_activation & !EVENT_TIME_MASK != 0
        {
            return Err(ConfigError::BadEventTiming);
        }
        if cfg.min_pid_to_trigger > ProcId::KERNEL_ONLY {
            return Err(ConfigError::EventNotTriggerable);
        }

        let id = EventId(self.count as u8);
        let pos = (0..self.count)
            .find(|&i| cfg.priority.exceeds(self.slots[i].priority))
            .unwrap_or(self.count);
        self.slots.copy_within(pos..self.count, pos + 1);
        self.slots[pos] = EventDesc {
            state: EventState::Idle,
            priority: cfg.priority,
            cycle: cfg.cycle,
            next_due: cfg.first_activation,
            min_pid_to_trigger: cfg.min_pid_to_trigger,
            activation_loss: 0,
            first_task: 0,
            task_count: 0,
            group_link: 0,
            id,
        };
        self.count += 1;
        self.slots[self.count] = EventDesc::GUARD;

        // Rebuild the ID map; linear, and configuration-time only.
        for i in 0..self.count {
            self.by_id[self.slots[i].id.0 as usize] = i as u8;
        }
        Ok(id)
    }

    /// Builds the structures the scheduler walks at run time: the
    /// next-in-priority-group links, the priority entry-point map, and the
    /// terminator. Called once, from startup, after the table is final.
    ///
    /// Within a priority group occupying slots `f..=l`, every member after
    /// `f` links back to `f` -- completing one of them re-scans the whole
    /// group before anything less urgent runs -- while `f` itself links to
    /// `l + 1`, stepping past the group. That asymmetry is what keeps two
    /// equal-priority events that keep re-triggering each other from
    /// starving everything below them: once the walk comes back around to
    /// the head of the group and finishes it, it moves on.
    pub(crate) fn build_schedule_links(&mut self) {
        let n = self.count;
        let mut f = 0;
        while f < n {
            let mut l = f;
            while l + 1 < n
                && self.slots[l + 1].priority == self.slots[f].priority
            {
                l += 1;
            }
            self.slots[f].group_link = l + 1;
            for i in f + 1..=l {
                self.slots[i].group_link = f;
            }
            f = l + 1;
        }
        self.slots[n] = EventDesc::GUARD;

        for p in 0..=MAX_EVENT_PRIORITY as usize {
            let first = (0..n)
                .find(|&i| !self.slots[i].priority.exceeds(Priority(p as u8)))
                .unwrap_or(n);
            self.first_at_or_below[p] = first as u8;
        }
    }
}

/// Creates an event. Configuration-time only.
///
/// The returned ID reflects creation order and stays valid no matter what
/// is created afterwards.
pub fn create_event(cfg: EventConfig) -> Result<EventId, ConfigError> {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        if k.live {
            return Err(ConfigError::ConfigurationOfRunningKernel);
        }
        k.events.create(&cfg)
    })
}

/// Reads the activation-loss counter of an event.
pub fn activation_loss_count(id: EventId) -> u32 {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        let idx = k.events.slot_of(id);
        uassert!(idx.is_some());
        idx.map(|i| k.events.slot(i).activation_loss).unwrap_or(0)
    })
}

/// Reads the priority an event was created with.
pub fn event_priority(id: EventId) -> Priority {
    let _section = Section::enter();
    arch::with_kernel(|k| {
        let idx = k.events.slot_of(id);
        uassert!(idx.is_some());
        idx.map(|i| k.events.slot(i).priority)
            .unwrap_or(Priority::IDLE)
    })
}
