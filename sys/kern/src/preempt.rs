// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The preemption gate.
//!
//! Every critical section in this kernel is a span with preemption
//! suspended at the CPU level. The underlying primitives come from the
//! port (`arch::suspend_preemption` / `arch::resume_preemption`) and nest
//! by stacking the returned tokens; this module wraps them in a guard value
//! so that every suspend is paired with a resume on all exit paths,
//! including unwinding ones.
//!
//! Note what this does and does not promise: a held `Section` keeps
//! asynchronous contexts (interrupt handlers) of any maskable priority from
//! running. It is not a memory fence and says nothing about other cores;
//! there are none in this kernel's world.

use crate::arch;

/// An open critical section. While one of these is alive, preemption is
/// suspended; dropping it resumes the state captured at entry.
pub(crate) struct Section {
    token: arch::PreemptionToken,
}

impl Section {
    /// Suspends preemption and returns the guard.
    pub(crate) fn enter() -> Self {
        Self {
            token: arch::suspend_preemption(),
        }
    }

    /// Runs `body` with preemption re-enabled, then re-enters the section.
    ///
    /// This is the scheduler's window for executing task bodies: the
    /// critical section is handed over rather than torn down, so the code
    /// before the window and the code after it read as one protected
    /// region, matching how the interrupt mask actually behaves.
    pub(crate) fn open_for<R>(self, body: impl FnOnce() -> R) -> (Self, R) {
        drop(self);
        let r = body();
        (Self::enter(), r)
    }
}

impl Drop for Section {
    fn drop(&mut self) {
        arch::resume_preemption(self.token);
    }
}
