// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here
//! in the `arch` module, magically tailored for the current target.
//!
//! For this to work, each port module must define the same set of names:
//! the preemption gate primitives, kernel-state access, the user-task
//! entry/exit machinery, and the `klog!`/`uassert!` macros.

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        #[macro_use]
        pub mod hosted;
        pub use hosted::*;
    } else {
        // Bare-metal ports (the e200z4 this kernel grew up against, say)
        // slot in here as further arms of this chain.
        compile_error!("no port implemented for this target");
    }
}
