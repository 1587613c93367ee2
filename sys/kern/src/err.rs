// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! This module is designed around the idea that kernel code spends too much
//! time handling and recording errors, and we ought to be able to separate
//! that concern using `Result`.

use abi::FaultKind;

/// An error committed by user code when interacting with a syscall.
///
/// This is used internally as the returned error type for syscall
/// implementations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserError {
    /// A recoverable error. Recoverable errors are indicated to the errant
    /// task by returning a response code (the field); the task keeps
    /// running.
    Recoverable(u32),
    /// An unrecoverable error. Unrecoverable errors abort the calling task
    /// and are counted against its process under the given kind.
    Unrecoverable(FaultKind),
}

/// Convenience conversion from `FaultKind`, so that syscall code can use
/// `?` on anything that classifies a fault.
impl From<FaultKind> for UserError {
    fn from(f: FaultKind) -> Self {
        Self::Unrecoverable(f)
    }
}
