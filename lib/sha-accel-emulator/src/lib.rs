// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A software model of the cryptIC accelerator.
//!
//! [`Firmware`] is the device's request handler. [`EmulatedPipe`] puts it
//! behind a bulk pipe so the real USB transport can be driven end to end;
//! [`EmulatedTransport`] skips the pipe and answers inline.

#![forbid(unsafe_code)]

mod firmware;
mod pipe;
mod transport;

pub use firmware::Firmware;
pub use pipe::{EmulatedPipe, DEFAULT_MAX_PACKET};
pub use transport::EmulatedTransport;
