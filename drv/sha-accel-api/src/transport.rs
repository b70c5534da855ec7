// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::AccelError;

/// How [`Transport::send`] behaves when the in-flight write budget is used up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendMode {
    /// Wait for a slot (bounded by the transport's write timeout).
    Blocking,
    /// Fail immediately with [`AccelError::DeviceBusy`].
    NonBlocking,
}

/// A connection to one accelerator.
///
/// Implementations are shared between sessions behind an `Arc` and must be
/// usable from several threads at once. Each implementation provides its
/// own `connect` constructor; [`Transport::disconnect`] is the matching
/// teardown and leaves the connection permanently unusable.
pub trait Transport: Send + Sync {
    /// Queues `bytes` for the bulk-out endpoint.
    ///
    /// Returns the number of bytes accepted, which may be less than
    /// `bytes.len()` if that exceeds the largest single transfer.
    fn send(&self, bytes: &[u8], mode: SendMode) -> Result<usize, AccelError>;

    /// Returns between 1 and `max_len` bytes read from the device.
    ///
    /// Blocks until data is available, the connection goes away, or the
    /// wait is interrupted. A `max_len` of 0 returns immediately.
    fn receive(&self, max_len: usize) -> Result<Vec<u8>, AccelError>;

    /// Non-blocking liveness probe.
    fn is_connected(&self) -> bool;

    /// Tears the connection down, cancelling outstanding transfers and
    /// waking anyone blocked in [`Transport::send`] or
    /// [`Transport::receive`]. Calling it again does nothing.
    fn disconnect(&self);
}
