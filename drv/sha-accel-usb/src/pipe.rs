// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boundary to the host's bulk-transfer machinery.

use std::sync::Arc;

use drv_sha_accel_api::TransferFault;

/// Called once when a bulk-out transfer finishes, with the byte count
/// actually written.
pub type OutCompletion = Box<dyn FnOnce(Result<usize, TransferFault>) + Send>;

/// Called once when a bulk-in transfer finishes, with the bytes received.
pub type InCompletion = Box<dyn FnOnce(Result<Vec<u8>, TransferFault>) + Send>;

/// One bulk-in / bulk-out endpoint pair.
///
/// Completions run on the pipe's own completion context, which is never the
/// submitting thread's stack frame in a way callers can rely on: they may
/// run before `submit_*` returns, or later on another thread. They must not
/// block.
///
/// If `submit_*` returns `Err`, the completion is dropped without being
/// called. If it returns `Ok`, the completion is called exactly once, with
/// [`TransferFault::Cancelled`] if the transfer is killed.
pub trait BulkPipe: Send + Sync + 'static {
    /// Max packet size of the bulk-in endpoint.
    fn max_packet_in(&self) -> usize;

    /// Starts a bulk-out transfer. Ownership of `data` moves to the transfer.
    fn submit_out(
        &self,
        data: Vec<u8>,
        done: OutCompletion,
    ) -> Result<(), TransferFault>;

    /// Starts a bulk-in transfer of at most `len` bytes.
    fn submit_in(&self, len: usize, done: InCompletion)
        -> Result<(), TransferFault>;

    /// Kills the outstanding bulk-in transfer, if any.
    fn kill_in(&self);

    /// Kills every outstanding transfer in both directions.
    fn kill_all(&self);
}

impl<T: BulkPipe + ?Sized> BulkPipe for Arc<T> {
    fn max_packet_in(&self) -> usize {
        (**self).max_packet_in()
    }

    fn submit_out(
        &self,
        data: Vec<u8>,
        done: OutCompletion,
    ) -> Result<(), TransferFault> {
        (**self).submit_out(data, done)
    }

    fn submit_in(
        &self,
        len: usize,
        done: InCompletion,
    ) -> Result<(), TransferFault> {
        (**self).submit_in(len, done)
    }

    fn kill_in(&self) {
        (**self).kill_in()
    }

    fn kill_all(&self) {
        (**self).kill_all()
    }
}
