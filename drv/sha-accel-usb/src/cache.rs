// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_sha_accel_api::{AccelError, TransferFault};

/// Single-slot receive cache.
///
/// Holds the payload of the last completed bulk-in transfer so that several
/// short reads can be served from one physical transfer.
/// `consumed <= filled <= buf.len()` at all times.
pub(crate) struct ReadCache {
    buf: Vec<u8>,
    filled: usize,
    consumed: usize,
}

impl ReadCache {
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self, AccelError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| AccelError::OutOfMemory)?;
        buf.resize(capacity, 0);
        Ok(Self {
            buf,
            filled: 0,
            consumed: 0,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn available(&self) -> usize {
        self.filled - self.consumed
    }

    pub(crate) fn reset(&mut self) {
        self.filled = 0;
        self.consumed = 0;
    }

    /// Replaces the cache contents with a freshly completed transfer.
    pub(crate) fn fill(&mut self, data: &[u8]) -> Result<(), TransferFault> {
        if data.len() > self.buf.len() {
            self.reset();
            return Err(TransferFault::Overflow);
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.filled = data.len();
        self.consumed = 0;
        Ok(())
    }

    /// Removes and returns up to `max` cached bytes.
    pub(crate) fn take(&mut self, max: usize) -> Vec<u8> {
        let n = self.available().min(max);
        let out = self.buf[self.consumed..self.consumed + n].to_vec();
        self.consumed += n;
        out
    }
}
