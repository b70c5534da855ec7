// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use drv_sha_accel_api::{
    AccelError, SendMode, TransferFault, Transport, REQUEST_LEN,
};
use log::info;

use crate::Firmware;

/// A [`Transport`] that runs the firmware inline, without a bulk pipe.
///
/// Each `send` is processed before it returns, so a single write is in
/// flight at a time: a non-blocking `send` that finds another one running
/// gets [`AccelError::DeviceBusy`].
pub struct EmulatedTransport {
    firmware: Firmware,
    connected: AtomicBool,
    wire: Mutex<Wire>,
}

#[derive(Default)]
struct Wire {
    assembling: Vec<u8>,
    answer: VecDeque<u8>,
}

impl EmulatedTransport {
    pub fn connect() -> Arc<Self> {
        info!("emulated accelerator connected");
        Arc::new(Self {
            firmware: Firmware,
            connected: AtomicBool::new(true),
            wire: Mutex::new(Wire::default()),
        })
    }
}

impl Transport for EmulatedTransport {
    fn send(&self, bytes: &[u8], mode: SendMode) -> Result<usize, AccelError> {
        if !self.is_connected() {
            return Err(AccelError::NotConnected);
        }
        let mut wire = match mode {
            SendMode::Blocking => {
                self.wire.lock().unwrap_or_else(PoisonError::into_inner)
            }
            SendMode::NonBlocking => match self.wire.try_lock() {
                Ok(wire) => wire,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    return Err(AccelError::DeviceBusy)
                }
            },
        };

        let room = REQUEST_LEN - wire.assembling.len();
        let n = bytes.len().min(room);
        wire.assembling.extend_from_slice(&bytes[..n]);
        if wire.assembling.len() == REQUEST_LEN {
            let frame = std::mem::take(&mut wire.assembling);
            let digest = self
                .firmware
                .execute(&frame)
                .map_err(AccelError::TransferError)?;
            wire.answer.clear();
            wire.answer.extend(digest);
        }
        Ok(n)
    }

    fn receive(&self, max_len: usize) -> Result<Vec<u8>, AccelError> {
        if max_len == 0 {
            return Ok(Vec::new());
        }
        if !self.is_connected() {
            return Err(AccelError::NotConnected);
        }
        let mut wire = self.wire.lock().unwrap_or_else(PoisonError::into_inner);
        if wire.answer.is_empty() {
            // Nothing was asked, so nothing will ever arrive.
            return Err(AccelError::TransferError(TransferFault::Timeout));
        }
        let n = max_len.min(wire.answer.len());
        Ok(wire.answer.drain(..n).collect())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("emulated accelerator disconnected");
        }
    }
}
