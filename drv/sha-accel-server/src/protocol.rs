// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One request, one response: how frames reach the accelerator.

use std::sync::{Arc, Mutex, PoisonError};

use drv_sha_accel_api::{
    AccelError, Frame, SendMode, TransferFault, Transport, RESPONSE_LEN,
};
use log::{error, trace};

/// Shared access to one accelerator.
///
/// The gate is held for a whole request/response exchange, so frames from
/// different sessions never interleave on the wire.
pub struct HardwareLink {
    transport: Arc<dyn Transport>,
    gate: Mutex<()>,
}

/// Maps a transport error onto the fault a session reports.
fn link_fault(err: AccelError) -> AccelError {
    let fault = match err {
        AccelError::TransferError(fault) => fault,
        AccelError::NotConnected => TransferFault::NoDevice,
        AccelError::DeviceBusy => TransferFault::Timeout,
        AccelError::Interrupted => TransferFault::Cancelled,
        AccelError::OutOfMemory
        | AccelError::InvalidState
        | AccelError::InvalidInputLength
        | AccelError::InvalidSession
        | AccelError::TooManySessions => TransferFault::Io,
    };
    AccelError::TransferError(fault)
}

impl HardwareLink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            gate: Mutex::new(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Sends `frame`'s request and stores the device's answer in
    /// `frame.digest`.
    ///
    /// Once any request bytes have gone out, a failure leaves an answer
    /// somewhere between the device and the read cache that no frame will
    /// claim. The link then disconnects the transport: sessions still open
    /// on it fail, and new sessions pin to software.
    pub fn exchange(&self, frame: &mut Frame) -> Result<(), AccelError> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        let request = frame.request_bytes();
        let mut sent = 0;
        while sent < request.len() {
            let err = match self
                .transport
                .send(&request[sent..], SendMode::Blocking)
            {
                Ok(0) => AccelError::TransferError(TransferFault::Io),
                Ok(n) => {
                    sent += n;
                    continue;
                }
                Err(e) => link_fault(e),
            };
            return Err(if sent == 0 { err } else { self.abandon(err) });
        }

        let mut got = 0;
        while got < RESPONSE_LEN {
            let chunk = match self.transport.receive(RESPONSE_LEN - got) {
                Ok(chunk)
                    if !chunk.is_empty() && chunk.len() <= RESPONSE_LEN - got =>
                {
                    chunk
                }
                Ok(_) => {
                    return Err(self.abandon(AccelError::TransferError(
                        TransferFault::Overflow,
                    )))
                }
                Err(e) => return Err(self.abandon(link_fault(e))),
            };
            frame.digest[got..got + chunk.len()].copy_from_slice(&chunk);
            got += chunk.len();
        }

        trace!(
            "exchanged frame: {} bytes, finalize {}",
            frame.request.len.get(),
            frame.request.finalize.get()
        );
        Ok(())
    }

    fn abandon(&self, err: AccelError) -> AccelError {
        if self.transport.is_connected() {
            error!("accelerator out of step after {}, disconnecting", err);
            self.transport.disconnect();
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_sha_accel_api::SHA256_IV;
    use sha_accel_emulator::EmulatedTransport;
    use std::sync::atomic::{AtomicBool, Ordering};
    use zerocopy::FromZeros;

    /// Accepts requests but fails every send or receive with a fixed error.
    struct FailingTransport {
        send_error: Option<AccelError>,
        receive_error: AccelError,
        connected: AtomicBool,
    }

    impl FailingTransport {
        fn new(
            send_error: Option<AccelError>,
            receive_error: AccelError,
        ) -> Arc<Self> {
            Arc::new(Self {
                send_error,
                receive_error,
                connected: AtomicBool::new(true),
            })
        }
    }

    impl Transport for FailingTransport {
        fn send(
            &self,
            bytes: &[u8],
            _mode: SendMode,
        ) -> Result<usize, AccelError> {
            match self.send_error {
                Some(e) => Err(e),
                None => Ok(bytes.len()),
            }
        }

        fn receive(&self, _max_len: usize) -> Result<Vec<u8>, AccelError> {
            Err(self.receive_error)
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_transport_errors_become_faults() {
        assert_eq!(
            link_fault(AccelError::NotConnected),
            AccelError::TransferError(TransferFault::NoDevice)
        );
        assert_eq!(
            link_fault(AccelError::DeviceBusy),
            AccelError::TransferError(TransferFault::Timeout)
        );
        assert_eq!(
            link_fault(AccelError::Interrupted),
            AccelError::TransferError(TransferFault::Cancelled)
        );
        assert_eq!(
            link_fault(AccelError::TransferError(TransferFault::Stall)),
            AccelError::TransferError(TransferFault::Stall)
        );
    }

    #[test]
    fn test_exchange_fills_digest() {
        let link = HardwareLink::new(EmulatedTransport::connect());
        let mut frame = Frame::new_box_zeroed().unwrap();
        frame.request.load_final(&SHA256_IV, b"abc", 3).unwrap();

        assert!(link.exchange(&mut frame).is_ok());
        assert_eq!(frame.digest[..4], [0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn test_exchange_after_disconnect() {
        let transport = EmulatedTransport::connect();
        let link = HardwareLink::new(transport.clone());
        transport.disconnect();

        let mut frame = Frame::new_box_zeroed().unwrap();
        assert!(!link.is_connected());
        assert_eq!(
            link.exchange(&mut frame),
            Err(AccelError::TransferError(TransferFault::NoDevice))
        );
    }

    #[test]
    fn test_lost_answer_disconnects() {
        for err in [
            AccelError::TransferError(TransferFault::Timeout),
            AccelError::Interrupted,
        ] {
            let transport = FailingTransport::new(None, err);
            let link = HardwareLink::new(transport.clone());
            let mut frame = Frame::new_box_zeroed().unwrap();
            frame.request.load_final(&SHA256_IV, b"abc", 3).unwrap();

            assert_eq!(link.exchange(&mut frame), Err(link_fault(err)));
            assert!(!link.is_connected());
        }
    }

    #[test]
    fn test_unsent_request_keeps_link() {
        let transport = FailingTransport::new(
            Some(AccelError::DeviceBusy),
            AccelError::Interrupted,
        );
        let link = HardwareLink::new(transport.clone());
        let mut frame = Frame::new_box_zeroed().unwrap();

        assert_eq!(
            link.exchange(&mut frame),
            Err(AccelError::TransferError(TransferFault::Timeout))
        );
        assert!(link.is_connected());
    }
}
