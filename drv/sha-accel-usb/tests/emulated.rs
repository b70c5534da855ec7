// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `UsbTransport` driven against the emulated accelerator's bulk pipe.

use std::sync::Arc;

use drv_sha_accel_api::{
    AccelError, Frame, SendMode, TransferFault, Transport, REQUEST_LEN,
    RESPONSE_LEN, SHA256_IV,
};
use drv_sha_accel_usb::{TransportConfig, UsbTransport};
use sha2::{Digest, Sha256};
use sha_accel_emulator::EmulatedPipe;
use zerocopy::FromZeros;

fn connect(
    max_packet: usize,
) -> (Arc<EmulatedPipe>, Arc<UsbTransport<Arc<EmulatedPipe>>>) {
    let pipe = Arc::new(EmulatedPipe::with_max_packet(max_packet).unwrap());
    let config = TransportConfig {
        read_timeout_ms: 200,
        ..TransportConfig::default()
    };
    let transport = UsbTransport::connect(pipe.clone(), config).unwrap();
    (pipe, transport)
}

fn abc_frame() -> Box<Frame> {
    let mut frame = Frame::new_box_zeroed().unwrap();
    frame.request.load_final(&SHA256_IV, b"abc", 3).unwrap();
    frame
}

fn read_answer(transport: &dyn Transport) -> Result<Vec<u8>, AccelError> {
    let mut answer = Vec::new();
    while answer.len() < RESPONSE_LEN {
        answer.extend(transport.receive(RESPONSE_LEN - answer.len())?);
    }
    Ok(answer)
}

#[test]
fn test_exchange_matches_reference() {
    let (pipe, transport) = connect(64);
    let frame = abc_frame();

    let sent = transport
        .send(frame.request_bytes(), SendMode::Blocking)
        .unwrap();
    assert_eq!(sent, REQUEST_LEN);

    let expected: [u8; 32] = Sha256::digest(b"abc").into();
    assert_eq!(read_answer(&*transport).unwrap(), expected);
    assert_eq!(pipe.frames_processed(), 1);
    assert_eq!(pipe.protocol_violations(), 0);
}

#[test]
fn test_answer_split_across_small_packets() {
    let (_pipe, transport) = connect(12);
    let expected: [u8; 32] = Sha256::digest(b"abc").into();

    for _ in 0..3 {
        let frame = abc_frame();
        transport
            .send(frame.request_bytes(), SendMode::Blocking)
            .unwrap();
        assert_eq!(read_answer(&*transport).unwrap(), expected);
    }
}

#[test]
fn test_injected_write_fault_reported_once() {
    let (pipe, transport) = connect(64);
    pipe.inject_status(TransferFault::Stall as u32);

    let frame = abc_frame();
    transport
        .send(frame.request_bytes(), SendMode::Blocking)
        .unwrap();
    assert_eq!(
        transport.receive(RESPONSE_LEN),
        Err(AccelError::TransferError(TransferFault::Stall))
    );

    // The fault has been reported; the link still works.
    transport
        .send(frame.request_bytes(), SendMode::Blocking)
        .unwrap();
    let expected: [u8; 32] = Sha256::digest(b"abc").into();
    assert_eq!(read_answer(&*transport).unwrap(), expected);
}

#[test]
fn test_unknown_status_is_io_fault() {
    let (pipe, transport) = connect(64);
    pipe.inject_status(0xdead);

    assert_eq!(
        transport.receive(RESPONSE_LEN),
        Err(AccelError::TransferError(TransferFault::Io))
    );
}

#[test]
fn test_unplug_fails_transfers() {
    let (pipe, transport) = connect(64);
    pipe.unplug();

    let frame = abc_frame();
    assert_eq!(
        transport.send(frame.request_bytes(), SendMode::Blocking),
        Err(AccelError::TransferError(TransferFault::NoDevice))
    );

    transport.disconnect();
    assert!(!transport.is_connected());
    assert_eq!(
        transport.send(frame.request_bytes(), SendMode::Blocking),
        Err(AccelError::NotConnected)
    );
}

#[test]
fn test_overlapping_requests_are_detected() {
    let (pipe, transport) = connect(64);
    let frame = abc_frame();

    transport
        .send(frame.request_bytes(), SendMode::Blocking)
        .unwrap();
    // Second request before the first answer was read.
    transport
        .send(frame.request_bytes(), SendMode::Blocking)
        .unwrap();

    assert_eq!(
        transport.receive(RESPONSE_LEN),
        Err(AccelError::TransferError(TransferFault::Stall))
    );
    assert_eq!(pipe.protocol_violations(), 1);
}
