// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the accelerator does with one request frame.

use drv_sha_accel_api::{
    words_to_digest, Request, TransferFault, BLOCK_GRANULARITY,
    REQUEST_LEN, SHA256_BLOCK_SIZE, SHA256_DIGEST_SIZE, SHA256_WORDS,
};
use log::trace;
use sha2::digest::generic_array::GenericArray;
use zerocopy::FromBytes;

/// Stateless model of the device firmware.
///
/// Every frame carries the state to start from, so the firmware keeps
/// nothing between exchanges.
#[derive(Copy, Clone, Debug, Default)]
pub struct Firmware;

impl Firmware {
    /// Runs one request and returns the response bytes.
    ///
    /// A malformed frame gets [`TransferFault::Stall`], which is how the
    /// device rejects a request on the wire.
    pub fn execute(
        &self,
        bytes: &[u8],
    ) -> Result<[u8; SHA256_DIGEST_SIZE], TransferFault> {
        if bytes.len() != REQUEST_LEN {
            return Err(TransferFault::Stall);
        }
        let request =
            Request::read_from_bytes(bytes).map_err(|_| TransferFault::Stall)?;

        let len = request.len.get() as usize;
        let finalize = request.finalize.get();
        if len > BLOCK_GRANULARITY || finalize > 1 {
            return Err(TransferFault::Stall);
        }

        let mut state = request.partial_digest();
        let payload = &request.message[..len];
        if finalize == 0 {
            if len % SHA256_BLOCK_SIZE != 0 {
                return Err(TransferFault::Stall);
            }
            compress_blocks(&mut state, payload);
        } else {
            finish(&mut state, payload, request.bitlen.get());
        }

        trace!("firmware: {} bytes, finalize {}", len, finalize);
        Ok(words_to_digest(&state))
    }
}

fn compress_blocks(state: &mut [u32; SHA256_WORDS], data: &[u8]) {
    for block in data.chunks_exact(SHA256_BLOCK_SIZE) {
        let block = GenericArray::clone_from_slice(block);
        sha2::compress256(state, core::slice::from_ref(&block));
    }
}

/// Compresses the whole blocks of `tail`, then pads the rest with the
/// message length the host reported.
fn finish(state: &mut [u32; SHA256_WORDS], tail: &[u8], bitlen: u32) {
    let whole = tail.len() - tail.len() % SHA256_BLOCK_SIZE;
    compress_blocks(state, &tail[..whole]);

    let rest = &tail[whole..];
    let mut pad = [0u8; 2 * SHA256_BLOCK_SIZE];
    pad[..rest.len()].copy_from_slice(rest);
    pad[rest.len()] = 0x80;
    let padded = if rest.len() + 1 + 8 > SHA256_BLOCK_SIZE {
        2 * SHA256_BLOCK_SIZE
    } else {
        SHA256_BLOCK_SIZE
    };
    pad[padded - 8..padded].copy_from_slice(&u64::from(bitlen).to_be_bytes());
    compress_blocks(state, &pad[..padded]);
}
