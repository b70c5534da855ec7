// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The accelerator's parameter block.
//!
//! A [`Frame`] is what a hardware session keeps around between exchanges.
//! Only its [`Request`] half goes out on the bulk-out endpoint; the device
//! answers with exactly [`RESPONSE_LEN`] bytes, which land in
//! [`Frame::digest`].
//!
//! Digest words are big-endian, as SHA-256 serialises them. The scalar
//! fields are little-endian, matching the firmware.

use static_assertions::const_assert_eq;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{AccelError, BLOCK_GRANULARITY, SHA256_DIGEST_SIZE, SHA256_WORDS};

/// Bytes sent to the device per exchange.
pub const REQUEST_LEN: usize = core::mem::size_of::<Request>();

/// Bytes the device returns per exchange.
pub const RESPONSE_LEN: usize = SHA256_DIGEST_SIZE;

/// Request half of the parameter block.
#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Request {
    /// Message bytes; only the first `len` are meaningful.
    pub message: [u8; BLOCK_GRANULARITY],
    /// Hash state to start from, big-endian words.
    pub in_partial_digest: [u8; SHA256_DIGEST_SIZE],
    /// Number of valid bytes in `message`.
    pub len: U32,
    /// 1 on the last frame of a message, 0 otherwise.
    pub finalize: U32,
    /// Total message length in bits; only read when `finalize` is 1.
    pub bitlen: U32,
}

/// Full parameter block: request plus the device's answer.
#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Frame {
    pub request: Request,
    /// Digest returned by the device, big-endian words.
    pub digest: [u8; SHA256_DIGEST_SIZE],
}

const_assert_eq!(REQUEST_LEN, BLOCK_GRANULARITY + SHA256_DIGEST_SIZE + 12);
const_assert_eq!(
    core::mem::size_of::<Frame>(),
    REQUEST_LEN + RESPONSE_LEN
);

impl Request {
    /// Loads a non-final block, starting from `state`.
    pub fn load_block(
        &mut self,
        state: &[u32; SHA256_WORDS],
        block: &[u8],
    ) -> Result<(), AccelError> {
        self.set_message(block)?;
        self.in_partial_digest = words_to_digest(state);
        self.finalize = U32::new(0);
        self.bitlen = U32::new(0);
        Ok(())
    }

    /// Loads the last frame of a message of `total_len` bytes.
    pub fn load_final(
        &mut self,
        state: &[u32; SHA256_WORDS],
        tail: &[u8],
        total_len: u64,
    ) -> Result<(), AccelError> {
        let bitlen = total_len
            .checked_mul(8)
            .and_then(|bits| u32::try_from(bits).ok())
            .ok_or(AccelError::InvalidInputLength)?;
        self.set_message(tail)?;
        self.in_partial_digest = words_to_digest(state);
        self.finalize = U32::new(1);
        self.bitlen = U32::new(bitlen);
        Ok(())
    }

    fn set_message(&mut self, data: &[u8]) -> Result<(), AccelError> {
        if data.len() > BLOCK_GRANULARITY {
            return Err(AccelError::InvalidInputLength);
        }
        let (head, rest) = self.message.split_at_mut(data.len());
        head.copy_from_slice(data);
        rest.fill(0);
        // Fits: bounded by BLOCK_GRANULARITY above.
        self.len = U32::new(data.len() as u32);
        Ok(())
    }

    /// The valid part of `message`, clamped to the buffer.
    pub fn payload(&self) -> &[u8] {
        let len = (self.len.get() as usize).min(BLOCK_GRANULARITY);
        &self.message[..len]
    }

    pub fn is_final(&self) -> bool {
        self.finalize.get() != 0
    }

    pub fn partial_digest(&self) -> [u32; SHA256_WORDS] {
        digest_to_words(&self.in_partial_digest)
    }
}

impl Frame {
    /// The bytes that go out on the wire.
    pub fn request_bytes(&self) -> &[u8] {
        self.request.as_bytes()
    }

    /// The device's answer as hash-state words.
    pub fn digest_words(&self) -> [u32; SHA256_WORDS] {
        digest_to_words(&self.digest)
    }
}

/// Serialises a hash state as big-endian bytes.
pub fn words_to_digest(words: &[u32; SHA256_WORDS]) -> [u8; SHA256_DIGEST_SIZE] {
    let mut out = [0u8; SHA256_DIGEST_SIZE];
    for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Parses big-endian digest bytes back into hash-state words.
pub fn digest_to_words(bytes: &[u8; SHA256_DIGEST_SIZE]) -> [u32; SHA256_WORDS] {
    let mut out = [0u32; SHA256_WORDS];
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}
