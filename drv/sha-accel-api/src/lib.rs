// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for the cryptIC SHA-256 accelerator.
//!
//! Everything that both sides of the accelerator boundary need to agree on
//! lives here: block and digest geometry, the request/response frame that
//! travels over the bulk pipe, the error taxonomy, and the [`Transport`]
//! trait that session code uses to reach a device.

use core::fmt;

use num_derive::FromPrimitive;
use static_assertions::const_assert;

mod frame;
mod transport;

pub use frame::{
    digest_to_words, words_to_digest, Frame, Request, REQUEST_LEN, RESPONSE_LEN,
};
pub use transport::{SendMode, Transport};

/// Size of one SHA-256 compression block, in bytes.
pub const SHA256_BLOCK_SIZE: usize = 64;

/// Size of a SHA-256 digest, in bytes.
pub const SHA256_DIGEST_SIZE: usize = 32;

/// Size of a SHA-256 digest, in 32-bit words.
pub const SHA256_WORDS: usize = SHA256_DIGEST_SIZE / 4;

/// Number of compression blocks the accelerator consumes per exchange.
///
/// This is the one knob for the device's granularity; everything else is
/// derived from it. Confirm against the firmware before changing it.
pub const CRYPTIC_N_BLOCKS: usize = 2;

/// Bytes carried by one request frame.
pub const BLOCK_GRANULARITY: usize = SHA256_BLOCK_SIZE * CRYPTIC_N_BLOCKS;

const_assert!(CRYPTIC_N_BLOCKS > 0);
const_assert!(BLOCK_GRANULARITY % SHA256_BLOCK_SIZE == 0);

/// SHA-256 initial hash value (FIPS 180-4 §5.3.3).
pub const SHA256_IV: [u32; SHA256_WORDS] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c,
    0x1f83d9ab, 0x5be0cd19,
];

/// Largest single bulk-out submission, in bytes.
pub const MAX_TRANSFER: usize = 512;

/// Default number of bulk-out transfers allowed in flight at once.
pub const WRITES_IN_FLIGHT: usize = 1;

/// Longest message a hardware session can hash.
///
/// The final frame carries the message length in bits as a `u32`.
pub const MAX_MESSAGE_BYTES: u64 = (u32::MAX / 8) as u64;

/// Which implementation a session was pinned to when it was created.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Blocks are submitted to the accelerator.
    Hardware,
    /// Blocks are hashed in software.
    Fallback,
}

/// Status of a bulk transfer that did not complete normally.
///
/// The discriminants are the raw status words used by pipe implementations;
/// see [`TransferFault::from_status`].
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum TransferFault {
    /// The endpoint halted (pipe stall).
    Stall = 1,

    /// The device returned more data than the transfer asked for.
    Overflow = 2,

    /// Generic I/O failure on the bus.
    Io = 3,

    /// The transfer did not complete in time.
    Timeout = 4,

    /// The device is gone.
    NoDevice = 5,

    /// The transfer was killed before it completed.
    Cancelled = 6,

    /// The host controller is shutting the endpoint down.
    Shutdown = 7,
}

impl TransferFault {
    /// Decodes a raw status word; `None` for success or unknown codes.
    pub fn from_status(status: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(status)
    }

    /// Whether this fault should be remembered and reported to the next
    /// caller.
    ///
    /// Kills and shutdowns are the normal way transfers end on disconnect,
    /// so they never become sticky errors.
    pub fn is_sticky(self) -> bool {
        !matches!(self, TransferFault::Cancelled | TransferFault::Shutdown)
    }
}

impl fmt::Display for TransferFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferFault::Stall => "endpoint stalled",
            TransferFault::Overflow => "transfer overflow",
            TransferFault::Io => "I/O error",
            TransferFault::Timeout => "timed out",
            TransferFault::NoDevice => "no device",
            TransferFault::Cancelled => "cancelled",
            TransferFault::Shutdown => "endpoint shut down",
        };
        f.write_str(s)
    }
}

/// Errors produced by the accelerator stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccelError {
    /// The accelerator is not reachable.
    NotConnected,

    /// The in-flight write budget is exhausted. Retryable.
    DeviceBusy,

    /// The underlying transfer failed. Not retried.
    TransferError(TransferFault),

    /// A frame or context could not be allocated.
    OutOfMemory,

    /// The session was already finalized, aborted or destroyed, or another
    /// call on it is in progress.
    InvalidState,

    /// A blocked receive was interrupted.
    Interrupted,

    /// The message is too long for the accelerator's length field.
    InvalidInputLength,

    /// No session with that handle exists.
    InvalidSession,

    /// The session table is full.
    TooManySessions,
}

impl AccelError {
    /// Negative errno-style code for callers that only deal in integers.
    pub fn code(&self) -> i32 {
        match self {
            AccelError::NotConnected => -19,
            AccelError::DeviceBusy => -16,
            AccelError::TransferError(TransferFault::Stall) => -32,
            AccelError::TransferError(TransferFault::Timeout) => -110,
            AccelError::TransferError(TransferFault::NoDevice) => -19,
            AccelError::TransferError(_) => -5,
            AccelError::OutOfMemory => -12,
            AccelError::InvalidState => -22,
            AccelError::Interrupted => -4,
            AccelError::InvalidInputLength => -90,
            AccelError::InvalidSession => -9,
            AccelError::TooManySessions => -24,
        }
    }
}

impl fmt::Display for AccelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccelError::NotConnected => f.write_str("accelerator not connected"),
            AccelError::DeviceBusy => f.write_str("accelerator busy"),
            AccelError::TransferError(fault) => {
                write!(f, "transfer failed: {fault}")
            }
            AccelError::OutOfMemory => f.write_str("out of memory"),
            AccelError::InvalidState => f.write_str("invalid session state"),
            AccelError::Interrupted => f.write_str("interrupted"),
            AccelError::InvalidInputLength => f.write_str("message too long"),
            AccelError::InvalidSession => f.write_str("invalid session"),
            AccelError::TooManySessions => f.write_str("too many sessions"),
        }
    }
}

impl std::error::Error for AccelError {}

impl From<TransferFault> for AccelError {
    fn from(fault: TransferFault) -> Self {
        AccelError::TransferError(fault)
    }
}
