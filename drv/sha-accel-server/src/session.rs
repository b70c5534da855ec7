// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-message hashing state.
//!
//! A session buffers input until it has more than one granularity region,
//! then hands whole regions to its engine. The last region, full or not, is
//! kept back for `finalize`, which always sends one final frame carrying
//! the total bit length.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use drv_sha_accel_api::{
    AccelError, Backend, Frame, BLOCK_GRANULARITY, MAX_MESSAGE_BYTES,
    SHA256_DIGEST_SIZE, SHA256_IV, SHA256_WORDS,
};
use log::{debug, error};

use crate::fallback::FallbackEngine;
use crate::protocol::HardwareLink;

/// Where a session is in its life.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Nothing buffered.
    Empty,
    /// Fewer than `BLOCK_GRANULARITY` bytes buffered.
    Partial,
    /// Exactly `BLOCK_GRANULARITY` bytes buffered, held for `finalize`.
    AwaitingFinalize,
    Finalized,
    /// A submission failed; the session can no longer produce a digest.
    Aborted,
}

impl Phase {
    fn for_buffered(len: usize) -> Self {
        match len {
            0 => Phase::Empty,
            BLOCK_GRANULARITY => Phase::AwaitingFinalize,
            _ => Phase::Partial,
        }
    }
}

enum Engine {
    Hardware {
        link: Arc<HardwareLink>,
        frame: Box<Frame>,
        state: [u32; SHA256_WORDS],
    },
    Fallback(FallbackEngine),
    Released,
}

impl Engine {
    fn submit_block(&mut self, block: &[u8]) -> Result<(), AccelError> {
        match self {
            Engine::Hardware { link, frame, state } => {
                frame.request.load_block(state, block)?;
                link.exchange(frame)?;
                *state = frame.digest_words();
                Ok(())
            }
            Engine::Fallback(engine) => {
                engine.update(block);
                Ok(())
            }
            Engine::Released => Err(AccelError::InvalidState),
        }
    }

    fn finish(
        &mut self,
        tail: &[u8],
        total_len: u64,
    ) -> Result<[u8; SHA256_DIGEST_SIZE], AccelError> {
        match self {
            Engine::Hardware { link, frame, state } => {
                frame.request.load_final(state, tail, total_len)?;
                link.exchange(frame)?;
                Ok(frame.digest)
            }
            Engine::Fallback(engine) => {
                engine.update(tail);
                Ok(engine.finalize())
            }
            Engine::Released => Err(AccelError::InvalidState),
        }
    }
}

struct SessionState {
    phase: Phase,
    buffer: heapless::Vec<u8, BLOCK_GRANULARITY>,
    total_len: u64,
    engine: Engine,
}

impl SessionState {
    fn check_open(&self) -> Result<(), AccelError> {
        match (self.phase, &self.engine) {
            (Phase::Finalized | Phase::Aborted, _) | (_, Engine::Released) => {
                Err(AccelError::InvalidState)
            }
            _ => Ok(()),
        }
    }

    fn absorb(&mut self, mut data: &[u8]) -> Result<(), AccelError> {
        let len = data.len() as u64;
        while self.buffer.len() + data.len() > BLOCK_GRANULARITY {
            let (head, rest) =
                data.split_at(BLOCK_GRANULARITY - self.buffer.len());
            if self.buffer.is_empty() {
                self.engine.submit_block(head)?;
            } else {
                self.buffer
                    .extend_from_slice(head)
                    .map_err(|_| AccelError::InvalidState)?;
                self.engine.submit_block(&self.buffer)?;
                self.buffer.clear();
            }
            data = rest;
        }
        self.buffer
            .extend_from_slice(data)
            .map_err(|_| AccelError::InvalidState)?;
        self.total_len += len;
        self.phase = Phase::for_buffered(self.buffer.len());
        Ok(())
    }

    fn abort(&mut self, err: AccelError) {
        error!("session aborted after {} bytes: {}", self.total_len, err);
        self.phase = Phase::Aborted;
        self.buffer.clear();
    }
}

/// One message being hashed.
///
/// The backend is fixed when the session is created. Calls on one session
/// do not queue: a second `update` or `finalize` that arrives while one is
/// running fails with [`AccelError::InvalidState`].
pub struct Session {
    backend: Backend,
    inner: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn hardware(link: Arc<HardwareLink>, frame: Box<Frame>) -> Self {
        Self::new(
            Backend::Hardware,
            Engine::Hardware {
                link,
                frame,
                state: SHA256_IV,
            },
        )
    }

    pub(crate) fn fallback() -> Self {
        Self::new(Backend::Fallback, Engine::Fallback(FallbackEngine::new()))
    }

    fn new(backend: Backend, engine: Engine) -> Self {
        Self {
            backend,
            inner: Mutex::new(SessionState {
                phase: Phase::Empty,
                buffer: heapless::Vec::new(),
                total_len: 0,
                engine,
            }),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Current phase. Waits for a running call to finish.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Bytes absorbed so far.
    pub fn total_len(&self) -> u64 {
        self.lock().total_len
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` while another call holds the session.
    fn claim(
        &self,
    ) -> Option<Result<MutexGuard<'_, SessionState>, AccelError>> {
        match self.inner.try_lock() {
            Ok(state) => Some(Ok(state)),
            // A panic mid-call leaves the buffer in an unknown state.
            Err(TryLockError::Poisoned(_)) => {
                Some(Err(AccelError::InvalidState))
            }
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn try_lock(&self) -> Result<MutexGuard<'_, SessionState>, AccelError> {
        self.claim().unwrap_or(Err(AccelError::InvalidState))
    }

    pub fn update(&self, data: &[u8]) -> Result<(), AccelError> {
        let mut state = self.try_lock()?;
        state.check_open()?;
        if data.is_empty() {
            return Ok(());
        }

        if self.backend == Backend::Hardware {
            let total = state.total_len.checked_add(data.len() as u64);
            if total.map_or(true, |t| t > MAX_MESSAGE_BYTES) {
                return Err(AccelError::InvalidInputLength);
            }
        }

        let result = state.absorb(data);
        if let Err(e) = result {
            state.abort(e);
        }
        result
    }

    pub fn finalize(&self) -> Result<[u8; SHA256_DIGEST_SIZE], AccelError> {
        self.try_finalize().unwrap_or(Err(AccelError::InvalidState))
    }

    /// Like [`Session::finalize`], but returns `None` without touching the
    /// session when another call is running on it.
    pub(crate) fn try_finalize(
        &self,
    ) -> Option<Result<[u8; SHA256_DIGEST_SIZE], AccelError>> {
        let mut state = match self.claim()? {
            Ok(state) => state,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = state.check_open() {
            return Some(Err(e));
        }

        let state = &mut *state;
        Some(match state.engine.finish(&state.buffer, state.total_len) {
            Ok(digest) => {
                state.phase = Phase::Finalized;
                state.buffer.clear();
                debug!("session finalized after {} bytes", state.total_len);
                Ok(digest)
            }
            Err(e) => {
                state.abort(e);
                Err(e)
            }
        })
    }

    /// Drops the frame buffer or software engine. Waits for a running call
    /// to finish first. Returns whether this call did the release.
    pub(crate) fn release(&self) -> bool {
        let mut state = self.lock();
        if matches!(state.engine, Engine::Released) {
            return false;
        }
        state.engine = Engine::Released;
        state.buffer.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_sha_accel_api::{TransferFault, Transport};
    use sha2::{Digest, Sha256};
    use sha_accel_emulator::EmulatedTransport;
    use zerocopy::FromZeros;

    fn hardware_session() -> (Arc<EmulatedTransport>, Session) {
        let transport = EmulatedTransport::connect();
        let link = Arc::new(HardwareLink::new(transport.clone()));
        let frame = Frame::new_box_zeroed().unwrap();
        (transport, Session::hardware(link, frame))
    }

    fn both_backends() -> Vec<Session> {
        vec![hardware_session().1, Session::fallback()]
    }

    fn reference(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    #[test]
    fn test_abc_with_empty_update() {
        for session in both_backends() {
            assert!(session.update(b"abc").is_ok());
            assert!(session.update(b"").is_ok());
            assert_eq!(session.finalize().unwrap(), reference(b"abc"));
        }
    }

    #[test]
    fn test_empty_message() {
        for session in both_backends() {
            let digest = session.finalize().unwrap();
            assert_eq!(digest, reference(b""));
            assert_eq!(digest[..4], [0xe3, 0xb0, 0xc4, 0x42]);
        }
    }

    #[test]
    fn test_granularity_multiples() {
        for k in 0..5 {
            let msg: Vec<u8> =
                (0..k * BLOCK_GRANULARITY).map(|i| (i * 7) as u8).collect();
            for session in both_backends() {
                session.update(&msg).unwrap();
                assert_eq!(session.finalize().unwrap(), reference(&msg));
            }
        }
    }

    #[test]
    fn test_full_region_is_held_for_finalize() {
        let (_transport, session) = hardware_session();
        assert_eq!(session.phase(), Phase::Empty);

        session.update(&[1; BLOCK_GRANULARITY - 1]).unwrap();
        assert_eq!(session.phase(), Phase::Partial);

        session.update(&[1]).unwrap();
        assert_eq!(session.phase(), Phase::AwaitingFinalize);

        session.update(&[1]).unwrap();
        assert_eq!(session.phase(), Phase::Partial);
        assert_eq!(session.total_len(), BLOCK_GRANULARITY as u64 + 1);
    }

    #[test]
    fn test_byte_at_a_time() {
        let msg: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        for session in both_backends() {
            for b in &msg {
                session.update(core::slice::from_ref(b)).unwrap();
            }
            assert_eq!(session.finalize().unwrap(), reference(&msg));
        }
    }

    #[test]
    fn test_calls_after_finalize_fail() {
        for session in both_backends() {
            session.update(b"data").unwrap();
            session.finalize().unwrap();
            assert_eq!(session.phase(), Phase::Finalized);
            assert_eq!(session.update(b"more"), Err(AccelError::InvalidState));
            assert_eq!(session.finalize(), Err(AccelError::InvalidState));
        }
    }

    #[test]
    fn test_transfer_failure_aborts() {
        let (transport, session) = hardware_session();
        session.update(&[0; 10]).unwrap();
        transport.disconnect();

        assert_eq!(
            session.update(&[0; 2 * BLOCK_GRANULARITY]),
            Err(AccelError::TransferError(TransferFault::NoDevice))
        );
        assert_eq!(session.phase(), Phase::Aborted);
        assert_eq!(session.finalize(), Err(AccelError::InvalidState));
    }

    #[test]
    fn test_failed_finalize_gives_no_digest() {
        let (transport, session) = hardware_session();
        session.update(b"abc").unwrap();
        transport.disconnect();

        assert!(matches!(
            session.finalize(),
            Err(AccelError::TransferError(_))
        ));
        assert_eq!(session.finalize(), Err(AccelError::InvalidState));
    }

    #[test]
    fn test_bit_length_limit() {
        let (_transport, session) = hardware_session();
        session.lock().total_len = MAX_MESSAGE_BYTES - 1;

        assert_eq!(session.update(&[0; 2]), Err(AccelError::InvalidInputLength));
        assert_eq!(session.phase(), Phase::Empty);
        assert_eq!(session.total_len(), MAX_MESSAGE_BYTES - 1);
        assert!(session.update(&[0]).is_ok());

        // Software sessions have no such limit.
        let session = Session::fallback();
        session.lock().total_len = MAX_MESSAGE_BYTES;
        assert!(session.update(&[0; 2]).is_ok());
    }

    #[test]
    fn test_concurrent_call_is_rejected() {
        let session = Session::fallback();
        let held = session.inner.lock().unwrap();
        assert_eq!(session.update(b"x"), Err(AccelError::InvalidState));
        assert_eq!(session.finalize(), Err(AccelError::InvalidState));
        drop(held);
        assert!(session.update(b"x").is_ok());
    }

    #[test]
    fn test_try_finalize_leaves_busy_session_alone() {
        let session = Session::fallback();
        session.update(b"ab").unwrap();

        let held = session.inner.lock().unwrap();
        assert_eq!(session.try_finalize(), None);
        drop(held);

        assert_eq!(session.phase(), Phase::Partial);
        session.update(b"c").unwrap();
        let expected: [u8; 32] = Sha256::digest(b"abc").into();
        assert_eq!(session.try_finalize(), Some(Ok(expected)));
        assert_eq!(session.try_finalize(), Some(Err(AccelError::InvalidState)));
    }

    #[test]
    fn test_release_once() {
        for session in both_backends() {
            session.update(b"abc").unwrap();
            assert!(session.release());
            assert!(!session.release());
            assert_eq!(session.update(b"abc"), Err(AccelError::InvalidState));
            assert_eq!(session.finalize(), Err(AccelError::InvalidState));
        }
    }

    #[test]
    fn test_hardware_session_leaves_link_usable() {
        let (transport, session) = hardware_session();
        session.update(&[0x5a; 1000]).unwrap();
        session.finalize().unwrap();
        assert!(transport.is_connected());
    }
}
