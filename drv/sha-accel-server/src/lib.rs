// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # SHA-256 Accelerator Server
//!
//! Session-based SHA-256 on the cryptIC USB accelerator, with a software
//! fallback for when no accelerator is attached.
//!
//! ## Operations
//! - **Session-based**: `init` → multiple `update` → `finalize`
//! - **One-shot**: `digest_oneshot`
//!
//! ## Backends
//! Each session is pinned when it is created: to the accelerator if the
//! transport reports it connected at that moment, otherwise to software.
//! A hardware session whose accelerator goes away fails with
//! `TransferError`; it never switches to software half way through.

#![forbid(unsafe_code)]

mod factory;
mod fallback;
mod protocol;
mod session;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use drv_sha_accel_api::{AccelError, Backend, Transport, SHA256_DIGEST_SIZE};
use heapless::FnvIndexMap;
use log::debug;

pub use factory::SessionFactory;
pub use fallback::FallbackEngine;
pub use protocol::HardwareLink;
pub use session::{Phase, Session};

/// Maximum concurrent digest sessions
pub const MAX_SESSIONS: usize = 16;

pub type SessionHandle = u32;

struct SessionTable {
    sessions: FnvIndexMap<SessionHandle, Arc<Session>, MAX_SESSIONS>,
    next_session_id: u32,
}

/// Hash transform entry points over a table of open sessions.
///
/// The table lock only covers lookups and inserts; hashing runs under each
/// session's own lock, so sessions proceed independently.
pub struct ShaAccelServer {
    factory: SessionFactory,
    table: Mutex<SessionTable>,
}

impl ShaAccelServer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_factory(SessionFactory::new(transport))
    }

    pub fn software_only() -> Self {
        Self::with_factory(SessionFactory::software_only())
    }

    pub fn with_factory(factory: SessionFactory) -> Self {
        Self {
            factory,
            table: Mutex::new(SessionTable {
                sessions: FnvIndexMap::new(),
                next_session_id: 1,
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, SessionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, handle: SessionHandle) -> Result<Arc<Session>, AccelError> {
        self.table()
            .sessions
            .get(&handle)
            .cloned()
            .ok_or(AccelError::InvalidSession)
    }

    fn remove(&self, handle: SessionHandle) -> Result<Arc<Session>, AccelError> {
        self.table()
            .sessions
            .remove(&handle)
            .ok_or(AccelError::InvalidSession)
    }

    pub fn init(&self) -> Result<SessionHandle, AccelError> {
        let session = Arc::new(self.factory.create_session()?);

        let mut table = self.table();
        if table.sessions.len() == MAX_SESSIONS {
            return Err(AccelError::TooManySessions);
        }
        let handle = loop {
            let id = table.next_session_id;
            table.next_session_id = table.next_session_id.wrapping_add(1);
            if !table.sessions.contains_key(&id) {
                break id;
            }
        };
        table
            .sessions
            .insert(handle, session)
            .map_err(|_| AccelError::TooManySessions)?;

        debug!("opened session {}", handle);
        Ok(handle)
    }

    pub fn update(
        &self,
        handle: SessionHandle,
        data: &[u8],
    ) -> Result<(), AccelError> {
        self.lookup(handle)?.update(data)
    }

    /// Produces the digest and closes the session, whether or not the
    /// digest could be produced. A call that collides with another call on
    /// the same session fails with `InvalidState` and leaves it open.
    pub fn finalize(
        &self,
        handle: SessionHandle,
    ) -> Result<[u8; SHA256_DIGEST_SIZE], AccelError> {
        let session = self.lookup(handle)?;
        let result = match session.try_finalize() {
            Some(result) => result,
            None => {
                debug!("session {} busy, finalize rejected", handle);
                return Err(AccelError::InvalidState);
            }
        };

        // A racing destroy may have taken the handle already.
        let _ = self.remove(handle);
        self.factory.destroy_session(&session);
        debug!("closed session {}", handle);
        result
    }

    /// Closes a session without producing a digest.
    pub fn destroy(&self, handle: SessionHandle) -> Result<(), AccelError> {
        let session = self.remove(handle)?;
        self.factory.destroy_session(&session);
        debug!("destroyed session {}", handle);
        Ok(())
    }

    pub fn backend(&self, handle: SessionHandle) -> Result<Backend, AccelError> {
        Ok(self.lookup(handle)?.backend())
    }

    pub fn digest_oneshot(
        &self,
        data: &[u8],
    ) -> Result<[u8; SHA256_DIGEST_SIZE], AccelError> {
        let handle = self.init()?;
        if let Err(e) = self.update(handle, data) {
            // Only fails if the handle is already gone.
            let _ = self.destroy(handle);
            return Err(e);
        }
        self.finalize(handle)
    }

    /// Sessions currently open.
    pub fn session_count(&self) -> usize {
        self.table().sessions.len()
    }
}
