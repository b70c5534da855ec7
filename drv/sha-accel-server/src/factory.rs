// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use drv_sha_accel_api::{AccelError, Frame, Transport};
use log::{debug, info};
use zerocopy::FromZeros;

use crate::protocol::HardwareLink;
use crate::session::Session;

/// Creates sessions, pinning each one to the accelerator or to software.
pub struct SessionFactory {
    link: Option<Arc<HardwareLink>>,
}

impl SessionFactory {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            link: Some(Arc::new(HardwareLink::new(transport))),
        }
    }

    /// A factory with no accelerator; every session hashes in software.
    pub fn software_only() -> Self {
        Self { link: None }
    }

    /// Probes the accelerator once. Whatever the answer, it holds for the
    /// session's whole life.
    pub fn create_session(&self) -> Result<Session, AccelError> {
        match &self.link {
            Some(link) if link.is_connected() => {
                let frame = Frame::new_box_zeroed()
                    .map_err(|_| AccelError::OutOfMemory)?;
                info!("accelerator present, session pinned to hardware");
                Ok(Session::hardware(link.clone(), frame))
            }
            _ => {
                info!("accelerator not detected, registering fallback");
                Ok(Session::fallback())
            }
        }
    }

    /// Releases the session's frame buffer or software engine, once any
    /// call already running on it has returned.
    pub fn destroy_session(&self, session: &Session) {
        if !session.release() {
            debug!("session already released");
        }
    }
}
