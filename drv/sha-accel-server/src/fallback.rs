// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software SHA-256 for sessions created while no accelerator is attached.

use drv_sha_accel_api::SHA256_DIGEST_SIZE;
use sha2::{Digest, Sha256};

pub struct FallbackEngine {
    ctx: Sha256,
}

impl Default for FallbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackEngine {
    pub fn new() -> Self {
        Self { ctx: Sha256::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.ctx, data);
    }

    /// Produces the digest and leaves the engine ready for a new message.
    pub fn finalize(&mut self) -> [u8; SHA256_DIGEST_SIZE] {
        self.ctx.finalize_reset().into()
    }
}
