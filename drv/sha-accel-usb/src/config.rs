// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use drv_sha_accel_api::{MAX_TRANSFER, WRITES_IN_FLIGHT};
use serde::Deserialize;

/// Tunables for a [`UsbTransport`](crate::UsbTransport).
///
/// Deserialises from the `[transport]` table of an app config.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Bulk-out transfers allowed in flight at once.
    pub writes_in_flight: usize,
    /// Largest single bulk-out submission, in bytes.
    pub max_transfer: usize,
    /// How long a blocked receive waits before killing its transfer.
    pub read_timeout_ms: u64,
    /// How long a blocking send waits for a free write slot.
    pub write_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            writes_in_flight: WRITES_IN_FLIGHT,
            max_transfer: MAX_TRANSFER,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
