// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::ArgEnum;
use drv_sha_accel_usb::TransportConfig;
use serde::Deserialize;

/// Which accelerator to connect to.
#[derive(ArgEnum, Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// The in-process emulator behind the USB transport.
    Emulated,
    /// No accelerator; software only.
    None,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct AppConfig {
    pub log_level: String,
    pub device: DeviceKind,
    pub transport: TransportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            device: DeviceKind::Emulated,
            transport: TransportConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn log_level(&self) -> Result<log::Level> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("bad log level {:?}", self.log_level))
    }
}
