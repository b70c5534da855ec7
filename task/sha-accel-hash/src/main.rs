// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hash Client
//!
//! Hashes files (or standard input) through the accelerator server and
//! prints one `<digest>  <name>` line per input, like `sha256sum`.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use drv_sha_accel_api::{Transport, SHA256_DIGEST_SIZE};
use drv_sha_accel_server::ShaAccelServer;
use log::{error, info};

mod config;

use config::{AppConfig, DeviceKind};

#[derive(Parser, Debug)]
#[clap(
    name = "sha-accel-hash",
    about = "SHA-256 through the cryptIC accelerator"
)]
struct Args {
    /// TOML config file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Accelerator to use, overriding the config file
    #[clap(long, arg_enum)]
    device: Option<DeviceKind>,

    /// Log level, overriding the config file
    #[clap(long)]
    log_level: Option<String>,

    /// Bytes handed to each `update` call
    #[clap(long, default_value_t = 4096)]
    chunk_size: usize,

    /// Files to hash; standard input if none are given
    files: Vec<PathBuf>,
}

#[cfg(feature = "emulator")]
fn connect_emulated(config: &AppConfig) -> Result<Arc<dyn Transport>> {
    use drv_sha_accel_usb::UsbTransport;
    use sha_accel_emulator::EmulatedPipe;

    let pipe = EmulatedPipe::new().context("starting emulated accelerator")?;
    let transport: Arc<dyn Transport> =
        UsbTransport::connect(pipe, config.transport.clone())
            .context("connecting to emulated accelerator")?;
    Ok(transport)
}

#[cfg(not(feature = "emulator"))]
fn connect_emulated(_config: &AppConfig) -> Result<Arc<dyn Transport>> {
    anyhow::bail!("built without the `emulator` feature")
}

fn hash_reader(
    server: &ShaAccelServer,
    mut input: impl Read,
    chunk_size: usize,
) -> Result<[u8; SHA256_DIGEST_SIZE]> {
    let handle = server.init().context("opening session")?;
    info!("session {} pinned to {:?}", handle, server.backend(handle)?);

    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = server.destroy(handle);
                return Err(e).context("reading input");
            }
        };
        if let Err(e) = server.update(handle, &buf[..n]) {
            let _ = server.destroy(handle);
            return Err(e).context("hashing");
        }
    }
    server.finalize(handle).context("finalizing")
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(device) = args.device {
        config.device = device;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    sha_accel_log::init_stderr(config.log_level()?)
        .context("installing logger")?;

    let transport = match config.device {
        DeviceKind::Emulated => Some(connect_emulated(&config)?),
        DeviceKind::None => None,
    };
    let server = match &transport {
        Some(t) => ShaAccelServer::new(t.clone()),
        None => ShaAccelServer::software_only(),
    };

    let mut failed = false;
    if args.files.is_empty() {
        match hash_reader(&server, io::stdin().lock(), args.chunk_size) {
            Ok(digest) => println!("{}  -", hex(&digest)),
            Err(e) => {
                error!("-: {:#}", e);
                failed = true;
            }
        }
    }
    for path in &args.files {
        let result = File::open(path)
            .with_context(|| format!("opening {}", path.display()))
            .and_then(|f| hash_reader(&server, f, args.chunk_size));
        match result {
            Ok(digest) => println!("{}  {}", hex(&digest), path.display()),
            Err(e) => {
                error!("{}: {:#}", path.display(), e);
                failed = true;
            }
        }
    }

    if let Some(t) = transport {
        t.disconnect();
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
