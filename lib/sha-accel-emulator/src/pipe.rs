// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use drv_sha_accel_api::{TransferFault, REQUEST_LEN};
use drv_sha_accel_usb::{BulkPipe, InCompletion, OutCompletion};
use log::{debug, warn};

use crate::Firmware;

/// Bulk-in max packet size of a full-speed device.
pub const DEFAULT_MAX_PACKET: usize = 64;

type Job = Box<dyn FnOnce() + Send>;

/// A [`BulkPipe`] wired to an emulated accelerator.
///
/// Request bytes from the bulk-out side are assembled into frames and run
/// through [`Firmware`]; the answer is queued for the bulk-in side.
/// Completions run on a dedicated worker thread, standing in for the
/// host controller's completion context.
///
/// The device is strict about framing: request bytes arriving while an
/// answer is still waiting to be read mean two exchanges overlapped on the
/// wire. That is counted as a protocol violation and the transfer stalls.
pub struct EmulatedPipe {
    max_packet: usize,
    latency: Duration,
    device: Mutex<Device>,
}

struct Device {
    firmware: Firmware,
    assembling: Vec<u8>,
    answer: VecDeque<u8>,
    pending_in: Option<(usize, InCompletion)>,
    injected: VecDeque<TransferFault>,
    unplugged: bool,
    frames: usize,
    violations: usize,
    jobs: Sender<Job>,
}

impl EmulatedPipe {
    pub fn new() -> io::Result<Self> {
        Self::with_max_packet(DEFAULT_MAX_PACKET)
    }

    /// Starts the completion thread. It exits once the pipe is dropped.
    pub fn with_max_packet(max_packet: usize) -> io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("sha-accel-completions".into())
            .spawn(move || {
                for job in queue {
                    job();
                }
            })?;

        Ok(Self {
            max_packet,
            latency: Duration::ZERO,
            device: Mutex::new(Device {
                firmware: Firmware,
                assembling: Vec::new(),
                answer: VecDeque::new(),
                pending_in: None,
                injected: VecDeque::new(),
                unplugged: false,
                frames: 0,
                violations: 0,
                jobs,
            }),
        })
    }

    /// Delays every bulk-in completion by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next transfer, in either direction, complete with the
    /// fault encoded by `status`. Unknown codes become [`TransferFault::Io`].
    pub fn inject_status(&self, status: u32) {
        let fault =
            TransferFault::from_status(status).unwrap_or(TransferFault::Io);
        self.device().injected.push_back(fault);
    }

    /// Pulls the plug: the outstanding read fails and new submissions are
    /// refused with [`TransferFault::NoDevice`].
    pub fn unplug(&self) {
        let mut dev = self.device();
        dev.unplugged = true;
        if let Some((_, done)) = dev.pending_in.take() {
            dev.complete_in(done, Err(TransferFault::Shutdown), Duration::ZERO);
        }
        debug!("emulated accelerator unplugged");
    }

    /// Frames the firmware has answered.
    pub fn frames_processed(&self) -> usize {
        self.device().frames
    }

    /// Requests that started while an earlier answer was still unread.
    pub fn protocol_violations(&self) -> usize {
        self.device().violations
    }
}

impl Device {
    fn complete_out(
        &self,
        done: OutCompletion,
        result: Result<usize, TransferFault>,
    ) {
        let _ = self.jobs.send(Box::new(move || done(result)));
    }

    fn complete_in(
        &self,
        done: InCompletion,
        result: Result<Vec<u8>, TransferFault>,
        latency: Duration,
    ) {
        let _ = self.jobs.send(Box::new(move || {
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            done(result)
        }));
    }

    /// Feeds request bytes to the firmware one frame at a time.
    fn assemble(&mut self, data: &[u8]) -> Result<(), TransferFault> {
        for &byte in data {
            if self.assembling.is_empty() && !self.answer.is_empty() {
                self.violations += 1;
                self.answer.clear();
                return Err(TransferFault::Stall);
            }
            self.assembling.push(byte);
            if self.assembling.len() == REQUEST_LEN {
                let frame = std::mem::take(&mut self.assembling);
                let digest = self.firmware.execute(&frame)?;
                self.answer.extend(digest);
                self.frames += 1;
            }
        }
        Ok(())
    }

    fn serve_read(&mut self, latency: Duration) {
        if self.answer.is_empty() {
            return;
        }
        if let Some((len, done)) = self.pending_in.take() {
            let n = len.min(self.answer.len());
            let chunk: Vec<u8> = self.answer.drain(..n).collect();
            self.complete_in(done, Ok(chunk), latency);
        }
    }
}

impl BulkPipe for EmulatedPipe {
    fn max_packet_in(&self) -> usize {
        self.max_packet
    }

    fn submit_out(
        &self,
        data: Vec<u8>,
        done: OutCompletion,
    ) -> Result<(), TransferFault> {
        let mut dev = self.device();
        if dev.unplugged {
            return Err(TransferFault::NoDevice);
        }
        if let Some(fault) = dev.injected.pop_front() {
            dev.complete_out(done, Err(fault));
            return Ok(());
        }

        let result = match dev.assemble(&data) {
            Ok(()) => Ok(data.len()),
            Err(fault) => {
                warn!("emulated accelerator stalled: {}", fault);
                dev.assembling.clear();
                Err(fault)
            }
        };
        dev.complete_out(done, result);
        dev.serve_read(self.latency);
        Ok(())
    }

    fn submit_in(
        &self,
        len: usize,
        done: InCompletion,
    ) -> Result<(), TransferFault> {
        let mut dev = self.device();
        if dev.unplugged {
            return Err(TransferFault::NoDevice);
        }
        if dev.pending_in.is_some() {
            return Err(TransferFault::Io);
        }
        if let Some(fault) = dev.injected.pop_front() {
            dev.complete_in(done, Err(fault), Duration::ZERO);
            return Ok(());
        }
        dev.pending_in = Some((len, done));
        dev.serve_read(self.latency);
        Ok(())
    }

    fn kill_in(&self) {
        let mut dev = self.device();
        if let Some((_, done)) = dev.pending_in.take() {
            dev.complete_in(done, Err(TransferFault::Cancelled), Duration::ZERO);
        }
    }

    fn kill_all(&self) {
        // Bulk-out transfers complete as soon as they are submitted, so
        // only a read can be outstanding.
        self.kill_in();
    }
}
