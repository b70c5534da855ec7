// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bulk-transfer transport for the cryptIC accelerator.
//!
//! [`UsbTransport`] turns a [`BulkPipe`] (one bulk-in and one bulk-out
//! endpoint with asynchronous completions) into the synchronous
//! [`Transport`] contract the digest sessions use. Completion handlers never
//! touch caller state directly: reads post an event to the reader's channel
//! and writes hand their in-flight slot back through a bounded channel. The
//! only lock a completion takes is the spin lock around the sticky error.

#![forbid(unsafe_code)]

mod cache;
mod config;
mod pipe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use drv_sha_accel_api::{AccelError, SendMode, TransferFault, Transport};
use log::{debug, info, trace, warn};

use crate::cache::ReadCache;

pub use crate::config::TransportConfig;
pub use crate::pipe::{BulkPipe, InCompletion, OutCompletion};

/// The error slot shared with completion handlers.
#[derive(Default)]
struct FaultSlot {
    last: spin::Mutex<Option<TransferFault>>,
}

impl FaultSlot {
    /// Records a completion fault. Cancellations and shutdowns are the
    /// normal result of killing a transfer and are not kept.
    fn record(&self, fault: TransferFault) {
        if fault.is_sticky() {
            *self.last.lock() = Some(fault);
        }
    }

    fn take(&self) -> Option<TransferFault> {
        self.last.lock().take()
    }
}

enum ReadEvent {
    Completed(Result<Vec<u8>, TransferFault>),
    Wake,
}

struct Reader {
    cache: ReadCache,
    events: Receiver<ReadEvent>,
    ongoing: bool,
}

pub struct UsbTransport<P: BulkPipe> {
    pipe: P,
    config: TransportConfig,
    connected: AtomicBool,
    interrupted: AtomicBool,
    fault: Arc<FaultSlot>,
    /// Serialises submissions against disconnect.
    io: Mutex<()>,
    reader: Mutex<Reader>,
    read_events: Sender<ReadEvent>,
    /// One `()` per free write slot.
    write_slots: Mutex<Receiver<()>>,
    write_return: SyncSender<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P: BulkPipe> UsbTransport<P> {
    /// Registers with `pipe` and returns the shared connection handle.
    ///
    /// The receive cache is sized from the pipe's bulk-in max packet size.
    pub fn connect(
        pipe: P,
        config: TransportConfig,
    ) -> Result<Arc<Self>, AccelError> {
        let capacity = pipe.max_packet_in();
        if capacity == 0 {
            return Err(AccelError::TransferError(TransferFault::NoDevice));
        }
        let cache = ReadCache::with_capacity(capacity)?;

        let slots = config.writes_in_flight.max(1);
        let (write_return, write_slots) = mpsc::sync_channel(slots);
        for _ in 0..slots {
            // Cannot fail: the channel has room for exactly `slots` tokens.
            let _ = write_return.try_send(());
        }
        let (read_events, events) = mpsc::channel();

        info!(
            "accelerator connected: bulk-in {} bytes, {} write(s) in flight",
            capacity, slots
        );

        Ok(Arc::new(Self {
            pipe,
            config,
            connected: AtomicBool::new(true),
            interrupted: AtomicBool::new(false),
            fault: Arc::new(FaultSlot::default()),
            io: Mutex::new(()),
            reader: Mutex::new(Reader {
                cache,
                events,
                ongoing: false,
            }),
            read_events,
            write_slots: Mutex::new(write_slots),
            write_return,
        }))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Wakes a caller blocked in [`Transport::receive`], which then fails
    /// with [`AccelError::Interrupted`]. If nobody is waiting, the next
    /// blocking wait is interrupted instead.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        let _ = self.read_events.send(ReadEvent::Wake);
    }

    fn take_fault(&self) -> Result<(), AccelError> {
        match self.fault.take() {
            Some(fault) => {
                warn!("reporting transfer fault: {}", fault);
                Err(AccelError::TransferError(fault))
            }
            None => Ok(()),
        }
    }

    fn acquire_write_slot(&self, mode: SendMode) -> Result<(), AccelError> {
        match mode {
            SendMode::NonBlocking => {
                let slots = match self.write_slots.try_lock() {
                    Ok(slots) => slots,
                    Err(TryLockError::Poisoned(p)) => p.into_inner(),
                    // Another writer is already waiting for a slot.
                    Err(TryLockError::WouldBlock) => {
                        return Err(AccelError::DeviceBusy)
                    }
                };
                slots.try_recv().map_err(|_| AccelError::DeviceBusy)
            }
            SendMode::Blocking => {
                let slots = lock(&self.write_slots);
                match slots.recv_timeout(self.config.write_timeout()) {
                    Ok(()) => Ok(()),
                    Err(RecvTimeoutError::Timeout) => {
                        Err(AccelError::DeviceBusy)
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        Err(AccelError::NotConnected)
                    }
                }
            }
        }
    }

    fn release_write_slot(&self) {
        let _ = self.write_return.try_send(());
    }

    fn submit_out(&self, bytes: &[u8]) -> Result<usize, AccelError> {
        let _io = lock(&self.io);
        if !self.is_connected() {
            return Err(AccelError::NotConnected);
        }

        let len = bytes.len().min(self.config.max_transfer.max(1));
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| AccelError::OutOfMemory)?;
        data.extend_from_slice(&bytes[..len]);

        let fault = self.fault.clone();
        let slots = self.write_return.clone();
        let events = self.read_events.clone();
        self.pipe
            .submit_out(
                data,
                Box::new(move |result| {
                    if let Err(f) = result {
                        fault.record(f);
                        // A reader waiting for the answer to this write
                        // would otherwise sit out its whole timeout.
                        if f.is_sticky() {
                            let _ = events.send(ReadEvent::Wake);
                        }
                    }
                    let _ = slots.try_send(());
                }),
            )
            .map_err(AccelError::TransferError)?;
        trace!("bulk-out {} bytes", len);
        Ok(len)
    }

    /// Starts a physical read sized to the whole cache.
    fn start_read(&self, reader: &mut Reader) -> Result<(), AccelError> {
        let _io = lock(&self.io);
        if !self.is_connected() {
            return Err(AccelError::NotConnected);
        }

        let len = reader.cache.capacity();
        reader.cache.reset();

        let fault = self.fault.clone();
        let events = self.read_events.clone();
        self.pipe
            .submit_in(
                len,
                Box::new(move |result| {
                    if let Err(f) = &result {
                        fault.record(*f);
                    }
                    let _ = events.send(ReadEvent::Completed(result));
                }),
            )
            .map_err(AccelError::TransferError)?;
        reader.ongoing = true;
        trace!("bulk-in requested {} bytes", len);
        Ok(())
    }

    /// Waits for the outstanding read, or for a wake-up.
    fn wait_for_read(&self, reader: &mut Reader) -> Result<(), AccelError> {
        let event = match reader.events.recv_timeout(self.config.read_timeout())
        {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                // `ongoing` stays set: the killed transfer still completes,
                // possibly with data, and the next wait consumes it.
                self.pipe.kill_in();
                return Err(AccelError::TransferError(TransferFault::Timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(AccelError::NotConnected)
            }
        };

        match event {
            ReadEvent::Completed(Ok(data)) => {
                reader.ongoing = false;
                if let Err(f) = reader.cache.fill(&data) {
                    self.fault.record(f);
                }
            }
            ReadEvent::Completed(Err(_)) => {
                // Already recorded by the completion if it matters.
                reader.ongoing = false;
            }
            ReadEvent::Wake => {
                if self.interrupted.swap(false, Ordering::SeqCst) {
                    return Err(AccelError::Interrupted);
                }
            }
        }
        Ok(())
    }
}

impl<P: BulkPipe> Transport for UsbTransport<P> {
    fn send(&self, bytes: &[u8], mode: SendMode) -> Result<usize, AccelError> {
        if !self.is_connected() {
            return Err(AccelError::NotConnected);
        }
        self.take_fault()?;
        if bytes.is_empty() {
            return Ok(0);
        }

        self.acquire_write_slot(mode)?;
        let result = self.submit_out(bytes);
        if result.is_err() {
            self.release_write_slot();
        }
        result
    }

    fn receive(&self, max_len: usize) -> Result<Vec<u8>, AccelError> {
        if max_len == 0 {
            return Ok(Vec::new());
        }
        let mut reader = lock(&self.reader);

        loop {
            if !self.is_connected() {
                return Err(AccelError::NotConnected);
            }
            self.take_fault()?;
            if reader.ongoing {
                self.wait_for_read(&mut reader)?;
                continue;
            }

            if reader.cache.available() > 0 {
                let chunk = reader.cache.take(max_len);
                if chunk.len() < max_len {
                    // Cache drained; prefetch the rest without waiting.
                    if let Err(e) = self.start_read(&mut reader) {
                        debug!("background read not started: {}", e);
                    }
                }
                return Ok(chunk);
            }

            self.start_read(&mut reader)?;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        {
            let _io = lock(&self.io);
            if !self.connected.swap(false, Ordering::SeqCst) {
                return;
            }
        }
        // Killed writes hand their slots back, which wakes blocked writers;
        // the killed read and the extra wake-up release a blocked reader.
        self.pipe.kill_all();
        let _ = self.read_events.send(ReadEvent::Wake);
        info!("accelerator disconnected");
    }
}

impl<P: BulkPipe> Drop for UsbTransport<P> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
