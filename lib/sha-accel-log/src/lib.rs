// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::cell::{Cell, RefCell};
use std::io::Write;

use critical_section::Mutex;
use log::{Level, Metadata, Record};

type Sink = Box<dyn Write + Send>;

static LOGGER: IoWriteLogger = IoWriteLogger::new();

struct IoWriteLogger {
    writer: Mutex<RefCell<Option<Sink>>>,
    level: Mutex<Cell<Level>>,
}

impl IoWriteLogger {
    const fn new() -> Self {
        IoWriteLogger {
            writer: Mutex::new(RefCell::new(None)),
            level: Mutex::new(Cell::new(Level::Info)),
        }
    }
}

/// Writes one record as `[LEVEL] - target: message`.
fn write_record(
    out: &mut dyn Write,
    record: &Record<'_>,
) -> std::io::Result<()> {
    writeln!(
        out,
        "[{}] - {}: {}",
        record.level(),
        record.target(),
        record.args()
    )
}

impl log::Log for IoWriteLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        critical_section::with(|cs| {
            metadata.level() <= self.level.borrow(cs).get()
        })
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            critical_section::with(|cs| {
                if let Some(out) = self.writer.borrow(cs).borrow_mut().as_mut() {
                    write_record(&mut **out, record).ok();
                }
            });
        }
    }

    fn flush(&self) {
        critical_section::with(|cs| {
            if let Some(out) = self.writer.borrow(cs).borrow_mut().as_mut() {
                let _ = out.flush();
            }
        });
    }
}

/// Sends log output to `writer` and enables records up to `level`.
///
/// Only the first call installs the logger; later calls swap the writer and
/// level but return the error from `log::set_logger`.
pub fn init(
    writer: impl Write + Send + 'static,
    level: Level,
) -> Result<(), log::SetLoggerError> {
    critical_section::with(|cs| {
        LOGGER.writer.borrow(cs).replace(Some(Box::new(writer)));
        LOGGER.level.borrow(cs).set(level);
    });
    log::set_max_level(level.to_level_filter());
    log::set_logger(&LOGGER)
}

/// Logs to standard error.
pub fn init_stderr(level: Level) -> Result<(), log::SetLoggerError> {
    init(std::io::stderr(), level)
}
