//! The kernel logger
//!
//! `log::Log` implementation: format into a stack buffer (the log path
//! never allocates), stamp with the tick-derived time, push into the
//! ring, echo to serial during early boot.

use core::fmt::Write;

use graphene_pal::{console, timer};
use log::{Level, LevelFilter, Log, Metadata, Record};

use super::buffer::{self, LogEntry};

/// Stack formatting buffer sized to one ring entry.
struct MessageBuffer {
    data: [u8; buffer::LOG_ENTRY_CONTENT_SIZE],
    len: usize,
}

impl MessageBuffer {
    const fn new() -> Self {
        Self {
            data: [0u8; buffer::LOG_ENTRY_CONTENT_SIZE],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.data[..self.len]).unwrap_or("<invalid>")
    }
}

impl Write for MessageBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = buffer::LOG_ENTRY_CONTENT_SIZE - self.len;
        let to_copy = bytes.len().min(remaining);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let time_ms = timer::now_ms();

        let mut msg = MessageBuffer::new();
        let _ = write!(msg, "{}", record.args());

        buffer::push(LogEntry::new(time_ms, record.level(), msg.as_str()));

        if buffer::early_console_enabled() {
            let level_str = match record.level() {
                Level::Error => "\x1b[31mERROR\x1b[0m",
                Level::Warn => "\x1b[33m WARN\x1b[0m",
                Level::Info => "\x1b[32m INFO\x1b[0m",
                Level::Debug => "\x1b[34mDEBUG\x1b[0m",
                Level::Trace => "\x1b[35mTRACE\x1b[0m",
            };
            let mut line = MessageBuffer::new();
            let _ = writeln!(
                line,
                "[{:>6}.{:03}] {} {}: {}",
                time_ms / 1000,
                time_ms % 1000,
                level_str,
                record.target(),
                msg.as_str()
            );
            console::puts(line.as_str());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the logger. Idempotent (later calls are ignored by the log
/// crate).
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Debug))
        .ok();
}
