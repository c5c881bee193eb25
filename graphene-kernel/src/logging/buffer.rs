//! Log ring buffer
//!
//! Fixed ring of formatted log entries, kept so a log-drain service can
//! pull kernel messages after boot. Writers never block on a reader;
//! the oldest entry is overwritten when the ring is full.

use core::sync::atomic::{AtomicBool, Ordering};

use graphene_arch::IrqSpinMutex;
use log::Level;

/// Bytes of message text per entry.
pub const LOG_ENTRY_CONTENT_SIZE: usize = 224;

/// Entries in the ring.
pub const LOG_RING_ENTRIES: usize = 256;

/// One formatted log record.
#[derive(Clone, Copy)]
pub struct LogEntry {
    /// Milliseconds since boot.
    pub time_ms: u64,
    /// Severity.
    pub level: Level,
    /// Message text (truncated).
    pub content: [u8; LOG_ENTRY_CONTENT_SIZE],
    /// Valid bytes in `content`.
    pub len: u16,
}

impl LogEntry {
    /// Build an entry, truncating the message to the content size.
    #[must_use]
    pub fn new(time_ms: u64, level: Level, message: &str) -> Self {
        let mut content = [0u8; LOG_ENTRY_CONTENT_SIZE];
        let bytes = message.as_bytes();
        let len = bytes.len().min(LOG_ENTRY_CONTENT_SIZE);
        content[..len].copy_from_slice(&bytes[..len]);
        Self {
            time_ms,
            level,
            content,
            len: len as u16,
        }
    }

    /// Message text.
    #[must_use]
    pub fn message(&self) -> &str {
        core::str::from_utf8(&self.content[..self.len as usize]).unwrap_or("<invalid>")
    }
}

struct Ring {
    entries: [Option<LogEntry>; LOG_RING_ENTRIES],
    /// Next write position.
    write: usize,
    /// Next read position (for the drain path).
    read: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            entries: [None; LOG_RING_ENTRIES],
            write: 0,
            read: 0,
        }
    }
}

static RING: IrqSpinMutex<Ring> = IrqSpinMutex::new(Ring::new());
static EARLY_CONSOLE: AtomicBool = AtomicBool::new(true);

/// Append an entry, overwriting the oldest when full.
pub fn push(entry: LogEntry) {
    let mut ring = RING.lock();
    let write = ring.write;
    ring.entries[write] = Some(entry);
    ring.write = (write + 1) % LOG_RING_ENTRIES;
    if ring.write == ring.read {
        // Overwrote the unread tail; drop the oldest.
        ring.read = (ring.read + 1) % LOG_RING_ENTRIES;
    }
}

/// Pull the oldest unread entry.
#[must_use]
pub fn pop() -> Option<LogEntry> {
    let mut ring = RING.lock();
    if ring.read == ring.write {
        return None;
    }
    let read = ring.read;
    let entry = ring.entries[read].take();
    ring.read = (read + 1) % LOG_RING_ENTRIES;
    entry
}

/// Whether log lines are still echoed straight to the serial console.
#[must_use]
pub fn early_console_enabled() -> bool {
    EARLY_CONSOLE.load(Ordering::Relaxed)
}

/// Stop echoing to the serial console (a user log drain took over).
pub fn disable_early_console() {
    EARLY_CONSOLE.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_truncation() {
        let long: alloc::string::String =
            core::iter::repeat('a').take(LOG_ENTRY_CONTENT_SIZE + 50).collect();
        let e = LogEntry::new(0, Level::Info, &long);
        assert_eq!(e.message().len(), LOG_ENTRY_CONTENT_SIZE);
    }

    #[test]
    fn test_push_pop_order() {
        // The ring is global; only relative ordering is asserted.
        push(LogEntry::new(1, Level::Info, "first"));
        push(LogEntry::new(2, Level::Info, "second"));
        let a = pop().expect("first entry");
        let b = pop().expect("second entry");
        assert!(a.time_ms < b.time_ms);
    }
}
