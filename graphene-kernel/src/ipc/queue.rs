//! Bounded pending-message queue
//!
//! Async endpoints buffer up to 16 messages. Each entry remembers the
//! sending process so capability transfer can run at delivery time.

use graphene_cap::ObjRef;
use graphene_syscall::Message;

/// Pending-queue capacity per endpoint.
pub const PENDING_CAPACITY: usize = 16;

/// One buffered message.
#[derive(Clone, Copy)]
pub struct PendingMsg {
    /// The staged message.
    pub msg: Message,
    /// Process whose capability table the transfer draws from.
    pub sender_proc: ObjRef,
}

/// Fixed-capacity FIFO ring of messages.
pub struct MsgQueue {
    buf: [PendingMsg; PENDING_CAPACITY],
    head: usize,
    len: usize,
}

impl MsgQueue {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: PendingMsg = PendingMsg {
            msg: Message::empty(),
            sender_proc: ObjRef::NULL,
        };
        Self {
            buf: [EMPTY; PENDING_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    /// Number of buffered messages.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check emptiness.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check fullness.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len == PENDING_CAPACITY
    }

    /// Append a message. Returns `false` when full.
    pub fn push(&mut self, entry: PendingMsg) -> bool {
        if self.is_full() {
            return false;
        }
        let idx = (self.head + self.len) % PENDING_CAPACITY;
        self.buf[idx] = entry;
        self.len += 1;
        true
    }

    /// Pop the oldest message.
    pub fn pop(&mut self) -> Option<PendingMsg> {
        if self.is_empty() {
            return None;
        }
        let entry = self.buf[self.head];
        self.head = (self.head + 1) % PENDING_CAPACITY;
        self.len -= 1;
        Some(entry)
    }
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tag: u32) -> PendingMsg {
        PendingMsg {
            msg: Message::with_payload(tag, b"x"),
            sender_proc: ObjRef::NULL,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut q = MsgQueue::new();
        for tag in 0..5 {
            assert!(q.push(tagged(tag)));
        }
        for tag in 0..5 {
            assert_eq!(q.pop().expect("entry").msg.header.tag, tag);
        }
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_capacity_sixteen() {
        let mut q = MsgQueue::new();
        for tag in 0..PENDING_CAPACITY as u32 {
            assert!(q.push(tagged(tag)), "push {tag} within capacity");
        }
        // The seventeenth is refused.
        assert!(!q.push(tagged(99)));
        assert_eq!(q.len(), PENDING_CAPACITY);

        // FIFO survives wrap-around.
        assert_eq!(q.pop().expect("first").msg.header.tag, 0);
        assert!(q.push(tagged(16)));
        let mut last = 0;
        while let Some(p) = q.pop() {
            last = p.msg.header.tag;
        }
        assert_eq!(last, 16);
    }
}
