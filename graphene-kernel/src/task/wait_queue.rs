//! Wait queues
//!
//! FIFO queues of blocked threads with intrusive links (`wait_next` /
//! `wait_prev` in the thread control block). Wait queues are mutated
//! only inside interrupt-disabled critical sections (§ concurrency
//! model), so enqueue/dequeue never race with the interrupt handlers
//! that wake threads.

use graphene_cap::ObjRef;

use crate::objects;

/// Intrusive FIFO of threads.
#[derive(Clone, Copy, Debug)]
pub struct WaitQueue {
    head: ObjRef,
    tail: ObjRef,
    count: u32,
}

impl WaitQueue {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: ObjRef::NULL,
            tail: ObjRef::NULL,
            count: 0,
        }
    }

    /// Check emptiness.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of queued threads.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.count
    }

    /// Append a thread at the tail.
    pub fn enqueue(&mut self, thread: ObjRef) {
        if !thread.is_valid() {
            return;
        }
        let already_queued =
            objects::with_thread(thread, |t| t.in_wait_queue).unwrap_or(true);
        if already_queued {
            return;
        }

        let old_tail = self.tail;
        objects::with_thread(thread, |t| {
            t.wait_prev = old_tail;
            t.wait_next = ObjRef::NULL;
            t.in_wait_queue = true;
        });

        if old_tail.is_valid() {
            objects::with_thread(old_tail, |t| t.wait_next = thread);
        } else {
            self.head = thread;
        }
        self.tail = thread;
        self.count += 1;
    }

    /// Pop the head, or `None` if empty.
    pub fn dequeue(&mut self) -> Option<ObjRef> {
        let head = self.head;
        if !head.is_valid() {
            return None;
        }
        self.remove(head);
        Some(head)
    }

    /// Remove a specific thread (cancellation support). A no-op if the
    /// thread is not queued here.
    pub fn remove(&mut self, thread: ObjRef) {
        if !thread.is_valid() {
            return;
        }
        let links = objects::with_thread(thread, |t| {
            t.in_wait_queue.then_some((t.wait_prev, t.wait_next))
        })
        .flatten();
        let Some((prev, next)) = links else {
            return;
        };

        if prev.is_valid() {
            objects::with_thread(prev, |t| t.wait_next = next);
        } else {
            self.head = next;
        }
        if next.is_valid() {
            objects::with_thread(next, |t| t.wait_prev = prev);
        } else {
            self.tail = prev;
        }

        objects::with_thread(thread, |t| {
            t.wait_prev = ObjRef::NULL;
            t.wait_next = ObjRef::NULL;
            t.in_wait_queue = false;
        });
        self.count = self.count.saturating_sub(1);
    }

    /// Drain the queue, invoking `f` with each thread in FIFO order.
    pub fn drain<F: FnMut(ObjRef)>(&mut self, mut f: F) {
        while let Some(thread) = self.dequeue() {
            f(thread);
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{self, ObjectData};
    use crate::task::thread::{Thread, ThreadFlags};
    use alloc::boxed::Box;

    fn make_thread() -> ObjRef {
        let t = Thread::new(0, "wq-test", ObjRef::NULL, ThreadFlags::KERNEL);
        let r = objects::alloc(ObjectData::Thread(Box::new(t))).expect("arena slot");
        objects::inc_ref(r);
        r
    }

    #[test]
    fn test_fifo_order() {
        let mut q = WaitQueue::new();
        let a = make_thread();
        let b = make_thread();
        let c = make_thread();

        q.enqueue(a);
        q.enqueue(b);
        q.enqueue(c);
        assert_eq!(q.len(), 3);

        assert_eq!(q.dequeue(), Some(a));
        assert_eq!(q.dequeue(), Some(b));
        assert_eq!(q.dequeue(), Some(c));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());

        for r in [a, b, c] {
            objects::unref(r);
        }
    }

    #[test]
    fn test_remove_specific_for_cancellation() {
        let mut q = WaitQueue::new();
        let a = make_thread();
        let b = make_thread();
        let c = make_thread();
        q.enqueue(a);
        q.enqueue(b);
        q.enqueue(c);

        q.remove(b);
        assert_eq!(q.len(), 2);
        // b's links are cleared so it can rejoin another queue.
        assert_eq!(objects::with_thread(b, |t| t.in_wait_queue), Some(false));

        assert_eq!(q.dequeue(), Some(a));
        assert_eq!(q.dequeue(), Some(c));

        for r in [a, b, c] {
            objects::unref(r);
        }
    }

    #[test]
    fn test_double_enqueue_is_noop() {
        let mut q = WaitQueue::new();
        let a = make_thread();
        q.enqueue(a);
        q.enqueue(a);
        assert_eq!(q.len(), 1);
        q.remove(a);
        objects::unref(a);
    }
}
