//! Run queue
//!
//! An intrusive doubly-linked list over the `sched_next` / `sched_prev`
//! fields of the thread control block, kept sorted by vruntime
//! (smallest first). The head is always the next thread to run.

use graphene_cap::ObjRef;

use crate::objects;

/// Vruntime-ordered ready queue.
pub struct RunQueue {
    head: ObjRef,
    tail: ObjRef,
    count: u32,
}

impl RunQueue {
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

    /// The head (lowest vruntime), if any.
    #[inline]
    #[must_use]
    pub const fn head(&self) -> ObjRef {
        self.head
    }

    /// Vruntime of the head thread.
    #[must_use]
    pub fn head_vruntime(&self) -> Option<u64> {
        if !self.head.is_valid() {
            return None;
        }
        objects::with_thread(self.head, |t| t.vruntime)
    }

    /// Insert a thread at its vruntime position.
    pub fn insert(&mut self, thread: ObjRef) {
        if !thread.is_valid() {
            return;
        }
        let Some((already, vruntime)) =
            objects::with_thread(thread, |t| (t.in_run_queue, t.vruntime))
        else {
            return;
        };
        if already {
            return;
        }

        // Walk to the first entry with a larger vruntime.
        let mut insert_after = ObjRef::NULL;
        let mut cur = self.head;
        while cur.is_valid() {
            let (cur_vr, cur_next) =
                objects::with_thread(cur, |t| (t.vruntime, t.sched_next))
                    .unwrap_or((u64::MAX, ObjRef::NULL));
            if cur_vr <= vruntime {
                insert_after = cur;
                cur = cur_next;
            } else {
                break;
            }
        }

        let next = if insert_after.is_valid() {
            objects::with_thread(insert_after, |t| t.sched_next).unwrap_or(ObjRef::NULL)
        } else {
            self.head
        };

        objects::with_thread(thread, |t| {
            t.sched_prev = insert_after;
            t.sched_next = next;
            t.in_run_queue = true;
        });

        if insert_after.is_valid() {
            objects::with_thread(insert_after, |t| t.sched_next = thread);
        } else {
            self.head = thread;
        }
        if next.is_valid() {
            objects::with_thread(next, |t| t.sched_prev = thread);
        } else {
            self.tail = thread;
        }
        self.count += 1;
    }

    /// Remove a thread; a no-op if it is not queued.
    pub fn remove(&mut self, thread: ObjRef) {
        if !thread.is_valid() {
            return;
        }
        let links = objects::with_thread(thread, |t| {
            t.in_run_queue.then_some((t.sched_prev, t.sched_next))
        })
        .flatten();
        let Some((prev, next)) = links else {
            return;
        };

        if prev.is_valid() {
            objects::with_thread(prev, |t| t.sched_next = next);
        } else {
            self.head = next;
        }
        if next.is_valid() {
            objects::with_thread(next, |t| t.sched_prev = prev);
        } else {
            self.tail = prev;
        }

        objects::with_thread(thread, |t| {
            t.sched_prev = ObjRef::NULL;
            t.sched_next = ObjRef::NULL;
            t.in_run_queue = false;
        });
        self.count = self.count.saturating_sub(1);
    }

    /// Pop the head.
    pub fn pop(&mut self) -> Option<ObjRef> {
        let head = self.head;
        if !head.is_valid() {
            return None;
        }
        self.remove(head);
        Some(head)
    }
}

impl Default for RunQueue {
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
    use graphene_cap::ObjRef;

    fn make_thread(vruntime: u64) -> ObjRef {
        let mut t = Thread::new(0, "rq-test", ObjRef::NULL, ThreadFlags::KERNEL);
        t.vruntime = vruntime;
        let r = objects::alloc(ObjectData::Thread(Box::new(t))).expect("arena slot");
        objects::inc_ref(r);
        r
    }

    #[test]
    fn test_pop_order_is_vruntime_order() {
        let mut q = RunQueue::new();
        let hi = make_thread(3000);
        let lo = make_thread(1000);
        let mid = make_thread(2000);

        q.insert(hi);
        q.insert(lo);
        q.insert(mid);
        assert_eq!(q.len(), 3);
        assert_eq!(q.head_vruntime(), Some(1000));

        assert_eq!(q.pop(), Some(lo));
        assert_eq!(q.pop(), Some(mid));
        assert_eq!(q.pop(), Some(hi));
        assert_eq!(q.pop(), None);

        for r in [hi, lo, mid] {
            objects::unref(r);
        }
    }

    #[test]
    fn test_remove_middle() {
        let mut q = RunQueue::new();
        let a = make_thread(10);
        let b = make_thread(20);
        let c = make_thread(30);
        q.insert(a);
        q.insert(b);
        q.insert(c);

        q.remove(b);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(a));
        assert_eq!(q.pop(), Some(c));

        for r in [a, b, c] {
            objects::unref(r);
        }
    }

    #[test]
    fn test_double_insert_is_noop() {
        let mut q = RunQueue::new();
        let a = make_thread(5);
        q.insert(a);
        q.insert(a);
        assert_eq!(q.len(), 1);
        q.remove(a);
        objects::unref(a);
    }

    #[test]
    fn test_equal_vruntime_keeps_fifo() {
        let mut q = RunQueue::new();
        let first = make_thread(100);
        let second = make_thread(100);
        q.insert(first);
        q.insert(second);
        // Equal keys: earlier insert stays ahead.
        assert_eq!(q.pop(), Some(first));
        assert_eq!(q.pop(), Some(second));
        for r in [first, second] {
            objects::unref(r);
        }
    }
}
