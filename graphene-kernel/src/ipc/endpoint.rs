//! Endpoint rendezvous operations
//!
//! Synchronous send/recv rendezvous with bounded async buffering.
//! A sender's message stays staged on its own kernel stack; the
//! receiver copies from there at handoff time, so no message ever
//! needs kernel-heap storage on the synchronous path.
//!
//! Blocking works by enqueuing the current thread on the endpoint's
//! FIFO, recording the staging buffer in the control block, and calling
//! into the scheduler; the waker writes the outcome into
//! `wake_reason` before making the thread ready again.

use graphene_arch::cpu;
use graphene_cap::ObjRef;
use graphene_syscall::Message;

use crate::objects;
use crate::sched;
use crate::task::thread::{ThreadState, WakeReason};
use crate::task::wait_queue::WaitQueue;

use super::cap_transfer;
use super::queue::{MsgQueue, PendingMsg};
use super::IpcError;

/// An IPC endpoint.
pub struct Endpoint {
    /// Threads blocked waiting to receive.
    pub recv_queue: WaitQueue,
    /// Threads blocked waiting to send.
    pub send_queue: WaitQueue,
    /// Buffered messages (async mode).
    pub pending: MsgQueue,
    /// Partner endpoint when part of a channel.
    pub partner: ObjRef,
    /// Buffer sends instead of blocking.
    pub async_mode: bool,
    /// Closed endpoints refuse traffic and wake all waiters.
    pub closed: bool,
}

impl Endpoint {
    /// Create an open endpoint.
    #[must_use]
    pub fn new(async_mode: bool) -> Self {
        Self {
            recv_queue: WaitQueue::new(),
            send_queue: WaitQueue::new(),
            pending: MsgQueue::new(),
            partner: ObjRef::NULL,
            async_mode,
            closed: false,
        }
    }
}

/// Pop queue entries until a live (non-zombie) thread appears.
fn dequeue_live(queue: &mut WaitQueue) -> Option<ObjRef> {
    while let Some(t) = queue.dequeue() {
        let alive = objects::with_thread(t, |th| th.state != ThreadState::Zombie)
            .unwrap_or(false);
        if alive {
            return Some(t);
        }
    }
    None
}

/// What the send path decided under the endpoint access.
enum SendAction {
    DeliverTo(ObjRef),
    Buffered,
    QueueFull,
    Block,
    Closed,
}

/// Send `msg` (staged on the caller's kernel stack) to the endpoint.
///
/// Returns the delivered payload length. Blocks when no receiver is
/// ready and the endpoint is synchronous.
pub fn send(
    current: ObjRef,
    current_proc: ObjRef,
    ep_ref: ObjRef,
    msg: &mut Message,
) -> Result<usize, IpcError> {
    // A reply bypasses the endpoint queues entirely: it goes straight
    // to the caller recorded at request delivery.
    if msg.header.flags.is_reply() {
        return send_reply(current, current_proc, msg);
    }

    let flags = cpu::disable_interrupts();
    let result = send_inner(current, current_proc, ep_ref, msg);
    cpu::restore_interrupts(flags);
    result
}

fn send_inner(
    current: ObjRef,
    current_proc: ObjRef,
    ep_ref: ObjRef,
    msg: &mut Message,
) -> Result<usize, IpcError> {
    let action = objects::with_endpoint(ep_ref, |ep| {
        if ep.closed {
            return SendAction::Closed;
        }
        if let Some(receiver) = dequeue_live(&mut ep.recv_queue) {
            return SendAction::DeliverTo(receiver);
        }
        if ep.async_mode {
            if ep.pending.push(PendingMsg {
                msg: *msg,
                sender_proc: current_proc,
            }) {
                return SendAction::Buffered;
            }
            return SendAction::QueueFull;
        }
        SendAction::Block
    })
    .ok_or(IpcError::Closed)?;

    match action {
        SendAction::Closed => Err(IpcError::Closed),
        SendAction::Buffered => Ok(msg.header.length as usize),
        SendAction::QueueFull => Err(IpcError::QueueFull),

        SendAction::DeliverTo(receiver) => {
            let receiver_proc = objects::with_thread(receiver, |t| t.process)
                .ok_or(IpcError::Closed)?;

            // Capability transfer: a failure aborts the whole message
            // and puts the receiver back where it was.
            match cap_transfer::transfer(current_proc, receiver_proc, msg) {
                Ok(new_slots) => {
                    let mut delivered = *msg;
                    delivered.caps = new_slots;
                    deliver_to(receiver, &delivered, current, msg.header.flags.wants_reply());

                    if msg.header.flags.wants_reply() {
                        // Call pattern: wait for the reply in place.
                        await_reply(current, msg)
                    } else {
                        Ok(msg.header.length as usize)
                    }
                }
                Err(e) => {
                    objects::with_endpoint(ep_ref, |ep| ep.recv_queue.enqueue(receiver));
                    Err(IpcError::Transfer(e))
                }
            }
        }

        SendAction::Block => {
            // Stage on our stack and wait for a receiver to pull it.
            objects::with_thread(current, |t| {
                t.ipc_slot = core::ptr::from_mut(msg);
                t.wake_reason = WakeReason::None;
                t.state = ThreadState::Blocked;
                t.blocked_on = ep_ref;
            });
            objects::with_endpoint(ep_ref, |ep| ep.send_queue.enqueue(current));
            sched::schedule();

            match objects::with_thread(current, |t| {
                t.ipc_slot = core::ptr::null_mut();
                t.wake_reason
            }) {
                Some(WakeReason::Delivered(len)) => Ok(len),
                Some(WakeReason::EndpointClosed) => Err(IpcError::Closed),
                _ => {
                    // Pulled by a receiver as a call request: keep
                    // waiting for the reply (the receiver recorded us).
                    if msg.header.flags.wants_reply() {
                        await_reply(current, msg)
                    } else {
                        Err(IpcError::Closed)
                    }
                }
            }
        }
    }
}

/// Block the caller until a reply lands in `buf`.
fn await_reply(current: ObjRef, buf: &mut Message) -> Result<usize, IpcError> {
    objects::with_thread(current, |t| {
        t.ipc_slot = core::ptr::from_mut(buf);
        t.wake_reason = WakeReason::None;
        t.state = ThreadState::Blocked;
        t.blocked_on = ObjRef::NULL;
    });
    sched::schedule();

    match objects::with_thread(current, |t| {
        t.ipc_slot = core::ptr::null_mut();
        t.wake_reason
    }) {
        Some(WakeReason::Delivered(len)) => Ok(len),
        Some(WakeReason::EndpointClosed) => Err(IpcError::Closed),
        _ => Err(IpcError::Closed),
    }
}

/// Route a reply to the caller recorded on the current thread.
fn send_reply(
    current: ObjRef,
    current_proc: ObjRef,
    msg: &Message,
) -> Result<usize, IpcError> {
    let flags = cpu::disable_interrupts();
    let result = (|| {
        let caller = objects::with_thread(current, |t| {
            core::mem::replace(&mut t.reply_to, ObjRef::NULL)
        })
        .ok_or(IpcError::NoCaller)?;

        if !caller.is_valid() {
            return Err(IpcError::NoCaller);
        }
        let alive = objects::with_thread(caller, |t| t.state == ThreadState::Blocked)
            .unwrap_or(false);
        if !alive {
            // The caller died while we serviced the request.
            return Err(IpcError::NoCaller);
        }

        let caller_proc = objects::with_thread(caller, |t| t.process)
            .ok_or(IpcError::NoCaller)?;
        let new_slots =
            cap_transfer::transfer(current_proc, caller_proc, msg).map_err(IpcError::Transfer)?;

        let mut delivered = *msg;
        delivered.caps = new_slots;
        deliver_to(caller, &delivered, current, false);
        Ok(msg.header.length as usize)
    })();
    cpu::restore_interrupts(flags);
    result
}

/// Copy a message into a blocked thread's staging buffer and wake it.
///
/// When `wants_reply` is set, the target (the receiver of a call
/// request) records `from` so its later reply finds the caller.
fn deliver_to(target: ObjRef, delivered: &Message, from: ObjRef, wants_reply: bool) {
    objects::with_thread(target, |t| {
        if !t.ipc_slot.is_null() {
            // SAFETY: ipc_slot points into the blocked target's kernel
            // stack, which stays intact until it is woken here.
            unsafe { *t.ipc_slot = *delivered };
        }
        t.wake_reason = WakeReason::Delivered(delivered.header.length as usize);
        if wants_reply {
            t.reply_to = from;
        }
    });
    sched::wake(target);
}

/// What the receive path decided under the endpoint access.
enum RecvAction {
    Pending(PendingMsg),
    PullFrom(ObjRef),
    Closed,
    Block,
}

/// Receive a message from the endpoint into `buf`.
pub fn recv(
    current: ObjRef,
    current_proc: ObjRef,
    ep_ref: ObjRef,
    buf: &mut Message,
) -> Result<usize, IpcError> {
    let flags = cpu::disable_interrupts();
    let result = recv_inner(current, current_proc, ep_ref, buf);
    cpu::restore_interrupts(flags);
    result
}

fn recv_inner(
    current: ObjRef,
    current_proc: ObjRef,
    ep_ref: ObjRef,
    buf: &mut Message,
) -> Result<usize, IpcError> {
    let action = objects::with_endpoint(ep_ref, |ep| {
        if let Some(pending) = ep.pending.pop() {
            return RecvAction::Pending(pending);
        }
        if let Some(sender) = dequeue_live(&mut ep.send_queue) {
            return RecvAction::PullFrom(sender);
        }
        if ep.closed {
            return RecvAction::Closed;
        }
        RecvAction::Block
    })
    .ok_or(IpcError::Closed)?;

    match action {
        RecvAction::Closed => Err(IpcError::Closed),

        RecvAction::Pending(pending) => {
            let new_slots =
                cap_transfer::transfer(pending.sender_proc, current_proc, &pending.msg)
                    .map_err(IpcError::Transfer)?;
            *buf = pending.msg;
            buf.caps = new_slots;
            Ok(buf.header.length as usize)
        }

        RecvAction::PullFrom(sender) => {
            // Read the sender's staged message off its kernel stack.
            let staged = objects::with_thread(sender, |t| {
                let ptr = t.ipc_slot;
                if ptr.is_null() {
                    None
                } else {
                    // SAFETY: The sender is blocked on our send queue;
                    // its staging buffer lives until we wake it.
                    Some(unsafe { *ptr })
                }
            })
            .flatten()
            .ok_or(IpcError::Closed)?;

            let sender_proc = objects::with_thread(sender, |t| t.process)
                .ok_or(IpcError::Closed)?;

            match cap_transfer::transfer(sender_proc, current_proc, &staged) {
                Ok(new_slots) => {
                    *buf = staged;
                    buf.caps = new_slots;

                    if staged.header.flags.wants_reply() {
                        // Call: the sender keeps waiting for our reply.
                        objects::with_thread(current, |t| t.reply_to = sender);
                        objects::with_thread(sender, |t| {
                            t.blocked_on = ObjRef::NULL;
                            t.wake_reason = WakeReason::None;
                        });
                    } else {
                        objects::with_thread(sender, |t| {
                            t.wake_reason =
                                WakeReason::Delivered(staged.header.length as usize);
                        });
                        sched::wake(sender);
                    }
                    Ok(buf.header.length as usize)
                }
                Err(e) => {
                    // The whole message fails; the sender stays queued.
                    objects::with_endpoint(ep_ref, |ep| ep.send_queue.enqueue(sender));
                    Err(IpcError::Transfer(e))
                }
            }
        }

        RecvAction::Block => {
            objects::with_thread(current, |t| {
                t.ipc_slot = core::ptr::from_mut(buf);
                t.wake_reason = WakeReason::None;
                t.state = ThreadState::Blocked;
                t.blocked_on = ep_ref;
            });
            objects::with_endpoint(ep_ref, |ep| ep.recv_queue.enqueue(current));
            sched::schedule();

            match objects::with_thread(current, |t| {
                t.ipc_slot = core::ptr::null_mut();
                t.wake_reason
            }) {
                Some(WakeReason::Delivered(len)) => Ok(len),
                Some(WakeReason::EndpointClosed) => Err(IpcError::Closed),
                _ => Err(IpcError::Closed),
            }
        }
    }
}

/// Send a request and block for the reply, which lands in `msg`'s
/// buffer (request content is dead once delivered).
pub fn call(
    current: ObjRef,
    current_proc: ObjRef,
    ep_ref: ObjRef,
    msg: &mut Message,
) -> Result<usize, IpcError> {
    msg.header.flags = msg.header.flags.with(graphene_syscall::MessageFlags::WANTS_REPLY);
    send(current, current_proc, ep_ref, msg)
}

/// Close an endpoint: refuse all future traffic and wake every queued
/// thread with the closed error.
pub fn close(ep_ref: ObjRef) {
    let flags = cpu::disable_interrupts();
    let mut to_wake: alloc::vec::Vec<ObjRef> = alloc::vec::Vec::new();

    objects::with_endpoint(ep_ref, |ep| {
        ep.closed = true;
        ep.recv_queue.drain(|t| to_wake.push(t));
        ep.send_queue.drain(|t| to_wake.push(t));
    });

    for &t in &to_wake {
        objects::with_thread(t, |th| th.wake_reason = WakeReason::EndpointClosed);
        sched::wake(t);
    }
    cpu::restore_interrupts(flags);
}
