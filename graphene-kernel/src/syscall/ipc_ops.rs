//! IPC syscalls: `cap_send`, `cap_recv`, `cap_call`
//!
//! User buffers come in two shapes, disambiguated by length: a raw
//! payload of up to 256 bytes (the kernel builds a default header, no
//! capability transfer), or a full wire [`Message`] of exactly
//! `size_of::<Message>()` bytes (tag, flags, grant mask, capability
//! slots all caller-controlled). The two sizes cannot collide.

use graphene_cap::{ObjectType, Rights};
use graphene_syscall::{Message, SysError, SysResult, MSG_MAX_PAYLOAD};

use crate::cap;
use crate::ipc::endpoint;
use crate::objects;
use crate::user::buffer::{copy_from_user, copy_to_user, read_user_struct, write_user_struct};

use super::{cap_err, Caller};

const WIRE_SIZE: usize = core::mem::size_of::<Message>();

/// Read a message from user space in either shape.
fn read_message(caller: Caller, buf: u64, len: u64) -> Result<Message, SysError> {
    let len = len as usize;
    if len == WIRE_SIZE {
        let msg: Message = objects::with_process(caller.proc, |p| {
            read_user_struct::<Message>(&p.aspace, buf)
        })
        .ok_or(SysError::InvalidSyscall)??;
        if !msg.is_well_formed() {
            return Err(SysError::InvalidArgument);
        }
        return Ok(msg);
    }
    if len <= MSG_MAX_PAYLOAD {
        let mut msg = Message::empty();
        objects::with_process(caller.proc, |p| {
            copy_from_user(&p.aspace, buf, &mut msg.payload[..len])
        })
        .ok_or(SysError::InvalidSyscall)??;
        msg.header.length = len as u16;
        return Ok(msg);
    }
    Err(SysError::InvalidArgument)
}

/// Write a delivered message back to user space in the shape the
/// caller asked for. Returns the payload length.
fn write_message(caller: Caller, buf: u64, len: u64, msg: &Message) -> SysResult {
    let len = len as usize;
    let payload_len = msg.header.length as usize;

    if len == WIRE_SIZE {
        objects::with_process(caller.proc, |p| {
            write_user_struct(&p.aspace, buf, msg)
        })
        .ok_or(SysError::InvalidSyscall)??;
        return Ok(payload_len as i64);
    }
    if len <= MSG_MAX_PAYLOAD {
        let n = payload_len.min(len);
        objects::with_process(caller.proc, |p| {
            copy_to_user(&p.aspace, buf, &msg.payload[..n])
        })
        .ok_or(SysError::InvalidSyscall)??;
        return Ok(n as i64);
    }
    Err(SysError::InvalidArgument)
}

/// `cap_send(slot, buf, len)`: requires endpoint · Send.
pub fn cap_send(caller: Caller, slot: u64, buf: u64, len: u64) -> SysResult {
    let ep_slot = cap::lookup(
        caller.proc,
        slot as usize,
        Some(ObjectType::IpcEndpoint),
        Rights::SEND,
    )
    .map_err(cap_err)?;

    let mut msg = read_message(caller, buf, len)?;
    let delivered = endpoint::send(caller.thread, caller.proc, ep_slot.obj(), &mut msg)?;
    Ok(delivered as i64)
}

/// `cap_recv(slot, buf, len)`: requires endpoint · Handle.
pub fn cap_recv(caller: Caller, slot: u64, buf: u64, len: u64) -> SysResult {
    let ep_slot = cap::lookup(
        caller.proc,
        slot as usize,
        Some(ObjectType::IpcEndpoint),
        Rights::HANDLE,
    )
    .map_err(cap_err)?;

    // Pre-validate the destination before blocking: failing after a
    // rendezvous would lose the message.
    let len_usize = len as usize;
    if len_usize != WIRE_SIZE && len_usize > MSG_MAX_PAYLOAD {
        return Err(SysError::InvalidArgument);
    }
    objects::with_process(caller.proc, |p| {
        crate::user::buffer::validate(&p.aspace, buf, len_usize, true)
    })
    .ok_or(SysError::InvalidSyscall)??;

    let mut msg = Message::empty();
    endpoint::recv(caller.thread, caller.proc, ep_slot.obj(), &mut msg)?;
    write_message(caller, buf, len, &msg)
}

/// `cap_call(slot, msg, len, reply, rlen)`: requires endpoint · Send.
pub fn cap_call(
    caller: Caller,
    slot: u64,
    msg_buf: u64,
    msg_len: u64,
    reply_buf: u64,
    reply_len: u64,
) -> SysResult {
    let ep_slot = cap::lookup(
        caller.proc,
        slot as usize,
        Some(ObjectType::IpcEndpoint),
        Rights::SEND,
    )
    .map_err(cap_err)?;

    let rlen = reply_len as usize;
    if rlen != WIRE_SIZE && rlen > MSG_MAX_PAYLOAD {
        return Err(SysError::InvalidArgument);
    }
    objects::with_process(caller.proc, |p| {
        crate::user::buffer::validate(&p.aspace, reply_buf, rlen, true)
    })
    .ok_or(SysError::InvalidSyscall)??;

    let mut msg = read_message(caller, msg_buf, msg_len)?;
    endpoint::call(caller.thread, caller.proc, ep_slot.obj(), &mut msg)?;

    // `msg` now holds the reply.
    write_message(caller, reply_buf, reply_len, &msg)
}
