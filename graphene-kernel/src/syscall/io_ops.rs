//! I/O-port syscalls
//!
//! The capability names a port range; the requested port (including its
//! full access width) must fall inside it, or the call fails with
//! `permission_denied` before any port instruction executes.

use graphene_arch::port::{in_port, out_port, PortWidth};
use graphene_cap::{ObjectType, Rights};
use graphene_syscall::{SysError, SysResult};

use crate::cap;
use crate::objects;

use super::{cap_err, Caller};

fn range_check(caller: Caller, slot: u64, port: u64, width: PortWidth, right: Rights) -> Result<(), SysError> {
    let io_slot = cap::lookup(
        caller.proc,
        slot as usize,
        Some(ObjectType::IoPort),
        right,
    )
    .map_err(cap_err)?;

    if port > u64::from(u16::MAX) {
        return Err(SysError::InvalidArgument);
    }
    let port = port as u16;
    let last = port as u32 + width as u32 - 1;

    let in_range = objects::with_ioport(io_slot.obj(), |r| {
        r.covers(port) && last <= u32::from(u16::MAX) && r.covers(last as u16)
    })
    .unwrap_or(false);

    if !in_range {
        return Err(SysError::PermissionDenied);
    }
    Ok(())
}

/// `io_port_read(slot, port, width)`.
pub fn io_port_read(caller: Caller, slot: u64, port: u64, width: u64) -> SysResult {
    let width = PortWidth::from_raw(width).ok_or(SysError::InvalidArgument)?;
    range_check(caller, slot, port, width, Rights::READ)?;

    // SAFETY: The capability authorises this exact range.
    let value = unsafe { in_port(port as u16, width) };
    Ok(i64::from(value))
}

/// `io_port_write(slot, port, val, width)`.
pub fn io_port_write(caller: Caller, slot: u64, port: u64, value: u64, width: u64) -> SysResult {
    let width = PortWidth::from_raw(width).ok_or(SysError::InvalidArgument)?;
    range_check(caller, slot, port, width, Rights::WRITE)?;

    // SAFETY: The capability authorises this exact range.
    unsafe { out_port(port as u16, value as u32, width) };
    Ok(0)
}
