//! Capability-management syscalls

use graphene_cap::{ObjectType, Rights};
use graphene_syscall::SysResult;

use crate::cap;
use crate::ipc::endpoint;
use crate::irq;
use crate::objects;

use super::{cap_err, Caller};

/// `cap_copy(src, dst, mask)`: duplicate with reduced rights.
pub fn cap_copy(caller: Caller, src: u64, dst: u64, mask: u64) -> SysResult {
    let mask = Rights::from_bits(mask as u8);
    cap::copy(caller.proc, src as usize, dst as usize, mask).map_err(cap_err)?;
    Ok(0)
}

/// `cap_delete(slot)`: unref the object and clear the slot.
pub fn cap_delete(caller: Caller, slot: u64) -> SysResult {
    cap::delete(caller.proc, slot as usize).map_err(cap_err)?;
    Ok(0)
}

/// `cap_revoke(slot)`: invalidate the object itself.
///
/// Endpoint waiters are woken with the closed error and IRQ lines are
/// released before the generation bump, so nothing sleeps on a dead
/// object.
pub fn cap_revoke(caller: Caller, slot: u64) -> SysResult {
    let slot_index = slot as usize;
    let target = cap::lookup(caller.proc, slot_index, None, Rights::NONE).map_err(cap_err)?;

    match target.otype() {
        ObjectType::IpcEndpoint => endpoint::close(target.obj()),
        ObjectType::IpcChannel => crate::ipc::channel::close(target.obj()),
        ObjectType::Irq => {
            if let Some(line) = objects::with_irq(target.obj(), |i| i.line) {
                irq::unregister_line(line);
            }
        }
        _ => {}
    }

    cap::revoke(caller.proc, slot_index).map_err(cap_err)?;
    Ok(0)
}

/// `cap_info(slot)`: `(type_tag << 8) | rights_bits`, validated
/// against the live object.
pub fn cap_info(caller: Caller, slot: u64) -> SysResult {
    let (otype, rights) = cap::info(caller.proc, slot as usize).map_err(cap_err)?;
    Ok(((otype as i64) << 8) | rights.bits() as i64)
}
