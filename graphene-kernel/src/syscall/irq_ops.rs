//! IRQ syscalls: `irq_wait`, `irq_ack`
//!
//! Both require an IRQ capability with Handle rights. The timer line is
//! scheduler-owned; no IRQ object ever exists for it, so user space
//! cannot reach it through this path.

use graphene_cap::{ObjectType, Rights};
use graphene_syscall::SysResult;

use crate::cap;
use crate::irq;

use super::{cap_err, Caller};

/// `irq_wait(slot)`: consume one pending event or block until the
/// line fires. Returns the events still pending.
pub fn irq_wait(caller: Caller, slot: u64) -> SysResult {
    let irq_slot = cap::lookup(
        caller.proc,
        slot as usize,
        Some(ObjectType::Irq),
        Rights::HANDLE,
    )
    .map_err(cap_err)?;

    let remaining = irq::irq_wait(caller.thread, irq_slot.obj())?;
    Ok(i64::from(remaining))
}

/// `irq_ack(slot)`: re-enable the line on the active controller.
pub fn irq_ack(caller: Caller, slot: u64) -> SysResult {
    let irq_slot = cap::lookup(
        caller.proc,
        slot as usize,
        Some(ObjectType::Irq),
        Rights::HANDLE,
    )
    .map_err(cap_err)?;

    irq::irq_ack(irq_slot.obj())?;
    Ok(0)
}
