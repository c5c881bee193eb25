//! Memory syscalls: `mem_map`, `mem_unmap`
//!
//! Mapping a memory object requires holding the matching rights on the
//! capability: a writable mapping needs Write, an executable one needs
//! Execute. W^X is enforced by the address-space manager and surfaces
//! as `permission_denied`; no region is created on failure.

use graphene_cap::{ObjectType, Rights};
use graphene_common::addr::PAGE_SIZE;
use graphene_syscall::{mem, SysError, SysResult};

use crate::cap;
use crate::objects;
use crate::vm::RegionFlags;

use super::{cap_err, Caller};

/// `mem_map(slot, vaddr, size, flags)`.
pub fn mem_map(caller: Caller, slot: u64, vaddr: u64, size: u64, flags: u64) -> SysResult {
    if size == 0 || vaddr % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 {
        return Err(SysError::InvalidArgument);
    }

    // Required capability rights mirror the requested mapping.
    let mut required = Rights::NONE;
    let mut region_flags = RegionFlags::USER.with(RegionFlags::SHARED);
    if flags & mem::READ != 0 {
        required = required.union(Rights::READ);
        region_flags = region_flags.with(RegionFlags::READ);
    }
    if flags & mem::WRITE != 0 {
        required = required.union(Rights::WRITE);
        region_flags = region_flags.with(RegionFlags::WRITE);
    }
    if flags & mem::EXECUTE != 0 {
        required = required.union(Rights::EXECUTE);
        region_flags = region_flags.with(RegionFlags::EXECUTE);
    }
    if required.is_empty() {
        return Err(SysError::InvalidArgument);
    }

    let mem_slot = cap::lookup(
        caller.proc,
        slot as usize,
        Some(ObjectType::Memory),
        required,
    )
    .map_err(cap_err)?;

    let (base, length) = objects::with_memory(mem_slot.obj(), |m| (m.base, m.length))
        .ok_or(SysError::InvalidCapability)?;

    if size > length {
        return Err(SysError::InvalidArgument);
    }

    objects::with_process(caller.proc, |p| {
        p.aspace.map_region(vaddr, base, size, region_flags)
    })
    .ok_or(SysError::InvalidSyscall)?
    .map_err(SysError::from)?;

    objects::with_memory(mem_slot.obj(), |m| m.mapping_count += 1);
    Ok(0)
}

/// `mem_unmap(vaddr, size)`.
///
/// The range must name an existing region exactly; shared backing
/// frames (memory-object mappings) are left alive.
pub fn mem_unmap(caller: Caller, vaddr: u64, size: u64) -> SysResult {
    let matches = objects::with_process(caller.proc, |p| {
        p.aspace
            .region_at(vaddr)
            .map(|r| r.start == vaddr && r.size == size)
            .unwrap_or(false)
    })
    .ok_or(SysError::InvalidSyscall)?;
    if !matches {
        return Err(SysError::InvalidArgument);
    }

    objects::with_process(caller.proc, |p| p.aspace.unmap_region(vaddr))
        .ok_or(SysError::InvalidSyscall)?
        .map_err(SysError::from)?;
    Ok(0)
}
