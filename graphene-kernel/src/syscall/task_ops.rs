//! Thread and process syscalls

use graphene_cap::{ObjectType, Rights};
use graphene_common::addr::PAGE_SIZE;
use graphene_syscall::{SysError, SysResult, STACK_DEFAULT};

use crate::cap;
use crate::loader;
use crate::memory::layout::{USER_STACK_SIZE, USER_STACK_TOP};
use crate::memory::translate::phys_to_virt;
use crate::objects;
use crate::sched;
use crate::task::process::ProcessFlags;
use crate::task::thread::ThreadFlags;
use crate::task::{self, TaskError};
use crate::user::buffer;
use crate::vm::RegionFlags;

use super::{cap_err, Caller};

impl From<TaskError> for SysError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::OutOfMemory => Self::OutOfMemory,
            TaskError::ThreadLimit => Self::TableFull,
            TaskError::NoSuchProcess => Self::NotFound,
        }
    }
}

/// Stack spacing between default thread stacks (top-down, one 2 MiB
/// stride per thread, guard gap included).
const STACK_STRIDE: u64 = 2 * 1024 * 1024;

/// `thread_create(entry, stack, arg)`.
///
/// `stack == STACK_DEFAULT` asks the kernel to allocate a fresh 64 KiB
/// stack below the default stack top; any other value is taken as a
/// user stack pointer the caller prepared (it must lie in user space).
pub fn thread_create(caller: Caller, entry: u64, stack: u64, arg: u64) -> SysResult {
    if !buffer::user_address_ok(entry) {
        return Err(SysError::InvalidArgument);
    }

    let user_stack = if stack == STACK_DEFAULT {
        allocate_default_stack(caller)?
    } else {
        if !buffer::user_address_ok(stack.wrapping_sub(8)) {
            return Err(SysError::InvalidArgument);
        }
        stack
    };

    let thread = task::create_thread(
        caller.proc,
        "user",
        entry,
        arg,
        user_stack,
        ThreadFlags::NONE,
    )?;

    let tid = objects::with_thread(thread, |t| t.tid).unwrap_or(0);
    Ok(i64::from(tid))
}

/// Carve a fresh default stack region for a new thread.
fn allocate_default_stack(caller: Caller) -> Result<u64, SysError> {
    // One stride per thread the process ever created keeps stacks from
    // colliding without tracking holes.
    let index = objects::with_process(caller.proc, |p| p.threads.len() as u64)
        .ok_or(SysError::InvalidSyscall)?;
    let top = USER_STACK_TOP - index * STACK_STRIDE;
    let base = top - USER_STACK_SIZE;

    objects::with_process(caller.proc, |p| {
        p.aspace.map_region_alloc(
            base,
            USER_STACK_SIZE,
            RegionFlags::READ
                .with(RegionFlags::WRITE)
                .with(RegionFlags::USER),
        )
    })
    .ok_or(SysError::InvalidSyscall)?
    .map_err(SysError::from)?;

    Ok(top)
}

/// `thread_exit(code)`: terminal.
pub fn thread_exit(code: u64) -> SysResult {
    task::exit_current_thread(code as i64)
}

/// `thread_yield`: voluntary reschedule.
pub fn thread_yield() -> SysResult {
    sched::yield_now();
    Ok(0)
}

/// `process_create(image_slot, grants_ptr, grant_count)`.
///
/// `image_slot` names a memory object (Read) holding an ELF image.
/// `grants_ptr` names an array of `grant_count` u32 slot indices in the
/// caller's table (each needs Grant); they are copied into the child's
/// first free slots. Returns the child PID.
pub fn process_create(
    caller: Caller,
    image_slot: u64,
    grants_ptr: u64,
    grant_count: u64,
) -> SysResult {
    let image_cap = cap::lookup(
        caller.proc,
        image_slot as usize,
        Some(ObjectType::Memory),
        Rights::READ,
    )
    .map_err(cap_err)?;

    let (base, length) = objects::with_memory(image_cap.obj(), |m| (m.base, m.length))
        .ok_or(SysError::InvalidCapability)?;

    if grant_count > 32 {
        return Err(SysError::InvalidArgument);
    }
    let mut grants = [0u32; 32];
    if grant_count > 0 {
        let mut raw = [0u8; 32 * 4];
        let byte_len = grant_count as usize * 4;
        objects::with_process(caller.proc, |p| {
            buffer::copy_from_user(&p.aspace, grants_ptr, &mut raw[..byte_len])
        })
        .ok_or(SysError::InvalidSyscall)??;
        for i in 0..grant_count as usize {
            grants[i] = u32::from_le_bytes([
                raw[i * 4],
                raw[i * 4 + 1],
                raw[i * 4 + 2],
                raw[i * 4 + 3],
            ]);
        }
    }

    // The image is physical memory reachable through the direct map.
    // SAFETY: The memory object's range was established at object
    // creation and is not handed out as kernel heap.
    let image = unsafe {
        core::slice::from_raw_parts(phys_to_virt(base).as_ptr::<u8>(), length as usize)
    };

    let child = task::create_process("user", caller.proc, ProcessFlags::NONE)?;

    let loaded = match objects::with_process(child, |p| loader::load_elf(&mut p.aspace, image))
        .ok_or(SysError::InvalidSyscall)?
    {
        Ok(l) => l,
        Err(e) => {
            task::destroy_process(child, -1);
            return Err(e.into());
        }
    };

    // Grant the requested capabilities before the first thread runs.
    for &g in grants.iter().take(grant_count as usize) {
        let slot = cap::lookup(caller.proc, g as usize, None, Rights::GRANT)
            .map_err(cap_err)?;
        cap::install_existing(child, slot.obj(), slot.rights()).map_err(cap_err)?;
    }

    // Default stack + main thread.
    let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
    objects::with_process(child, |p| {
        p.aspace.map_region_alloc(
            stack_base,
            USER_STACK_SIZE,
            RegionFlags::READ
                .with(RegionFlags::WRITE)
                .with(RegionFlags::USER),
        )
    })
    .ok_or(SysError::InvalidSyscall)?
    .map_err(SysError::from)?;

    task::create_thread(
        child,
        "main",
        loaded.entry,
        0,
        USER_STACK_TOP,
        ThreadFlags::NONE,
    )?;

    let pid = objects::with_process(child, |p| p.pid).unwrap_or(0);
    Ok(i64::from(pid))
}

/// `process_exit(code)`: terminal.
pub fn process_exit(code: u64) -> SysResult {
    task::exit_current_process(code as i64)
}

const _: () = assert!(USER_STACK_SIZE % PAGE_SIZE == 0);
const _: () = assert!(STACK_STRIDE > USER_STACK_SIZE);
