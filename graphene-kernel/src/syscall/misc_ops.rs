//! Diagnostics syscalls: `debug_print`, `process_info`

use graphene_syscall::numbers::process_info;
use graphene_syscall::{SysError, SysResult};

use crate::objects;
use crate::user::buffer::copy_from_user;

use super::Caller;

/// Longest single `debug_print`.
const MAX_DEBUG_PRINT: usize = 1024;

/// `debug_print(buf, len)`: copy user bytes and write them to the
/// kernel console. Any byte outside the user range fails the whole
/// call with `invalid_argument` before anything is copied.
pub fn debug_print(caller: Caller, buf: u64, len: u64) -> SysResult {
    let len = len as usize;
    if len > MAX_DEBUG_PRINT {
        return Err(SysError::InvalidArgument);
    }
    if len == 0 {
        return Ok(0);
    }

    let mut bytes = [0u8; MAX_DEBUG_PRINT];
    objects::with_process(caller.proc, |p| {
        copy_from_user(&p.aspace, buf, &mut bytes[..len])
    })
    .ok_or(SysError::InvalidSyscall)??;

    let text = core::str::from_utf8(&bytes[..len]).unwrap_or("<non-utf8>");
    let pid = objects::with_process(caller.proc, |p| p.pid).unwrap_or(0);
    log::info!("[pid {}] {}", pid, text.trim_end_matches('\n'));
    Ok(len as i64)
}

/// `process_info(what)`: small lookups about the caller.
pub fn process_info(caller: Caller, what: u64) -> SysResult {
    let value = objects::with_process(caller.proc, |p| match what {
        process_info::PID => Some(i64::from(p.pid)),
        process_info::PARENT_PID => Some(i64::from(
            objects::with_process(p.parent, |parent| parent.pid).unwrap_or(0),
        )),
        process_info::THREAD_COUNT => Some(p.threads.len() as i64),
        process_info::FREE_CAP_SLOTS => Some(i64::from(p.cap_table.free_count())),
        _ => None,
    })
    .ok_or(SysError::InvalidSyscall)?;

    value.ok_or(SysError::InvalidArgument)
}
