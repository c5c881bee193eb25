//! User-buffer validation and copy
//!
//! Every syscall that touches user memory validates first: the range
//! must be non-wrapping, inside `[USER_BASE, USER_TOP]`, and every page
//! mapped (writable when the kernel will write). The copies then go
//! page by page through the higher-half direct map, so they work
//! regardless of which address space is live.

use graphene_common::addr::PAGE_SIZE;
use graphene_paging::PageFlags;
use graphene_syscall::SysError;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes};

use crate::memory::layout::user_range_ok;
use crate::memory::translate::phys_to_virt;
use crate::vm::AddressSpace;

/// Validate a user range.
///
/// Zero-length ranges are accepted without touching the tables.
pub fn validate(
    space: &AddressSpace,
    ptr: u64,
    len: usize,
    needs_write: bool,
) -> Result<(), SysError> {
    if len == 0 {
        return Ok(());
    }
    if !user_range_ok(ptr, len as u64) {
        return Err(SysError::InvalidArgument);
    }

    let first_page = ptr & !(PAGE_SIZE - 1);
    let last_page = (ptr + len as u64 - 1) & !(PAGE_SIZE - 1);
    let mut page = first_page;
    loop {
        let flags = space
            .page_flags_at(page)
            .ok_or(SysError::InvalidArgument)?;
        if !flags.contains(PageFlags::USER) {
            return Err(SysError::InvalidArgument);
        }
        if needs_write && !flags.is_writable() {
            return Err(SysError::InvalidArgument);
        }
        if page == last_page {
            break;
        }
        page += PAGE_SIZE;
    }
    Ok(())
}

/// Copy `dst.len()` bytes from user memory at `ptr` into `dst`.
pub fn copy_from_user(space: &AddressSpace, ptr: u64, dst: &mut [u8]) -> Result<(), SysError> {
    validate(space, ptr, dst.len(), false)?;

    let mut copied = 0;
    while copied < dst.len() {
        let va = ptr + copied as u64;
        let page_rest = (PAGE_SIZE - (va & (PAGE_SIZE - 1))) as usize;
        let chunk = page_rest.min(dst.len() - copied);

        let phys = space.translate(va).ok_or(SysError::InvalidArgument)?;
        let src = phys_to_virt(phys);
        // SAFETY: `phys` came from a validated, mapped user page; the
        // direct map covers all RAM.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src.as_ptr::<u8>(),
                dst[copied..].as_mut_ptr(),
                chunk,
            );
        }
        copied += chunk;
    }
    Ok(())
}

/// Copy `src` into user memory at `ptr`.
pub fn copy_to_user(space: &AddressSpace, ptr: u64, src: &[u8]) -> Result<(), SysError> {
    validate(space, ptr, src.len(), true)?;

    let mut copied = 0;
    while copied < src.len() {
        let va = ptr + copied as u64;
        let page_rest = (PAGE_SIZE - (va & (PAGE_SIZE - 1))) as usize;
        let chunk = page_rest.min(src.len() - copied);

        let phys = space.translate(va).ok_or(SysError::InvalidArgument)?;
        let dst = phys_to_virt(phys);
        // SAFETY: Validated writable user page behind the direct map.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src[copied..].as_ptr(),
                dst.as_mut_ptr::<u8>(),
                chunk,
            );
        }
        copied += chunk;
    }
    Ok(())
}

/// Copy a `T` out of user memory (byte-wise; `T` must tolerate any bit
/// pattern, which the message types guarantee via `zerocopy`).
pub fn read_user_struct<T: FromBytes + IntoBytes>(
    space: &AddressSpace,
    ptr: u64,
) -> Result<T, SysError> {
    let mut value: T = FromZeros::new_zeroed();
    copy_from_user(space, ptr, value.as_mut_bytes())?;
    Ok(value)
}

/// Copy a `T` into user memory.
pub fn write_user_struct<T: IntoBytes + Immutable>(
    space: &AddressSpace,
    ptr: u64,
    value: &T,
) -> Result<(), SysError> {
    copy_to_user(space, ptr, value.as_bytes())
}

/// Address check used before entering user mode.
#[must_use]
pub fn user_address_ok(addr: u64) -> bool {
    user_range_ok(addr, 1)
}
