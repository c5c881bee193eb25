//! Userspace invocation stubs
//!
//! Thin wrappers around `int 0x80` for client code. The kernel never
//! uses these; they exist so user programs and driver services share one
//! definition of the register convention.

#![allow(clippy::missing_safety_doc)]

use crate::error::SysError;
use crate::numbers::Syscall;

/// Raw syscall with no arguments.
///
/// # Safety
///
/// The caller must uphold the contract of the specific request.
#[cfg(target_arch = "x86_64")]
#[inline]
pub unsafe fn syscall0(num: Syscall) -> i64 {
    let ret: i64;
    unsafe {
        core::arch::asm!(
            "int 0x80",
            inlateout("rax") num as u64 => ret,
            options(nostack),
        );
    }
    ret
}

/// Raw syscall with up to three arguments.
///
/// # Safety
///
/// The caller must uphold the contract of the specific request.
#[cfg(target_arch = "x86_64")]
#[inline]
pub unsafe fn syscall3(num: Syscall, a0: u64, a1: u64, a2: u64) -> i64 {
    let ret: i64;
    unsafe {
        core::arch::asm!(
            "int 0x80",
            inlateout("rax") num as u64 => ret,
            in("rdi") a0,
            in("rsi") a1,
            in("rdx") a2,
            options(nostack),
        );
    }
    ret
}

/// Raw syscall with up to six arguments.
///
/// # Safety
///
/// The caller must uphold the contract of the specific request.
#[cfg(target_arch = "x86_64")]
#[inline]
pub unsafe fn syscall6(num: Syscall, a0: u64, a1: u64, a2: u64, a3: u64, a4: u64, a5: u64) -> i64 {
    let ret: i64;
    unsafe {
        core::arch::asm!(
            "int 0x80",
            inlateout("rax") num as u64 => ret,
            in("rdi") a0,
            in("rsi") a1,
            in("rdx") a2,
            in("r10") a3,
            in("r8") a4,
            in("r9") a5,
            options(nostack),
        );
    }
    ret
}

/// Interpret a raw return value.
#[inline]
pub fn check(ret: i64) -> Result<i64, SysError> {
    if ret >= 0 {
        Ok(ret)
    } else {
        Err(SysError::from_return(ret).unwrap_or(SysError::InvalidSyscall))
    }
}

#[cfg(target_arch = "x86_64")]
mod wrappers {
    use super::{check, syscall0, syscall3, syscall6, SysError, Syscall};
    use crate::message::Message;

    /// Send a message to the endpoint capability in `slot`.
    pub fn cap_send(slot: u32, buf: &Message) -> Result<i64, SysError> {
        check(unsafe {
            syscall3(
                Syscall::CapSend,
                slot as u64,
                buf as *const Message as u64,
                core::mem::size_of::<Message>() as u64,
            )
        })
    }

    /// Receive a message from the endpoint capability in `slot`.
    pub fn cap_recv(slot: u32, buf: &mut Message) -> Result<i64, SysError> {
        check(unsafe {
            syscall3(
                Syscall::CapRecv,
                slot as u64,
                buf as *mut Message as u64,
                core::mem::size_of::<Message>() as u64,
            )
        })
    }

    /// Send a message and block for the reply.
    pub fn cap_call(slot: u32, msg: &Message, reply: &mut Message) -> Result<i64, SysError> {
        check(unsafe {
            syscall6(
                Syscall::CapCall,
                slot as u64,
                msg as *const Message as u64,
                core::mem::size_of::<Message>() as u64,
                reply as *mut Message as u64,
                core::mem::size_of::<Message>() as u64,
                0,
            )
        })
    }

    /// Duplicate `src` into `dst` with rights reduced by `mask`.
    pub fn cap_copy(src: u32, dst: u32, mask: u8) -> Result<i64, SysError> {
        check(unsafe { syscall3(Syscall::CapCopy, src as u64, dst as u64, mask as u64) })
    }

    /// Voluntarily give up the CPU.
    pub fn thread_yield() {
        let _ = unsafe { syscall0(Syscall::ThreadYield) };
    }

    /// Terminate the current thread.
    pub fn thread_exit(code: i64) -> ! {
        let _ = unsafe { syscall3(Syscall::ThreadExit, code as u64, 0, 0) };
        // The kernel never returns from thread_exit.
        loop {
            core::hint::spin_loop();
        }
    }

    /// Write bytes to the kernel console.
    pub fn debug_print(bytes: &[u8]) -> Result<i64, SysError> {
        check(unsafe {
            syscall3(
                Syscall::DebugPrint,
                bytes.as_ptr() as u64,
                bytes.len() as u64,
                0,
            )
        })
    }
}

#[cfg(target_arch = "x86_64")]
pub use wrappers::*;
