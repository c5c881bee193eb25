//! Syscall numbers
//!
//! The closed request set. Low numbers are the high-frequency IPC
//! operations; capability management, memory, thread/process lifecycle,
//! IRQ delivery, and diagnostics follow.

/// Syscall request numbers.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    /// Send a message to an endpoint (blocks if no receiver).
    CapSend = 0,
    /// Receive a message from an endpoint (blocks if no sender).
    CapRecv = 1,
    /// Send and await the reply.
    CapCall = 2,
    /// Duplicate a capability with reduced rights.
    CapCopy = 3,
    /// Remove a capability from a slot.
    CapDelete = 4,
    /// Invalidate the object a capability refers to.
    CapRevoke = 5,
    /// Map a memory object into the caller's address space.
    MemMap = 6,
    /// Unmap a user region.
    MemUnmap = 7,
    /// Create a thread in the current process.
    ThreadCreate = 8,
    /// Terminate the current thread.
    ThreadExit = 9,
    /// Voluntarily reschedule.
    ThreadYield = 10,
    /// Create a process from an ELF image.
    ProcessCreate = 11,
    /// Terminate the current process.
    ProcessExit = 12,
    /// Block until the IRQ fires.
    IrqWait = 13,
    /// Acknowledge an IRQ and re-enable the line.
    IrqAck = 14,
    /// Write to the kernel console.
    DebugPrint = 15,
    /// Query a capability's type and rights.
    CapInfo = 16,
    /// Query process information.
    ProcessInfo = 17,
    /// Read from an I/O port.
    IoPortRead = 18,
    /// Write to an I/O port.
    IoPortWrite = 19,
}

impl Syscall {
    /// Decode a raw request number.
    #[must_use]
    pub const fn from_number(num: u64) -> Option<Self> {
        Some(match num {
            0 => Self::CapSend,
            1 => Self::CapRecv,
            2 => Self::CapCall,
            3 => Self::CapCopy,
            4 => Self::CapDelete,
            5 => Self::CapRevoke,
            6 => Self::MemMap,
            7 => Self::MemUnmap,
            8 => Self::ThreadCreate,
            9 => Self::ThreadExit,
            10 => Self::ThreadYield,
            11 => Self::ProcessCreate,
            12 => Self::ProcessExit,
            13 => Self::IrqWait,
            14 => Self::IrqAck,
            15 => Self::DebugPrint,
            16 => Self::CapInfo,
            17 => Self::ProcessInfo,
            18 => Self::IoPortRead,
            19 => Self::IoPortWrite,
            _ => return None,
        })
    }

    /// Get the request name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CapSend => "cap_send",
            Self::CapRecv => "cap_recv",
            Self::CapCall => "cap_call",
            Self::CapCopy => "cap_copy",
            Self::CapDelete => "cap_delete",
            Self::CapRevoke => "cap_revoke",
            Self::MemMap => "mem_map",
            Self::MemUnmap => "mem_unmap",
            Self::ThreadCreate => "thread_create",
            Self::ThreadExit => "thread_exit",
            Self::ThreadYield => "thread_yield",
            Self::ProcessCreate => "process_create",
            Self::ProcessExit => "process_exit",
            Self::IrqWait => "irq_wait",
            Self::IrqAck => "irq_ack",
            Self::DebugPrint => "debug_print",
            Self::CapInfo => "cap_info",
            Self::ProcessInfo => "process_info",
            Self::IoPortRead => "io_port_read",
            Self::IoPortWrite => "io_port_write",
        }
    }
}

/// Selectors for [`Syscall::ProcessInfo`].
pub mod process_info {
    /// The caller's PID.
    pub const PID: u64 = 0;
    /// The caller's parent PID.
    pub const PARENT_PID: u64 = 1;
    /// Number of live threads in the caller.
    pub const THREAD_COUNT: u64 = 2;
    /// Free capability slots in the caller's table.
    pub const FREE_CAP_SLOTS: u64 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for n in 0..20u64 {
            let sc = Syscall::from_number(n).expect("number in the closed set");
            assert_eq!(sc as u64, n);
        }
        assert_eq!(Syscall::from_number(20), None);
        assert_eq!(Syscall::from_number(u64::MAX), None);
    }

    #[test]
    fn test_fixed_numbers() {
        assert_eq!(Syscall::CapSend as u64, 0);
        assert_eq!(Syscall::MemMap as u64, 6);
        assert_eq!(Syscall::DebugPrint as u64, 15);
        assert_eq!(Syscall::IoPortWrite as u64, 19);
    }
}
