//! Process control blocks
//!
//! A process owns its address space and its capability table (1:1
//! each), holds up to 64 threads, and links weakly to its parent.
//! Destroying the process destroys both owned structures; children are
//! reparented to the kernel process (PID 0).

use alloc::boxed::Box;
use alloc::vec::Vec;

use graphene_cap::{CapTable, ObjRef};

use crate::vm::AddressSpace;

/// Maximum threads per process.
pub const MAX_THREADS_PER_PROCESS: usize = 64;

/// Process lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    /// Has schedulable threads.
    Running,
    /// Suspended (no thread runs until resumed).
    Stopped,
    /// Terminated; awaiting reaping.
    Zombie,
}

/// Process flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ProcessFlags(u8);

impl ProcessFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The kernel process (PID 0).
    pub const KERNEL: Self = Self(1 << 0);
    /// The initial user process.
    pub const INIT: Self = Self(1 << 1);
    /// A device-driver process.
    pub const DRIVER: Self = Self(1 << 2);

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Process control block.
pub struct Process {
    /// Process id.
    pub pid: u32,
    /// Name (≤ 32 bytes).
    pub name: [u8; 32],
    /// Lifecycle state.
    pub state: ProcessState,
    /// Exit code recorded at termination.
    pub exit_code: i64,
    /// Flag bits.
    pub flags: ProcessFlags,
    /// Owned address space.
    pub aspace: AddressSpace,
    /// Owned capability table.
    pub cap_table: Box<CapTable>,
    /// Thread objects belonging to this process (each holds one ref).
    pub threads: Vec<ObjRef>,
    /// Parent process (weak).
    pub parent: ObjRef,
    /// Child processes.
    pub children: Vec<ObjRef>,
}

impl Process {
    /// Build a control block around an existing address space.
    #[must_use]
    pub fn new(pid: u32, name: &str, aspace: AddressSpace, parent: ObjRef, flags: ProcessFlags) -> Self {
        let mut name_buf = [0u8; 32];
        let len = name.len().min(32);
        name_buf[..len].copy_from_slice(&name.as_bytes()[..len]);

        Self {
            pid,
            name: name_buf,
            state: ProcessState::Running,
            exit_code: 0,
            flags,
            aspace,
            cap_table: Box::new(CapTable::new()),
            threads: Vec::new(),
            parent,
            children: Vec::new(),
        }
    }

    /// Name as a str.
    #[must_use]
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(32);
        core::str::from_utf8(&self.name[..len]).unwrap_or("<process>")
    }

    /// Whether another thread can be added.
    #[must_use]
    pub fn can_add_thread(&self) -> bool {
        self.threads.len() < MAX_THREADS_PER_PROCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction() {
        let p = Process::new(
            7,
            "module-shell",
            AddressSpace::kernel_space(),
            ObjRef::NULL,
            ProcessFlags::DRIVER,
        );
        assert_eq!(p.pid, 7);
        assert_eq!(p.name_str(), "module-shell");
        assert_eq!(p.state, ProcessState::Running);
        assert!(p.can_add_thread());
        assert_eq!(p.cap_table.used_count(), 0);
    }

    #[test]
    fn test_name_truncated_at_32() {
        let long = "a-name-well-beyond-thirty-two-bytes-long";
        let p = Process::new(
            1,
            long,
            AddressSpace::kernel_space(),
            ObjRef::NULL,
            ProcessFlags::NONE,
        );
        assert_eq!(p.name_str().len(), 32);
    }
}
