//! Inter-process communication
//!
//! Endpoints carry fixed-format messages between threads: synchronous
//! rendezvous with blocking FIFOs, or bounded buffering in async mode.
//! Channels pair two endpoints as partners. Messages can carry up to
//! four capabilities, transferred under the Grant right with
//! receiver-side rollback.
//!
//! Reply routing is per-thread: delivering a `wants_reply` message
//! records the caller on the receiving thread, and that thread's next
//! `is_reply` send goes straight back to the recorded caller.

pub mod cap_transfer;
pub mod channel;
pub mod endpoint;
pub mod queue;

use graphene_cap::CapError;
use graphene_syscall::SysError;

/// IPC-layer errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcError {
    /// The endpoint is closed (or vanished mid-operation).
    Closed,
    /// Async pending queue is full.
    QueueFull,
    /// Capability transfer failed; the whole message failed.
    Transfer(CapError),
    /// A reply was sent with no caller recorded.
    NoCaller,
}

impl From<IpcError> for SysError {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::Closed => Self::NotFound,
            IpcError::QueueFull => Self::WouldBlock,
            IpcError::Transfer(cap) => crate::cap::to_sys_error(cap),
            IpcError::NoCaller => Self::InvalidArgument,
        }
    }
}
