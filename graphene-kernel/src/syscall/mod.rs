//! Syscall dispatch
//!
//! A numeric switch over the closed request set. Each handler resolves
//! the current process and capability table, validates any user
//! buffers, looks up the referenced capabilities with the required type
//! and rights, invokes the underlying subsystem, and translates the
//! component error into the stable ABI enumeration exactly once, here.

pub mod cap_ops;
pub mod io_ops;
pub mod ipc_ops;
pub mod irq_ops;
pub mod mem_ops;
pub mod misc_ops;
pub mod task_ops;

use graphene_arch::trap::TrapFrame;
use graphene_cap::ObjRef;
use graphene_syscall::error::to_return_value;
use graphene_syscall::{SysError, SysResult, Syscall};

use crate::sched;
use crate::task::thread::ThreadFlags;
use crate::objects;

/// Install the dispatcher on the syscall vector's entry path.
pub fn init() {
    graphene_arch::trap::set_syscall_handler(dispatch);
    log::info!("syscall dispatcher installed (vector {:#x})", graphene_syscall::SYSCALL_VECTOR);
}

/// Caller identity resolved once per syscall.
#[derive(Clone, Copy)]
pub struct Caller {
    /// Calling thread.
    pub thread: ObjRef,
    /// Its process (owner of the capability table and address space).
    pub proc: ObjRef,
}

fn current_caller() -> Option<Caller> {
    let thread = sched::current_thread();
    if !thread.is_valid() {
        return None;
    }
    let proc = objects::with_thread(thread, |t| t.process)?;
    proc.is_valid().then_some(Caller { thread, proc })
}

/// Entry from the trap stub: decode, route, write the result back.
fn dispatch(frame: &mut TrapFrame) {
    let num = frame.syscall_number();
    let args = frame.syscall_args();

    let result = match Syscall::from_number(num) {
        None => {
            log::debug!("invalid syscall number {}", num);
            Err(SysError::InvalidSyscall)
        }
        Some(sc) => {
            let caller = current_caller();
            match caller {
                None => Err(SysError::InvalidSyscall),
                Some(caller) => {
                    objects::with_thread(caller.thread, |t| {
                        t.flags.set(ThreadFlags::IN_SYSCALL)
                    });
                    let r = route(sc, caller, &args);
                    objects::with_thread(caller.thread, |t| {
                        t.flags.clear(ThreadFlags::IN_SYSCALL)
                    });
                    r
                }
            }
        }
    };

    frame.set_result(to_return_value(result));
}

fn route(sc: Syscall, caller: Caller, args: &[u64; 6]) -> SysResult {
    match sc {
        Syscall::CapSend => ipc_ops::cap_send(caller, args[0], args[1], args[2]),
        Syscall::CapRecv => ipc_ops::cap_recv(caller, args[0], args[1], args[2]),
        Syscall::CapCall => {
            ipc_ops::cap_call(caller, args[0], args[1], args[2], args[3], args[4])
        }
        Syscall::CapCopy => cap_ops::cap_copy(caller, args[0], args[1], args[2]),
        Syscall::CapDelete => cap_ops::cap_delete(caller, args[0]),
        Syscall::CapRevoke => cap_ops::cap_revoke(caller, args[0]),
        Syscall::MemMap => mem_ops::mem_map(caller, args[0], args[1], args[2], args[3]),
        Syscall::MemUnmap => mem_ops::mem_unmap(caller, args[0], args[1]),
        Syscall::ThreadCreate => task_ops::thread_create(caller, args[0], args[1], args[2]),
        Syscall::ThreadExit => task_ops::thread_exit(args[0]),
        Syscall::ThreadYield => task_ops::thread_yield(),
        Syscall::ProcessCreate => {
            task_ops::process_create(caller, args[0], args[1], args[2])
        }
        Syscall::ProcessExit => task_ops::process_exit(args[0]),
        Syscall::IrqWait => irq_ops::irq_wait(caller, args[0]),
        Syscall::IrqAck => irq_ops::irq_ack(caller, args[0]),
        Syscall::DebugPrint => misc_ops::debug_print(caller, args[0], args[1]),
        Syscall::CapInfo => cap_ops::cap_info(caller, args[0]),
        Syscall::ProcessInfo => misc_ops::process_info(caller, args[0]),
        Syscall::IoPortRead => io_ops::io_port_read(caller, args[0], args[1], args[2]),
        Syscall::IoPortWrite => {
            io_ops::io_port_write(caller, args[0], args[1], args[2], args[3])
        }
    }
}

/// Funnel a capability error into the ABI (shared by the ops modules).
pub(crate) fn cap_err(e: graphene_cap::CapError) -> SysError {
    crate::cap::to_sys_error(e)
}
