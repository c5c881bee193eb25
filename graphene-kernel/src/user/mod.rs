//! User-mode transition
//!
//! First entry into ring 3 for a user thread: validate the entry point
//! and stack against the user range, then build an interrupt-return
//! frame and `iretq` into the process. The address space and TSS
//! kernel stack were already installed by the scheduler when this
//! thread was dispatched.

pub mod buffer;

use crate::objects;
use crate::sched;
use crate::task;

/// Enter user mode on the current (freshly dispatched) thread.
///
/// Terminates the thread instead of entering if the recorded entry or
/// stack lies outside the user range.
pub fn enter_current() -> ! {
    let current = sched::current_thread();
    let (entry, user_stack, arg) =
        objects::with_thread(current, |t| (t.entry, t.user_stack, t.entry_arg))
            .expect("entering user mode on a dead thread");

    if !buffer::user_address_ok(entry) || !buffer::user_address_ok(user_stack.wrapping_sub(8)) {
        log::warn!(
            "thread {:?}: entry {:#x} / stack {:#x} outside user range",
            current,
            entry,
            user_stack
        );
        task::exit_current_thread(-1);
    }

    log::debug!(
        "thread {:?} entering ring 3 at {:#x} (stack {:#x})",
        current,
        entry,
        user_stack
    );

    // SAFETY: Entry and stack validated; CR3 and TSS.RSP0 were set at
    // dispatch time.
    unsafe { graphene_arch::context::enter_user(entry, user_stack, arg) }
}
