//! IRQ delivery to user drivers
//!
//! Exactly one IRQ object exists per hardware line. The in-kernel
//! interrupt path masks the line, signals EOI, bumps the object's
//! pending counter, and wakes one waiter; a user driver holding the
//! IRQ capability with Handle rights consumes events with `irq_wait`
//! and re-enables the line with `irq_ack`.
//!
//! The timer line is owned by the scheduler and can never be bound to
//! an IRQ object.

use graphene_arch::{cpu, IrqSpinMutex};
use graphene_cap::{CapError, ObjRef};
use graphene_pal::intc::{self, IRQ_LINES, IRQ_TIMER};
use graphene_syscall::SysError;

use crate::objects::{self, ObjectData};
use crate::sched;
use crate::task::thread::{ThreadState, WakeReason};
use crate::task::wait_queue::WaitQueue;

/// Per-line IRQ object.
pub struct IrqObject {
    /// Hardware line number.
    pub line: u8,
    /// Events delivered but not yet consumed by `irq_wait`.
    pub pending: u32,
    /// Threads blocked in `irq_wait`.
    pub waiters: WaitQueue,
}

/// One slot per hardware line; enforces the one-object-per-line rule.
static IRQ_REGISTRY: IrqSpinMutex<[ObjRef; IRQ_LINES]> =
    IrqSpinMutex::new([ObjRef::NULL; IRQ_LINES]);

/// IRQ-layer errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqError {
    /// Line number out of range or reserved (timer).
    BadLine,
    /// An object already exists for this line.
    LineTaken,
    /// Object arena exhausted.
    OutOfMemory,
}

impl From<IrqError> for SysError {
    fn from(e: IrqError) -> Self {
        match e {
            IrqError::BadLine => Self::InvalidArgument,
            IrqError::LineTaken => Self::InvalidArgument,
            IrqError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

/// Create the IRQ object for `line`. Fails if one already exists.
pub fn create_irq_object(line: u8) -> Result<ObjRef, IrqError> {
    if line as usize >= IRQ_LINES || line == IRQ_TIMER {
        return Err(IrqError::BadLine);
    }

    let mut registry = IRQ_REGISTRY.lock();
    if registry[line as usize].is_valid() {
        return Err(IrqError::LineTaken);
    }

    let r = objects::alloc(ObjectData::Irq(IrqObject {
        line,
        pending: 0,
        waiters: WaitQueue::new(),
    }))
    .ok_or(IrqError::OutOfMemory)?;

    // The registry holds one reference for the object's lifetime.
    objects::inc_ref(r);
    registry[line as usize] = r;
    Ok(r)
}

/// Look up the IRQ object bound to a line.
#[must_use]
pub fn object_for_line(line: u8) -> ObjRef {
    if line as usize >= IRQ_LINES {
        return ObjRef::NULL;
    }
    IRQ_REGISTRY.lock()[line as usize]
}

/// Hardware interrupt entry for a deliverable line.
///
/// Runs in interrupt context: may not block, may not allocate, only
/// moves threads between queues. The line stays masked until the
/// driver acknowledges.
pub fn handle_hw_irq(line: u8) {
    let controller = intc::active_controller();
    let obj = object_for_line(line);

    if !obj.is_valid() {
        // No driver bound: drop the event.
        controller.eoi(line);
        return;
    }

    controller.mask(line);
    controller.eoi(line);

    let waiter = objects::with_irq(obj, |irq| {
        irq.pending = irq.pending.saturating_add(1);
        irq.waiters.dequeue()
    })
    .flatten();

    if let Some(t) = waiter {
        let alive =
            objects::with_thread(t, |th| th.state != ThreadState::Zombie).unwrap_or(false);
        if alive {
            objects::with_thread(t, |th| th.wake_reason = WakeReason::IrqFired);
            sched::wake(t);
        }
    }
}

/// Block until an event is pending on the IRQ object, then consume it.
///
/// Returns the number of events still pending after the consume.
pub fn irq_wait(current: ObjRef, obj: ObjRef) -> Result<u32, IrqError> {
    loop {
        let flags = cpu::disable_interrupts();

        let consumed = objects::with_irq(obj, |irq| {
            if irq.pending > 0 {
                irq.pending -= 1;
                Some(irq.pending)
            } else {
                None
            }
        })
        .ok_or_else(|| {
            cpu::restore_interrupts(flags);
            IrqError::BadLine
        })?;

        if let Some(remaining) = consumed {
            cpu::restore_interrupts(flags);
            return Ok(remaining);
        }

        // Nothing pending: join the wait queue and sleep.
        objects::with_thread(current, |t| {
            t.wake_reason = WakeReason::None;
            t.state = ThreadState::Blocked;
            t.blocked_on = obj;
        });
        objects::with_irq(obj, |irq| irq.waiters.enqueue(current));
        sched::schedule();
        cpu::restore_interrupts(flags);
        // Woken: loop to consume the event (another waiter may have
        // raced us to it).
    }
}

/// Acknowledge an IRQ: re-enable the line on the active controller.
pub fn irq_ack(obj: ObjRef) -> Result<(), IrqError> {
    let line = objects::with_irq(obj, |irq| irq.line).ok_or(IrqError::BadLine)?;
    intc::active_controller().unmask(line);
    Ok(())
}

/// Drop the registry's reference when an IRQ object is revoked.
pub fn unregister_line(line: u8) {
    if line as usize >= IRQ_LINES {
        return;
    }
    let mut registry = IRQ_REGISTRY.lock();
    let obj = registry[line as usize];
    if obj.is_valid() {
        registry[line as usize] = ObjRef::NULL;
        objects::unref(obj);
    }
}
