//! Interrupt-safe synchronisation primitives
//!
//! Provides [`IrqSpinMutex`] which disables interrupts while held to
//! prevent deadlock when interrupt handlers need the same lock.
//!
//! # Example
//!
//! ```ignore
//! use graphene_arch::IrqSpinMutex;
//!
//! static COUNTER: IrqSpinMutex<u64> = IrqSpinMutex::new(0);
//!
//! fn increment() {
//!     let mut guard = COUNTER.lock();
//!     *guard += 1;
//! }   // Interrupts restored here
//! ```

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::cpu::{disable_interrupts, restore_interrupts};

/// A spinlock that disables interrupts while held.
///
/// On a single CPU the spin never actually waits; the interrupt disable
/// is what makes the critical section atomic with respect to interrupt
/// handlers that take the same lock.
///
/// # Safety Invariants
///
/// - The lock must be released (and interrupts restored) before
///   blocking or rescheduling
/// - Critical sections should be kept short
pub struct IrqSpinMutex<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: The data is only reachable through the guard, which requires
// holding the lock.
unsafe impl<T: Send> Sync for IrqSpinMutex<T> {}
unsafe impl<T: Send> Send for IrqSpinMutex<T> {}

impl<T> IrqSpinMutex<T> {
    /// Create a new mutex with the given value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, disabling interrupts.
    ///
    /// Returns a guard that restores interrupts when dropped.
    #[must_use]
    pub fn lock(&self) -> IrqSpinMutexGuard<'_, T> {
        // Disable interrupts BEFORE attempting to acquire: an interrupt
        // that fires while spinning could try to take this same lock.
        let flags = disable_interrupts();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        IrqSpinMutexGuard {
            mutex: self,
            flags,
            _not_send: core::marker::PhantomData,
        }
    }

    /// Try to acquire the lock without spinning.
    ///
    /// Interrupts are only left disabled if the lock is acquired.
    #[must_use]
    pub fn try_lock(&self) -> Option<IrqSpinMutexGuard<'_, T>> {
        let flags = disable_interrupts();

        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(IrqSpinMutexGuard {
                mutex: self,
                flags,
                _not_send: core::marker::PhantomData,
            })
        } else {
            restore_interrupts(flags);
            None
        }
    }

    /// Get a mutable reference to the underlying data.
    ///
    /// Safe because `&mut self` guarantees exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the mutex and return the inner value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Raw pointer to the protected data, bypassing the lock.
    ///
    /// For handing a stable `'static` reference to hardware tables (GDT
    /// descriptors reference the TSS by address). All mutation must
    /// still go through [`lock`](Self::lock).
    #[must_use]
    pub fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

impl<T: Default> Default for IrqSpinMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for IrqSpinMutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("IrqSpinMutex").field("data", &*guard).finish(),
            None => f.debug_struct("IrqSpinMutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Guard providing access to the locked data.
///
/// Interrupts stay disabled while this guard exists and are restored to
/// their previous state on drop. The guard is `!Send`: moving it to
/// another context would restore the wrong interrupt state.
pub struct IrqSpinMutexGuard<'a, T> {
    mutex: &'a IrqSpinMutex<T>,
    flags: u64,
    _not_send: core::marker::PhantomData<*const ()>,
}

impl<T> Deref for IrqSpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We hold the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for IrqSpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We hold the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for IrqSpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock before restoring interrupts so an interrupt
        // that fires immediately can take it.
        self.mutex.locked.store(false, Ordering::Release);
        restore_interrupts(self.flags);
    }
}

unsafe impl<T: Sync> Sync for IrqSpinMutexGuard<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock() {
        let m = IrqSpinMutex::new(41);
        {
            let mut g = m.lock();
            *g += 1;
        }
        assert_eq!(*m.lock(), 42);
    }

    #[test]
    fn test_try_lock_contended() {
        let m = IrqSpinMutex::new(());
        let g = m.lock();
        assert!(m.try_lock().is_none());
        drop(g);
        assert!(m.try_lock().is_some());
    }
}
