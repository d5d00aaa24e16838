// =============================================================================
// MinimalOS NextGen — Interrupt-Masking Ticket Spinlock
// =============================================================================
//
// The futex slot table and every work queue sit behind one of these. Both are
// touched from interrupt handlers, so the lock masks interrupts on the current
// core before it starts spinning and restores the saved state on release.
//
// HOW IT WORKS:
//   - Two counters: `next_ticket` and `now_serving`
//   - To lock: atomically increment `next_ticket`, get your ticket number.
//     Spin until `now_serving` equals your ticket.
//   - To unlock: increment `now_serving`, which lets the next waiter proceed.
//
// Waiters are served in arrival order, so a core hammering `wake()` cannot
// starve a core trying to cancel.
//
// Critical sections under this lock must never block: list insert/remove,
// map lookup and constant-time checks only.
// =============================================================================

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::irq::IrqControl;

/// A ticket-based spinlock that masks interrupts while held.
///
/// # Type Parameter
/// - `T`: The data protected by the lock. Must be `Send` because ownership
///   effectively transfers between cores when the lock is acquired.
pub struct IrqSpinLock<T> {
    /// The next ticket to be dispensed (atomically incremented by each locker).
    next_ticket: AtomicU32,

    /// The ticket number currently being served (incremented on unlock).
    now_serving: AtomicU32,

    /// How interrupts are masked on the acquiring core.
    irq: &'static dyn IrqControl,

    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out access to `T` to one core at a time.
unsafe impl<T: Send> Send for IrqSpinLock<T> {}
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    /// Creates a new, unlocked spinlock wrapping `value`.
    ///
    /// `const` so tables can live in statics.
    pub const fn new(value: T, irq: &'static dyn IrqControl) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            irq,
            data: UnsafeCell::new(value),
        }
    }

    /// The interrupt control this lock masks through.
    pub fn irq(&self) -> &'static dyn IrqControl {
        self.irq
    }

    /// Acquires the lock, masking interrupts on the current core.
    ///
    /// Interrupts are masked BEFORE taking a ticket: a handler on this core
    /// must never find the lock held by the code it interrupted.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq_was_enabled = self.irq.save_and_disable();

        // Relaxed is enough here; the Acquire load in the spin loop below
        // orders us after the previous holder's writes.
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }

        IrqSpinLockGuard {
            lock: self,
            irq_was_enabled,
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `None` (with the interrupt state restored) if another core
    /// holds it.
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let irq_was_enabled = self.irq.save_and_disable();

        let current = self.now_serving.load(Ordering::Relaxed);
        let result = self.next_ticket.compare_exchange(
            current,
            current.wrapping_add(1),
            Ordering::Acquire,
            Ordering::Relaxed,
        );

        match result {
            Ok(_) => Some(IrqSpinLockGuard {
                lock: self,
                irq_was_enabled,
            }),
            Err(_) => {
                self.irq.restore(irq_was_enabled);
                None
            }
        }
    }

    /// Whether some core currently holds the lock. Racy; diagnostics only.
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// `&mut self` already proves exclusive access, so no lock is taken.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> fmt::Debug for IrqSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqSpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard for a held [`IrqSpinLock`].
///
/// Dropping it releases the lock and restores the interrupt state saved when
/// it was acquired.
pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,
    irq_was_enabled: bool,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release publishes our writes to the next ticket holder.
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        self.lock.irq.restore(self.irq_was_enabled);
    }
}
