//! Cancellation events, tokens and observers.
//!
//! A [`CancellationEvent`] is the side that requests cancellation; it hands
//! out cheap [`CancellationToken`]s. A [`CancellationObserver`] is embedded in
//! whatever wants to be told (a futex node, say) and is armed on a token.
//!
//! **Race resolution:** each observer carries an atomic state cell with two
//! claimable transitions, `ARMED → FIRING` (taken by [`CancellationEvent::cancel`])
//! and `ARMED → IDLE` (taken by [`CancellationObserver::try_reset`]). Exactly
//! one side wins; the loser backs off. If `try_reset` returns `false` the
//! handler is already running or about to run, and its owner must leave the
//! completion to it.
//!
//! `cancel()` and `try_reset` can both be reached from interrupt context (a
//! wake from an IRQ handler disarms observers), so the event's lock masks
//! interrupts through the event's [`IrqControl`]. The observer itself holds
//! no lock: its link to the event is a single atomic pointer.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomPinned;
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crate::irq::IrqControl;
use crate::spinlock::IrqSpinLock;

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const FIRING: u8 = 2;

/// Callback invoked when an armed observer's event is cancelled.
pub trait CancelHandler: Sync {
    fn on_cancel(&self);
}

/// One armed observer as seen from the event.
struct Armed {
    observer: NonNull<CancellationObserver>,
    handler: NonNull<dyn CancelHandler>,
}

// SAFETY: both pointers are only dereferenced under the observer protocol,
// and the pointees are `Sync`.
unsafe impl Send for Armed {}

struct EventState {
    cancelled: bool,
    armed: Vec<Armed>,
}

struct Shared {
    state: IrqSpinLock<EventState>,
}

impl Shared {
    fn new(irq: &'static dyn IrqControl) -> Self {
        Self {
            state: IrqSpinLock::new(
                EventState {
                    cancelled: false,
                    armed: Vec::new(),
                },
                irq,
            ),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

/// The requesting side of a cancellation.
pub struct CancellationEvent {
    shared: Arc<Shared>,
}

impl CancellationEvent {
    /// `irq` masks interrupts while the event's observer list is locked.
    pub fn new(irq: &'static dyn IrqControl) -> Self {
        Self {
            shared: Arc::new(Shared::new(irq)),
        }
    }

    /// A token observers can be armed on.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Some(Arc::clone(&self.shared)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Request cancellation.
    ///
    /// Every observer armed on this event at this point whose `ARMED → FIRING`
    /// transition succeeds has its handler invoked, after the event's lock has
    /// been dropped. Observers armed later fail to arm. Idempotent.
    pub fn cancel(&self) {
        let fired = {
            let mut state = self.shared.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;

            let mut fired = Vec::with_capacity(state.armed.len());
            for armed in state.armed.drain(..) {
                // SAFETY: an observer stays put while it is registered here;
                // `try_reset` unregisters under this same lock before the
                // observer can go away.
                let observer = unsafe { armed.observer.as_ref() };
                if observer
                    .state
                    .compare_exchange(ARMED, FIRING, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    fired.push(armed.handler);
                }
            }
            fired
        };

        klog::trace!("cancel: event fired {} observer(s)", fired.len());
        for handler in fired {
            // SAFETY: we own the FIRING transition, so the observer's owner
            // keeps the handler alive until this call has happened.
            unsafe { handler.as_ref().on_cancel() };
        }
    }
}

impl fmt::Debug for CancellationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationEvent")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Read-only handle to a [`CancellationEvent`].
///
/// The default token belongs to no event and can never be cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken {
    shared: Option<Arc<Shared>>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub const fn none() -> Self {
        Self { shared: None }
    }

    pub fn can_be_cancelled(&self) -> bool {
        self.shared.is_some()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.is_cancelled())
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("requested", &self.is_cancellation_requested())
            .finish()
    }
}

/// Embedded observer: at most one armed registration at a time.
pub struct CancellationObserver {
    state: AtomicU8,
    /// `Arc::into_raw` of the event last armed on, or null.
    event: AtomicPtr<Shared>,
    _pin: PhantomPinned,
}

impl CancellationObserver {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            event: AtomicPtr::new(ptr::null_mut()),
            _pin: PhantomPinned,
        }
    }

    fn release_event(&self) -> Option<Arc<Shared>> {
        let event = self.event.swap(ptr::null_mut(), Ordering::AcqRel);
        // SAFETY: only ever stored by `try_set`, from `Arc::into_raw`.
        (!event.is_null()).then(|| unsafe { Arc::from_raw(event) })
    }

    /// Arm on `token`.
    ///
    /// Returns `false` if the token was already cancelled; `handler` will then
    /// never be called for this arming. A token with no event always arms and
    /// never fires.
    ///
    /// # Safety
    /// Until [`try_reset`](Self::try_reset) returns `true` or `handler` has
    /// been invoked, `self` must not move and both `self` and `handler` must
    /// stay alive.
    pub unsafe fn try_set(&self, token: &CancellationToken, handler: &dyn CancelHandler) -> bool {
        assert_ne!(
            self.state.load(Ordering::Acquire),
            ARMED,
            "cancellation observer armed twice"
        );

        let Some(shared) = token.shared.as_ref() else {
            self.state.store(ARMED, Ordering::Release);
            return true;
        };

        // A fired observer still holds its old event; dropped after unlocking.
        let mut previous = None;
        let armed = {
            let mut state = shared.state.lock();
            if state.cancelled {
                false
            } else {
                previous = self.release_event();
                let raw = Arc::into_raw(Arc::clone(shared));
                self.event.store(raw.cast_mut(), Ordering::Release);
                self.state.store(ARMED, Ordering::Release);
                state.armed.push(Armed {
                    observer: NonNull::from(self),
                    // SAFETY: lifetime erasure only; the caller keeps
                    // `handler` alive for as long as this registration exists.
                    handler: unsafe {
                        mem::transmute::<NonNull<dyn CancelHandler + '_>, NonNull<dyn CancelHandler + 'static>>(
                            NonNull::from(handler),
                        )
                    },
                });
                true
            }
        };
        drop(previous);
        armed
    }

    /// Disarm.
    ///
    /// Returns `true` if this call took the observer out of `ARMED`: the
    /// handler will not run. Returns `false` if it is not armed, including
    /// when a concurrent cancel has already claimed it.
    pub fn try_reset(&self) -> bool {
        if self
            .state
            .compare_exchange(ARMED, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // A racing `cancel()` may still be walking the list and reading our
        // state cell; unregistering under its lock waits that out.
        if let Some(shared) = self.release_event() {
            let me = NonNull::from(self);
            shared.state.lock().armed.retain(|armed| armed.observer != me);
        }
        true
    }

    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }
}

impl Default for CancellationObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationObserver {
    fn drop(&mut self) {
        assert!(
            !self.is_armed(),
            "cancellation observer dropped while armed"
        );
        drop(self.release_event());
    }
}

impl fmt::Debug for CancellationObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            IDLE => "idle",
            ARMED => "armed",
            _ => "firing",
        };
        f.debug_struct("CancellationObserver")
            .field("state", &state)
            .finish()
    }
}
