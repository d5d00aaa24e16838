// =============================================================================
// MinimalOS NextGen — Worklets and Work Queues
// =============================================================================
//
// Asynchronous kernel operations (futex wakes, cancellations, IRQ bottom
// halves) never run their continuation inline. They post a `Worklet` to the
// `WorkQueue` of the context that owns the continuation, and that context
// drains the queue from a well-defined point in its loop.
//
// HOW IT WORKS:
//   - `post()` appends under an IRQ-masking lock, so it is legal from
//     interrupt handlers, and pokes the owner's `Wakeup` hook when the queue
//     goes from empty to non-empty.
//   - `run()` detaches the whole pending list in one critical section and
//     runs that batch with the lock dropped. Anything posted while the batch
//     runs (including a worklet re-posting itself) lands in the next batch,
//     so one `run()` call does a bounded amount of work.
//
// Worklets are intrusive-style: the queue only stores pointers, the owner
// embeds the worklet and keeps it pinned. A worklet is pending at most once.
// =============================================================================

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::marker::PhantomPinned;
use core::mem;
use core::pin::Pin;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::futex::Completion;
use crate::irq::IrqControl;
use crate::spinlock::IrqSpinLock;

/// Hook through which a work queue tells its owning context that there is
/// work to drain.
///
/// Called from any context, interrupt handlers included. Must not block.
pub trait Wakeup: Send + Sync {
    fn wakeup(&self);
}

impl<F: Fn() + Send + Sync> Wakeup for F {
    fn wakeup(&self) {
        self()
    }
}

/// A unit of deferred work: a function pointer bound to a work queue.
pub struct Worklet {
    queue: AtomicPtr<WorkQueue>,
    run: AtomicPtr<()>,
    pending: AtomicBool,
    _pin: PhantomPinned,
}

impl Worklet {
    pub const fn new() -> Self {
        Self {
            queue: AtomicPtr::new(ptr::null_mut()),
            run: AtomicPtr::new(ptr::null_mut()),
            pending: AtomicBool::new(false),
            _pin: PhantomPinned,
        }
    }

    /// Bind `run` and the queue it will run on.
    ///
    /// May be called again to rebind, but never while the worklet is pending.
    pub fn setup(&self, run: fn(&Worklet), queue: &'static WorkQueue) {
        assert!(!self.is_pending(), "worklet set up while pending");
        self.run.store(run as *mut (), Ordering::Relaxed);
        self.queue
            .store(queue as *const WorkQueue as *mut WorkQueue, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// The queue this worklet was bound to by [`setup`](Self::setup).
    pub fn queue(&self) -> Option<&'static WorkQueue> {
        let queue = self.queue.load(Ordering::Acquire);
        // SAFETY: only ever set from a `&'static WorkQueue`.
        unsafe { queue.as_ref() }
    }

    fn run_fn(&self) -> fn(&Worklet) {
        let run = self.run.load(Ordering::Relaxed);
        assert!(!run.is_null(), "worklet has no run function");
        // SAFETY: only ever set from a `fn(&Worklet)` in `setup`.
        unsafe { mem::transmute::<*mut (), fn(&Worklet)>(run) }
    }
}

impl Default for Worklet {
    fn default() -> Self {
        Self::new()
    }
}

/// A worklet used as a futex completion posts itself to its queue.
impl Completion for Worklet {
    fn complete(self: Pin<&Self>) {
        WorkQueue::post(self);
    }
}

impl Drop for Worklet {
    fn drop(&mut self) {
        assert!(!self.is_pending(), "worklet dropped while pending");
    }
}

impl fmt::Debug for Worklet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worklet")
            .field("bound", &!self.queue.load(Ordering::Relaxed).is_null())
            .field("pending", &self.is_pending())
            .finish()
    }
}

struct Pending(VecDeque<NonNull<Worklet>>);

// SAFETY: worklets are `Sync`, and each pending one is touched only by the
// single `run()` that detaches it.
unsafe impl Send for Pending {}

/// FIFO of posted worklets, drained by its owning context.
pub struct WorkQueue {
    pending: IrqSpinLock<Pending>,
    wakeup: Arc<dyn Wakeup>,
}

impl WorkQueue {
    pub fn new(irq: &'static dyn IrqControl, wakeup: Arc<dyn Wakeup>) -> Self {
        Self {
            pending: IrqSpinLock::new(Pending(VecDeque::new()), irq),
            wakeup,
        }
    }

    /// Queue `worklet` on the queue it was set up with.
    ///
    /// # Panics
    /// If the worklet was never set up or is already pending.
    pub fn post(worklet: Pin<&Worklet>) {
        let worklet = worklet.get_ref();
        let Some(queue) = worklet.queue() else {
            panic!("worklet posted before setup");
        };
        let was_pending = worklet.pending.swap(true, Ordering::AcqRel);
        assert!(!was_pending, "worklet posted while already pending");

        let was_empty = {
            let mut pending = queue.pending.lock();
            let was_empty = pending.0.is_empty();
            pending.0.push_back(NonNull::from(worklet));
            was_empty
        };
        if was_empty {
            queue.wakeup.wakeup();
        }
    }

    /// Whether anything is pending. Does not drain.
    pub fn check(&self) -> bool {
        !self.pending.lock().0.is_empty()
    }

    /// Run every worklet that was pending on entry, in posting order.
    ///
    /// Returns how many ran.
    pub fn run(&self) -> usize {
        let batch = mem::take(&mut self.pending.lock().0);
        let count = batch.len();

        for worklet in batch {
            // SAFETY: a pending worklet is pinned and cannot be dropped until
            // we clear its pending flag below.
            let worklet = unsafe { worklet.as_ref() };
            let run = worklet.run_fn();
            // Cleared first so the worklet may re-post itself.
            worklet.pending.store(false, Ordering::Release);
            run(worklet);
        }

        if count > 0 {
            klog::trace!("workqueue: ran {} worklet(s)", count);
        }
        count
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        assert!(
            self.pending.get_mut().0.is_empty(),
            "work queue dropped with worklets pending"
        );
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("pending", &self.pending.lock().0.len())
            .finish()
    }
}
