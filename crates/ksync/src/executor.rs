//! Per-core executor context.
//!
//! Each core (or fiber) owns one [`ExecutorContext`]. Its work queue is where
//! completions aimed at that core land; its wakeup hook just raises a flag
//! the core's idle loop or scheduler checks before halting.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::irq::IrqControl;
use crate::work_queue::{WorkQueue, Wakeup};

/// Upper bound on `run()` passes per [`ExecutorContext::drain`].
pub const MAX_DRAIN_PASSES: usize = 16;

#[derive(Default)]
struct WorkSignal {
    pending: AtomicBool,
    wakeups: AtomicU64,
}

impl Wakeup for WorkSignal {
    fn wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }
}

/// The execution context a work queue belongs to.
pub struct ExecutorContext {
    /// Core index (0 = BSP).
    core_id: u32,
    work_queue: WorkQueue,
    signal: Arc<WorkSignal>,
}

impl ExecutorContext {
    pub fn new(core_id: u32, irq: &'static dyn IrqControl) -> Self {
        let signal = Arc::new(WorkSignal::default());
        Self {
            core_id,
            work_queue: WorkQueue::new(irq, signal.clone()),
            signal,
        }
    }

    pub fn core_id(&self) -> u32 {
        self.core_id
    }

    /// The queue worklets targeting this context are set up with.
    pub fn work_queue(&self) -> &WorkQueue {
        &self.work_queue
    }

    /// Whether the queue has signalled work since the last [`drain`](Self::drain).
    pub fn has_pending_work(&self) -> bool {
        self.signal.pending.load(Ordering::Acquire)
    }

    /// Number of times the queue's wakeup hook has fired.
    pub fn wakeups(&self) -> u64 {
        self.signal.wakeups.load(Ordering::Relaxed)
    }

    /// Run worklets until the queue is empty, for at most
    /// [`MAX_DRAIN_PASSES`] passes.
    ///
    /// Returns the total number run. Worklets posted while draining, by
    /// other cores or by the worklets themselves, are picked up by a later
    /// pass of the same call. If work is still queued after the last pass,
    /// the pending flag is raised again so the caller comes back for it.
    pub fn drain(&self) -> usize {
        // Clear before checking: a post racing with the final check raises
        // the flag again and is caught by the next drain.
        self.signal.pending.store(false, Ordering::Release);

        let mut total = 0;
        let mut passes = 0;
        while self.work_queue.check() {
            if passes == MAX_DRAIN_PASSES {
                self.signal.pending.store(true, Ordering::Release);
                klog::debug!(
                    "executor[{}]: yielding after {} passes with work queued",
                    self.core_id,
                    passes
                );
                break;
            }
            total += self.work_queue.run();
            passes += 1;
        }
        if total > 0 {
            klog::debug!("executor[{}]: drained {} worklet(s)", self.core_id, total);
        }
        total
    }
}

impl fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("core_id", &self.core_id)
            .field("work_queue", &self.work_queue)
            .field("has_pending_work", &self.has_pending_work())
            .finish()
    }
}
