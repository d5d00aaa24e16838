//! `async` futex waits.
//!
//! [`Futex::wait`] returns a [`Wait`] future that carries its own
//! [`FutexNode`]. The first poll submits the node; the futex's completion
//! wakes the task that polled it last.
//!
//! Dropping a pending `Wait` withdraws the node from the table. If a wake or
//! a cancellation has already claimed the node, the drop spins until that
//! completion has finished with it. Completions never block, so the spin is
//! short.
//!
//! The waker slot is filled by the polling task and emptied by the
//! completion, which may run in an interrupt handler on the same core. Its
//! lock therefore masks interrupts through the futex's [`IrqControl`].

use core::future::Future;
use core::mem;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll, Waker};

use crate::cancel::CancellationToken;
use crate::futex::{Address, Completion, Futex, FutexNode, SubmitOutcome};
use crate::irq::IrqControl;
use crate::spinlock::IrqSpinLock;

/// How a [`Wait`] resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A wake completed the wait.
    Woken,
    /// The condition was false at submit time; the task never slept.
    ConditionFalse,
    /// Cancelled, either before the wait started or while queued.
    Cancelled,
}

/// Completion hook that hands the result to a task waker.
struct WakeSlot {
    waker: IrqSpinLock<Option<Waker>>,
    done: AtomicBool,
}

impl WakeSlot {
    const fn new(irq: &'static dyn IrqControl) -> Self {
        Self {
            waker: IrqSpinLock::new(None, irq),
            done: AtomicBool::new(false),
        }
    }
}

impl Completion for WakeSlot {
    fn complete(self: Pin<&Self>) {
        let waker = {
            let mut waker = self.waker.lock();
            self.done.store(true, Ordering::Release);
            waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

enum Phase<F> {
    Idle(F),
    Queued,
    Done,
}

/// Future returned by [`Futex::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'f, F> {
    futex: &'f Futex,
    address: Address,
    cancellation: CancellationToken,
    phase: Phase<F>,
    node: FutexNode<WakeSlot>,
}

impl Futex {
    /// Wait on `address` until woken, unless `condition()` is false at
    /// submit time or `cancellation` fires.
    ///
    /// Nothing happens until the future is first polled.
    pub fn wait<F>(&self, address: Address, condition: F, cancellation: CancellationToken) -> Wait<'_, F>
    where
        F: FnOnce() -> bool,
    {
        Wait {
            futex: self,
            address,
            cancellation,
            phase: Phase::Idle(condition),
            node: FutexNode::new(WakeSlot::new(self.irq())),
        }
    }
}

impl<F> Wait<'_, F> {
    pub fn address(&self) -> Address {
        self.address
    }
}

impl<F: FnOnce() -> bool> Future for Wait<'_, F> {
    type Output = WaitOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WaitOutcome> {
        // SAFETY: `node` is never moved out of `self`; the other fields are
        // not structurally pinned.
        let this = unsafe { self.get_unchecked_mut() };

        match mem::replace(&mut this.phase, Phase::Done) {
            Phase::Idle(condition) => {
                // SAFETY: `this` came from a pinned reference.
                let node = unsafe { Pin::new_unchecked(&this.node) };
                let token = mem::take(&mut this.cancellation);
                match this.futex.check_submit_wait(this.address, condition, node, token) {
                    SubmitOutcome::Waiting => {}
                    SubmitOutcome::ConditionFalse => return Poll::Ready(WaitOutcome::ConditionFalse),
                    SubmitOutcome::Cancelled => return Poll::Ready(WaitOutcome::Cancelled),
                }
            }
            Phase::Queued => {}
            Phase::Done => panic!("futex wait polled after completion"),
        }

        let slot = this.node.completion();
        let mut waker = slot.waker.lock();
        if slot.done.load(Ordering::Acquire) {
            drop(waker);
            let outcome = if this.node.was_cancelled() {
                WaitOutcome::Cancelled
            } else {
                WaitOutcome::Woken
            };
            return Poll::Ready(outcome);
        }

        match waker.as_mut() {
            Some(current) if current.will_wake(cx.waker()) => {}
            _ => *waker = Some(cx.waker().clone()),
        }
        drop(waker);
        this.phase = Phase::Queued;
        Poll::Pending
    }
}

impl<F> Drop for Wait<'_, F> {
    fn drop(&mut self) {
        if !matches!(self.phase, Phase::Queued) {
            return;
        }
        if self.futex.withdraw(&self.node) {
            return;
        }

        // Claimed by a wake or a cancellation: wait until the completion has
        // released the slot before the node goes away.
        let slot = self.node.completion();
        loop {
            let guard = slot.waker.lock();
            if slot.done.load(Ordering::Acquire) {
                break;
            }
            drop(guard);
            core::hint::spin_loop();
        }
        klog::debug!("futex: wait on {:#x} dropped after completion started", self.address);
    }
}
