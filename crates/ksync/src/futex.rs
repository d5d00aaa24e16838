//! [073] Futex — address-keyed wait/wake engine.
//!
//! The table maps an address to a FIFO [`Slot`] of waiting [`FutexNode`]s.
//! A slot exists if and only if its queue is non-empty.
//!
//! Nodes are owned by the caller. The table only holds non-owning pointers to
//! them, and only while they are `Waiting`; the caller must keep a node
//! pinned and alive until its completion hook has run.
//!
//! **Protocol:**
//! - [`Futex::check_submit_wait`] evaluates the caller's condition *inside*
//!   the table's critical section, so a wake that races with the submit is
//!   either ordered before it (the condition sees the new value) or after it
//!   (the node is already queued). No wakeup is lost.
//! - [`Futex::wake`] dequeues every waiter. A waiter whose cancellation
//!   observer it can still disarm is completed by the waker; a waiter whose
//!   observer is already firing is marked `Woken` and completed by the
//!   cancellation path instead.
//! - Cancellation unlinks a `Waiting` node (setting `was_cancelled`) or
//!   retires a `Woken` one, then completes it.
//!
//! Every node that reaches `Waiting` is completed exactly once, by exactly
//! one of the two paths. Completion hooks always run with the table unlocked.

use alloc::boxed::Box;
use alloc::collections::btree_map::Entry;
use alloc::collections::{BTreeMap, VecDeque};
use core::fmt;
use core::marker::PhantomPinned;
use core::mem;
use core::pin::Pin;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};

use crate::cancel::{CancelHandler, CancellationObserver, CancellationToken};
use crate::irq::IrqControl;
use crate::spinlock::IrqSpinLock;

/// Futex key. Opaque to this layer: no alignment or aliasing checks.
pub type Address = usize;

/// Lifecycle of a [`FutexNode`].
///
/// `None → Waiting → {Woken → Retired | Retired}`, or `None → Retired` when
/// the submit did not wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FutexState {
    None = 0,
    Waiting = 1,
    Woken = 2,
    Retired = 3,
}

impl FutexState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => FutexState::None,
            1 => FutexState::Waiting,
            2 => FutexState::Woken,
            _ => FutexState::Retired,
        }
    }
}

/// Result of [`Futex::check_submit_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SubmitOutcome {
    /// Queued. The completion hook will run exactly once.
    Waiting,
    /// The condition no longer held; nothing was queued.
    ConditionFalse,
    /// The cancellation token had already fired; nothing was queued.
    Cancelled,
}

impl SubmitOutcome {
    pub fn is_waiting(self) -> bool {
        self == SubmitOutcome::Waiting
    }
}

/// Completion hook of a futex node.
///
/// Called with the table unlocked, from whichever context completed the
/// wait: the waker or the canceller. Must not block.
pub trait Completion {
    fn complete(self: Pin<&Self>);
}

impl<F: Fn()> Completion for F {
    fn complete(self: Pin<&Self>) {
        (self.get_ref())()
    }
}

/// Engine-owned part of a node. Written only under the table lock.
struct NodeLink {
    table: AtomicPtr<Table>,
    address: AtomicUsize,
    state: AtomicU8,
    was_cancelled: AtomicBool,
    observer: CancellationObserver,
}

impl NodeLink {
    const fn new() -> Self {
        Self {
            table: AtomicPtr::new(ptr::null_mut()),
            address: AtomicUsize::new(0),
            state: AtomicU8::new(FutexState::None as u8),
            was_cancelled: AtomicBool::new(false),
            observer: CancellationObserver::new(),
        }
    }

    fn state(&self) -> FutexState {
        FutexState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: FutexState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn address(&self) -> Address {
        self.address.load(Ordering::Relaxed)
    }
}

/// Object-safe view of a node, as stored in slot queues.
trait Waiter: Sync {
    fn link(&self) -> &NodeLink;
    fn complete(&self);
}

type RawWaiter = NonNull<dyn Waiter>;

fn erase<'a>(waiter: &'a (dyn Waiter + 'a)) -> RawWaiter {
    // SAFETY: lifetime erasure only. A queued node is pinned and its Drop
    // refuses to run while it is linked.
    unsafe { mem::transmute::<NonNull<dyn Waiter + 'a>, NonNull<dyn Waiter + 'static>>(NonNull::from(waiter)) }
}

fn same_node(a: RawWaiter, b: RawWaiter) -> bool {
    a.cast::<()>() == b.cast::<()>()
}

/// One pending wait request.
///
/// Embedded by the caller (on the stack, in a future, in a thread struct);
/// single-use: submitting the same node twice is a kernel bug and panics.
///
/// A node that reached `Waiting` may only be freed once its completion hook
/// has run. [`state`](Self::state) turning `Retired` is not enough: the
/// engine retires the node under the table lock and calls the hook after
/// unlocking, so the hook may still be running on another core.
pub struct FutexNode<C> {
    link: NodeLink,
    completion: C,
    _pin: PhantomPinned,
}

impl<C: Completion> FutexNode<C> {
    pub const fn new(completion: C) -> Self {
        Self {
            link: NodeLink::new(),
            completion,
            _pin: PhantomPinned,
        }
    }

    /// Current lifecycle state.
    ///
    /// `Retired` is published before the completion hook runs. Owners that
    /// free the node must wait for the hook itself (as [`Wait`](crate::Wait)
    /// does), not for this state.
    pub fn state(&self) -> FutexState {
        self.link.state()
    }

    /// `true` only if the node was taken off a wait queue by cancellation.
    ///
    /// Stays `false` when the wait was cancelled before it started and when
    /// a wake claimed the node first.
    pub fn was_cancelled(&self) -> bool {
        self.link.was_cancelled.load(Ordering::Acquire)
    }

    /// The address this node was submitted on (0 before submission).
    pub fn address(&self) -> Address {
        self.link.address()
    }

    pub fn completion(&self) -> &C {
        &self.completion
    }

    pub fn completion_pinned(self: Pin<&Self>) -> Pin<&C> {
        // SAFETY: the completion is structurally pinned inside the node.
        unsafe { self.map_unchecked(|node| &node.completion) }
    }
}

impl<C: Completion + Sync> Waiter for FutexNode<C> {
    fn link(&self) -> &NodeLink {
        &self.link
    }

    fn complete(&self) {
        // SAFETY: the engine only completes nodes it reached through a
        // `Pin<&FutexNode>`.
        unsafe { Pin::new_unchecked(&self.completion) }.complete();
    }
}

impl<C: Completion + Sync> CancelHandler for FutexNode<C> {
    fn on_cancel(&self) {
        let table = self.link.table.load(Ordering::Acquire);
        assert!(!table.is_null(), "futex: cancellation fired on unsubmitted node");
        // SAFETY: the table outlives every node queued on it (Futex::drop
        // asserts the table is empty).
        unsafe { (*table).cancel(erase(self)) };
    }
}

impl<C> Drop for FutexNode<C> {
    fn drop(&mut self) {
        let state = self.link.state();
        assert!(
            matches!(state, FutexState::None | FutexState::Retired),
            "futex: node dropped while {:?}",
            state
        );
    }
}

impl<C> fmt::Debug for FutexNode<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutexNode")
            .field("address", &format_args!("{:#x}", self.link.address()))
            .field("state", &self.link.state())
            .field("was_cancelled", &self.link.was_cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

/// Per-address FIFO of waiters.
struct Slot {
    queue: VecDeque<RawWaiter>,
}

// SAFETY: the pointees are `Sync` and only touched under the table lock or
// by the single path that owns their completion.
unsafe impl Send for Slot {}

impl Slot {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

/// Unlink `waiter` from its slot, dropping the slot if it empties.
fn unlink(slots: &mut BTreeMap<Address, Slot>, address: Address, waiter: RawWaiter) {
    let Entry::Occupied(mut entry) = slots.entry(address) else {
        panic!("futex: waiting node at {:#x} has no slot", address);
    };
    let queue = &mut entry.get_mut().queue;
    assert!(!queue.is_empty(), "futex: slot {:#x} exists with an empty queue", address);

    let position = queue
        .iter()
        .position(|&queued| same_node(queued, waiter))
        .unwrap_or_else(|| panic!("futex: waiting node missing from slot {:#x}", address));
    queue.remove(position);

    if queue.is_empty() {
        entry.remove();
    }
}

/// Heap-pinned table so nodes can point back at it while the `Futex`
/// handle itself moves.
struct Table {
    // TODO: shard by address hash with one lock per shard once the
    // single table lock shows up in contention profiles.
    slots: IrqSpinLock<BTreeMap<Address, Slot>>,
}

impl Table {
    fn cancel(&self, waiter: RawWaiter) {
        // SAFETY: the firing observer keeps the node alive until we have
        // called its completion hook.
        let node = unsafe { waiter.as_ref() };
        let link = node.link();
        let address = link.address();

        let was_queued = {
            let mut slots = self.slots.lock();
            let was_queued = match link.state() {
                FutexState::Waiting => {
                    unlink(&mut slots, address, waiter);
                    link.was_cancelled.store(true, Ordering::Release);
                    true
                }
                // A wake dequeued it but lost the disarm race; we complete it.
                FutexState::Woken => false,
                state => panic!("futex: cancellation of node in state {:?}", state),
            };
            link.set_state(FutexState::Retired);
            was_queued
        };

        klog::trace!("futex: cancel {:#x} (unlinked={})", address, was_queued);
        node.complete();
    }
}

/// The futex wait-slot table.
pub struct Futex {
    table: Box<Table>,
}

impl Futex {
    pub fn new(irq: &'static dyn IrqControl) -> Self {
        Self {
            table: Box::new(Table {
                slots: IrqSpinLock::new(BTreeMap::new(), irq),
            }),
        }
    }

    /// Register `node` as a waiter on `address` if `condition()` still holds.
    ///
    /// `condition` runs under the table lock with interrupts masked. It must
    /// not call back into this futex.
    ///
    /// On [`SubmitOutcome::Waiting`] the node's completion hook will be
    /// called exactly once, by a later [`wake`](Self::wake) or by
    /// `cancellation` firing. On any other outcome the node is retired and
    /// the hook is never called.
    ///
    /// # Panics
    /// If `node` has been submitted before.
    pub fn check_submit_wait<C, F>(
        &self,
        address: Address,
        condition: F,
        node: Pin<&FutexNode<C>>,
        cancellation: CancellationToken,
    ) -> SubmitOutcome
    where
        C: Completion + Sync,
        F: FnOnce() -> bool,
    {
        let node = node.get_ref();
        let link = &node.link;

        let table: *const Table = &*self.table;
        let previous = link.table.swap(table.cast_mut(), Ordering::AcqRel);
        assert!(previous.is_null(), "futex: node submitted twice");
        link.address.store(address, Ordering::Relaxed);

        let outcome = {
            let mut slots = self.table.slots.lock();
            assert_eq!(link.state(), FutexState::None, "futex: node reused");

            // SAFETY (try_set): the node is pinned, and its Drop panics rather
            // than free it while the observer may still be armed.
            if !condition() {
                link.set_state(FutexState::Retired);
                SubmitOutcome::ConditionFalse
            } else if !unsafe { link.observer.try_set(&cancellation, node) } {
                link.set_state(FutexState::Retired);
                SubmitOutcome::Cancelled
            } else {
                let slot = slots.entry(address).or_insert_with(Slot::new);
                slot.queue.push_back(erase(node));
                link.set_state(FutexState::Waiting);
                SubmitOutcome::Waiting
            }
        };

        klog::trace!("futex: submit {:#x} -> {:?}", address, outcome);
        outcome
    }

    /// Wake every waiter on `address`, in FIFO order.
    ///
    /// Returns the number of waiters taken off the queue, including any whose
    /// completion is left to an in-flight cancellation. No waiters: no-op.
    pub fn wake(&self, address: Address) -> usize {
        self.wake_n(address, usize::MAX)
    }

    /// Wake at most `count` waiters on `address`, oldest first.
    pub fn wake_n(&self, address: Address, count: usize) -> usize {
        let (claimed, dequeued) = {
            let mut slots = self.table.slots.lock();

            let mut entry = match slots.entry(address) {
                Entry::Occupied(entry) => entry,
                Entry::Vacant(_) => return 0,
            };
            assert!(
                !entry.get().queue.is_empty(),
                "futex: slot {:#x} exists with an empty queue",
                address
            );

            let mut taken: VecDeque<RawWaiter> = if count >= entry.get().queue.len() {
                entry.remove().queue
            } else {
                entry.get_mut().queue.drain(..count).collect()
            };
            let dequeued = taken.len();

            taken.retain(|&waiter| {
                // SAFETY: queued nodes stay alive until they are retired.
                let link = unsafe { waiter.as_ref() }.link();
                assert_eq!(link.state(), FutexState::Waiting, "futex: queued node not waiting");

                if link.observer.try_reset() {
                    link.set_state(FutexState::Retired);
                    true
                } else {
                    // Cancellation owns the completion now.
                    link.set_state(FutexState::Woken);
                    false
                }
            });
            (taken, dequeued)
        };

        klog::trace!(
            "futex: wake {:#x} dequeued={} claimed={}",
            address,
            dequeued,
            claimed.len()
        );
        for waiter in claimed {
            // SAFETY: we retired it, so nothing else will touch it before the
            // owner has seen this completion.
            unsafe { waiter.as_ref() }.complete();
        }
        dequeued
    }

    /// Take `node` back out of the table without completing it.
    ///
    /// Returns `false` if the node is not waiting or a concurrent
    /// cancellation already claimed it; in that case a completion is still
    /// coming (or already came).
    pub(crate) fn withdraw<C: Completion + Sync>(&self, node: &FutexNode<C>) -> bool {
        let link = &node.link;
        let address = link.address();
        {
            let mut slots = self.table.slots.lock();
            if link.state() != FutexState::Waiting || !link.observer.try_reset() {
                return false;
            }
            unlink(&mut slots, address, erase(node));
            link.set_state(FutexState::Retired);
        }
        klog::trace!("futex: withdraw {:#x}", address);
        true
    }

    pub(crate) fn irq(&self) -> &'static dyn IrqControl {
        self.table.slots.irq()
    }

    /// No waiters on any address.
    pub fn is_empty(&self) -> bool {
        self.table.slots.lock().is_empty()
    }

    /// Number of waiters queued on `address`.
    pub fn waiters(&self, address: Address) -> usize {
        self.table
            .slots
            .lock()
            .get(&address)
            .map_or(0, |slot| slot.queue.len())
    }
}

impl Drop for Futex {
    fn drop(&mut self) {
        assert!(
            self.table.slots.get_mut().is_empty(),
            "futex: table dropped with waiters queued"
        );
    }
}

impl fmt::Debug for Futex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Futex")
            .field("slots", &self.table.slots.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationEvent;
    use crate::irq::NO_IRQ;
    use crate::spinlock::tests::{ThreadIrq, THREAD_IRQ};
    use std::boxed::Box;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Sync) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        (hits, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn false_condition_retires_without_queueing() {
        let futex = Futex::new(&NO_IRQ);
        let (hits, hook) = counter();
        let node = Box::pin(FutexNode::new(hook));

        let outcome = futex.check_submit_wait(0x1000, || false, node.as_ref(), CancellationToken::none());
        assert_eq!(outcome, SubmitOutcome::ConditionFalse);
        assert_eq!(node.state(), FutexState::Retired);
        assert!(futex.is_empty());

        assert_eq!(futex.wake(0x1000), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn condition_runs_with_interrupts_masked() {
        let futex = Futex::new(&THREAD_IRQ);
        let (_hits, hook) = counter();
        let node = Box::pin(FutexNode::new(hook));

        let outcome = futex.check_submit_wait(
            0x40,
            || {
                assert!(ThreadIrq::masked());
                false
            },
            node.as_ref(),
            CancellationToken::none(),
        );
        assert_eq!(outcome, SubmitOutcome::ConditionFalse);
        assert!(!ThreadIrq::masked());
    }

    #[test]
    fn already_cancelled_token_is_not_a_wait() {
        let futex = Futex::new(&NO_IRQ);
        let event = CancellationEvent::new(&NO_IRQ);
        event.cancel();
        let (hits, hook) = counter();
        let node = Box::pin(FutexNode::new(hook));

        let outcome = futex.check_submit_wait(0x2000, || true, node.as_ref(), event.token());
        assert_eq!(outcome, SubmitOutcome::Cancelled);
        assert_eq!(node.state(), FutexState::Retired);
        assert!(!node.was_cancelled());
        assert!(futex.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wake_completes_in_submission_order() {
        let futex = Futex::new(&NO_IRQ);
        let order = Arc::new(Mutex::new(Vec::new()));

        let nodes: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                Box::pin(FutexNode::new(move || order.lock().unwrap().push(i)))
            })
            .collect();
        for node in &nodes {
            let outcome = futex.check_submit_wait(0xa0, || true, node.as_ref(), CancellationToken::none());
            assert!(outcome.is_waiting());
        }
        assert_eq!(futex.waiters(0xa0), 3);

        assert_eq!(futex.wake(0xa0), 3);
        assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
        assert!(futex.is_empty());
        for node in &nodes {
            assert_eq!(node.state(), FutexState::Retired);
            assert!(!node.was_cancelled());
        }
    }

    #[test]
    fn wake_n_takes_oldest_and_keeps_the_rest() {
        let futex = Futex::new(&NO_IRQ);
        let order = Arc::new(Mutex::new(Vec::new()));
        let nodes: Vec<_> = (0..4)
            .map(|i| {
                let order = Arc::clone(&order);
                Box::pin(FutexNode::new(move || order.lock().unwrap().push(i)))
            })
            .collect();
        for node in &nodes {
            let _ = futex.check_submit_wait(0x10, || true, node.as_ref(), CancellationToken::none());
        }

        assert_eq!(futex.wake_n(0x10, 0), 0);
        assert_eq!(futex.wake_n(0x10, 3), 3);
        assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
        assert_eq!(futex.waiters(0x10), 1);
        assert_eq!(nodes[3].state(), FutexState::Waiting);

        assert_eq!(futex.wake_n(0x10, 5), 1);
        assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3]);
        assert!(futex.is_empty());
    }

    #[test]
    fn cancel_unlinks_waiter_and_marks_it() {
        let futex = Futex::new(&NO_IRQ);
        let event = CancellationEvent::new(&NO_IRQ);
        let (hits, hook) = counter();
        let (other_hits, other_hook) = counter();
        let node = Box::pin(FutexNode::new(hook));
        let other = Box::pin(FutexNode::new(other_hook));

        assert!(futex
            .check_submit_wait(0x3000, || true, node.as_ref(), event.token())
            .is_waiting());
        assert!(futex
            .check_submit_wait(0x3000, || true, other.as_ref(), CancellationToken::none())
            .is_waiting());

        event.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(node.was_cancelled());
        assert_eq!(node.state(), FutexState::Retired);
        assert_eq!(futex.waiters(0x3000), 1);

        assert_eq!(futex.wake(0x3000), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(other_hits.load(Ordering::SeqCst), 1);
        assert!(futex.is_empty());
    }

    #[test]
    fn cancel_after_wake_does_nothing() {
        let futex = Futex::new(&NO_IRQ);
        let event = CancellationEvent::new(&NO_IRQ);
        let (hits, hook) = counter();
        let node = Box::pin(FutexNode::new(hook));

        assert!(futex
            .check_submit_wait(0x44, || true, node.as_ref(), event.token())
            .is_waiting());
        assert_eq!(futex.wake(0x44), 1);
        event.cancel();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!node.was_cancelled());
    }

    #[test]
    fn withdraw_removes_without_completing() {
        let futex = Futex::new(&NO_IRQ);
        let event = CancellationEvent::new(&NO_IRQ);
        let (hits, hook) = counter();
        let node = Box::pin(FutexNode::new(hook));

        assert!(futex
            .check_submit_wait(0x50, || true, node.as_ref(), event.token())
            .is_waiting());
        assert!(futex.withdraw(node.as_ref().get_ref()));
        assert!(!futex.withdraw(node.as_ref().get_ref()));
        assert!(futex.is_empty());

        event.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(node.state(), FutexState::Retired);
    }

    #[test]
    #[should_panic(expected = "submitted twice")]
    fn resubmitting_a_node_panics() {
        let futex = Futex::new(&NO_IRQ);
        let (_hits, hook) = counter();
        let node = Box::pin(FutexNode::new(hook));

        let _ = futex.check_submit_wait(0x60, || false, node.as_ref(), CancellationToken::none());
        let _ = futex.check_submit_wait(0x60, || false, node.as_ref(), CancellationToken::none());
    }

    #[test]
    fn addresses_are_independent() {
        let futex = Futex::new(&NO_IRQ);
        let (a_hits, a_hook) = counter();
        let (b_hits, b_hook) = counter();
        let a = Box::pin(FutexNode::new(a_hook));
        let b = Box::pin(FutexNode::new(b_hook));

        let _ = futex.check_submit_wait(1, || true, a.as_ref(), CancellationToken::none());
        let _ = futex.check_submit_wait(2, || true, b.as_ref(), CancellationToken::none());

        assert_eq!(futex.wake(1), 1);
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 0);
        assert_eq!(futex.waiters(2), 1);
        assert_eq!(futex.wake(2), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    /// Records the node's state from inside its own completion hook.
    struct StateAtHook {
        node: AtomicPtr<FutexNode<StateAtHook>>,
        seen: AtomicU8,
    }

    impl StateAtHook {
        fn new() -> Self {
            Self {
                node: AtomicPtr::new(ptr::null_mut()),
                seen: AtomicU8::new(u8::MAX),
            }
        }
    }

    impl Completion for StateAtHook {
        fn complete(self: Pin<&Self>) {
            let node = self.node.load(Ordering::Acquire);
            // SAFETY: the test keeps the node pinned until after the hook.
            let state = unsafe { &*node }.state();
            self.seen.store(state as u8, Ordering::Release);
        }
    }

    fn hooked_node() -> Pin<Box<FutexNode<StateAtHook>>> {
        let node = Box::pin(FutexNode::new(StateAtHook::new()));
        let raw: *const FutexNode<StateAtHook> = &*node;
        node.completion().node.store(raw.cast_mut(), Ordering::Release);
        node
    }

    #[test]
    fn node_is_retired_before_its_hook_runs() {
        let futex = Futex::new(&NO_IRQ);
        let event = CancellationEvent::new(&NO_IRQ);
        let woken = hooked_node();
        let cancelled = hooked_node();

        assert!(futex
            .check_submit_wait(0x9000, || true, woken.as_ref(), CancellationToken::none())
            .is_waiting());
        assert!(futex
            .check_submit_wait(0x9008, || true, cancelled.as_ref(), event.token())
            .is_waiting());

        assert_eq!(futex.wake(0x9000), 1);
        event.cancel();

        // The state alone cannot tell an owner that the hook has finished.
        for node in [&woken, &cancelled] {
            assert_eq!(node.completion().seen.load(Ordering::Acquire), FutexState::Retired as u8);
        }
        assert!(cancelled.was_cancelled());
    }
}
