//! MinimalOS kernel synchronization core.
//!
//! - [`futex`]: the address-keyed wait/wake engine ([`Futex`], [`FutexNode`]).
//! - [`cancel`]: cancellation events, tokens and the observers waits arm.
//! - [`wait`]: `async` waits on a futex.
//! - [`user`]: `sys_futex` decoding and user-word helpers.
//! - [`work_queue`] / [`executor`]: deferred execution of completions.
//! - [`spinlock`] / [`irq`]: the interrupt-masking lock everything above
//!   sits on.
//!
//! Interrupt masking and scheduler wakeups are injected by the kernel, so
//! the crate builds and tests on the host.
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod cancel;
pub mod executor;
pub mod futex;
pub mod irq;
pub mod spinlock;
pub mod user;
pub mod wait;
pub mod work_queue;

pub use cancel::{CancelHandler, CancellationEvent, CancellationObserver, CancellationToken};
pub use executor::ExecutorContext;
pub use futex::{Address, Completion, Futex, FutexNode, FutexState, SubmitOutcome};
pub use irq::{IrqControl, NoIrq, NO_IRQ};
#[cfg(feature = "x86_64")]
pub use irq::{X86Irq, X86_IRQ};
pub use spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use user::{FutexError, FutexOp, FUTEX_WAIT, FUTEX_WAKE};
pub use wait::{Wait, WaitOutcome};
pub use work_queue::{WorkQueue, Wakeup, Worklet};
