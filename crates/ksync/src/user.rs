//! [073] Futex syscall helpers: user words on top of the futex engine.
//!
//! Provides two operations:
//!   - `FUTEX_WAIT(addr, expected)`: if `*addr == expected`, queue the
//!	 caller on `addr` until a `FUTEX_WAKE` (or cancellation).
//!   - `FUTEX_WAKE(addr, count)`: wake up to `count` waiters on `addr`,
//!	 `u64::MAX` meaning all of them.
//!
//! The futex word is a naturally aligned `u32`. The comparison against
//! `expected` runs inside the table's critical section, so a `FUTEX_WAKE`
//! issued after the user changed the word can never be missed.

use core::fmt;
use core::mem;
use core::pin::Pin;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::cancel::CancellationToken;
use crate::futex::{Address, Completion, Futex, FutexNode, SubmitOutcome};

/// Futex operation: wait if `*addr == expected`.
pub const FUTEX_WAIT: u64 = 0;
/// Futex operation: wake up to `count` waiters on `addr`.
pub const FUTEX_WAKE: u64 = 1;

/// A decoded `sys_futex(addr, op, val)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexOp {
	Wait { address: Address, expected: u32 },
	Wake { address: Address, count: u64 },
}

/// Why a `sys_futex` request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexError {
	/// `op` is neither `FUTEX_WAIT` nor `FUTEX_WAKE`.
	UnknownOp(u64),
	/// The futex word is not 4-byte aligned.
	Misaligned(u64),
	/// `FUTEX_WAIT` with an expected value that does not fit the word.
	ValueOutOfRange(u64),
}

impl fmt::Display for FutexError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FutexError::UnknownOp(op) => write!(f, "unknown futex op {}", op),
			FutexError::Misaligned(addr) => write!(f, "futex word {:#x} is not 4-byte aligned", addr),
			FutexError::ValueOutOfRange(val) => write!(f, "futex value {:#x} does not fit in 32 bits", val),
		}
	}
}

impl FutexOp {
	/// Decode the raw syscall arguments.
	pub fn decode(addr: u64, op: u64, val: u64) -> Result<Self, FutexError> {
		if addr % mem::align_of::<u32>() as u64 != 0 {
			return Err(FutexError::Misaligned(addr));
		}
		let address = addr as Address;

		match op {
			FUTEX_WAIT => {
				let expected = u32::try_from(val).map_err(|_| FutexError::ValueOutOfRange(val))?;
				Ok(FutexOp::Wait { address, expected })
			}
			FUTEX_WAKE => Ok(FutexOp::Wake { address, count: val }),
			_ => {
				klog::warn!("[futex] unknown op={}", op);
				Err(FutexError::UnknownOp(op))
			}
		}
	}

	pub fn address(&self) -> Address {
		match *self {
			FutexOp::Wait { address, .. } | FutexOp::Wake { address, .. } => address,
		}
	}
}

/// Read the futex word at `address`.
///
/// # Safety
/// `address` must point to a live `u32` for the duration of the call.
///
/// # Panics
/// If `address` is not 4-byte aligned.
pub unsafe fn load_word(address: Address) -> u32 {
	assert!(
		address % mem::align_of::<u32>() == 0,
		"futex word {:#x} is not 4-byte aligned",
		address
	);
	// SAFETY: aligned (checked above) and live (caller contract).
	unsafe { (*(address as *const AtomicU32)).load(Ordering::Acquire) }
}

/// `FUTEX_WAIT` on a word the kernel can reference directly.
pub fn submit_word_wait<C>(
	futex: &Futex,
	word: &AtomicU32,
	expected: u32,
	node: Pin<&FutexNode<C>>,
	cancellation: CancellationToken,
) -> SubmitOutcome
where
	C: Completion + Sync,
{
	let address = word as *const AtomicU32 as Address;
	futex.check_submit_wait(address, || word.load(Ordering::Acquire) == expected, node, cancellation)
}

/// `FUTEX_WAIT` on a word given by address (the syscall path).
///
/// # Safety
/// `address` must point to a live, aligned `u32` for the duration of the
/// call.
pub unsafe fn submit_user_wait<C>(
	futex: &Futex,
	address: Address,
	expected: u32,
	node: Pin<&FutexNode<C>>,
	cancellation: CancellationToken,
) -> SubmitOutcome
where
	C: Completion + Sync,
{
	// SAFETY: forwarded caller contract.
	futex.check_submit_wait(address, || unsafe { load_word(address) } == expected, node, cancellation)
}

/// `FUTEX_WAKE`: wake up to `count` waiters on `address`.
///
/// Returns the number of waiters dequeued.
pub fn wake_word(futex: &Futex, address: Address, count: u64) -> usize {
	if count == u64::MAX {
		return futex.wake(address);
	}
	let count = usize::try_from(count).unwrap_or(usize::MAX);
	futex.wake_n(address, count)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::irq::NO_IRQ;
	use core::sync::atomic::AtomicUsize;
	use std::boxed::Box;
	use std::string::ToString;
	use std::sync::Arc;

	#[test]
	fn decode_accepts_known_ops() {
		assert_eq!(
			FutexOp::decode(0x1000, FUTEX_WAIT, 7),
			Ok(FutexOp::Wait { address: 0x1000, expected: 7 })
		);
		assert_eq!(
			FutexOp::decode(0x1004, FUTEX_WAKE, u64::MAX),
			Ok(FutexOp::Wake { address: 0x1004, count: u64::MAX })
		);
		assert_eq!(FutexOp::decode(0x1004, FUTEX_WAKE, 1).map(|op| op.address()), Ok(0x1004));
	}

	#[test]
	fn decode_rejects_bad_requests() {
		assert_eq!(FutexOp::decode(0x1000, 9, 0), Err(FutexError::UnknownOp(9)));
		assert_eq!(FutexOp::decode(0x1002, FUTEX_WAIT, 0), Err(FutexError::Misaligned(0x1002)));
		assert_eq!(
			FutexOp::decode(0x1000, FUTEX_WAIT, 1 << 32),
			Err(FutexError::ValueOutOfRange(1 << 32))
		);
		assert_eq!(FutexError::UnknownOp(9).to_string(), "unknown futex op 9");
	}

	#[test]
	fn load_word_reads_current_value() {
		let word = AtomicU32::new(41);
		let address = &word as *const AtomicU32 as Address;
		word.store(42, Ordering::Release);
		assert_eq!(unsafe { load_word(address) }, 42);
	}

	#[test]
	#[should_panic(expected = "not 4-byte aligned")]
	fn load_word_rejects_misaligned_address() {
		let words = [AtomicU32::new(0), AtomicU32::new(0)];
		let address = &words[0] as *const AtomicU32 as Address + 2;
		let _ = unsafe { load_word(address) };
	}

	#[test]
	fn changed_word_skips_the_wait() {
		let futex = Futex::new(&NO_IRQ);
		let word = AtomicU32::new(0);
		let node = Box::pin(FutexNode::new(|| {}));

		word.store(1, Ordering::Release);
		let outcome = submit_word_wait(&futex, &word, 0, node.as_ref(), CancellationToken::none());
		assert_eq!(outcome, SubmitOutcome::ConditionFalse);
		assert!(futex.is_empty());
	}

	#[test]
	fn user_wait_then_wake_word() {
		let futex = Futex::new(&NO_IRQ);
		let word = AtomicU32::new(3);
		let address = &word as *const AtomicU32 as Address;
		let hits = Arc::new(AtomicUsize::new(0));

		let nodes: [_; 3] = core::array::from_fn(|_| {
			let hits = Arc::clone(&hits);
			Box::pin(FutexNode::new(move || {
				hits.fetch_add(1, Ordering::SeqCst);
			}))
		});
		for node in &nodes {
			let outcome = unsafe { submit_user_wait(&futex, address, 3, node.as_ref(), CancellationToken::none()) };
			assert!(outcome.is_waiting());
		}

		assert_eq!(wake_word(&futex, address, 1), 1);
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		assert_eq!(wake_word(&futex, address, u64::MAX), 2);
		assert_eq!(hits.load(Ordering::SeqCst), 3);
		assert_eq!(wake_word(&futex, address, u64::MAX), 0);
	}
}
