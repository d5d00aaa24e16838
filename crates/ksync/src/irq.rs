// =============================================================================
// MinimalOS NextGen — Interrupt Masking
// =============================================================================
//
// Every lock in this crate that can be taken from interrupt context must mask
// interrupts on the current core first. Otherwise:
//     1. Thread A holds lock L with interrupts enabled
//     2. Interrupt fires on same core
//     3. Interrupt handler tries to acquire lock L
//     4. DEADLOCK: the handler spins forever because Thread A can't release
//        the lock until the handler returns
//
// The previous interrupt state is saved on acquire and restored exactly on
// release, so nested lock/unlock pairs work correctly.
//
// The mechanism is injected (`&'static dyn IrqControl`) rather than compiled
// in: the kernel passes `X86Irq`, host tests pass `NoIrq` or their own
// recording implementation.
// =============================================================================

/// Per-core interrupt masking.
pub trait IrqControl: Sync {
    /// Mask maskable interrupts on the current core.
    ///
    /// Returns whether they were enabled before the call, to be handed back
    /// to [`restore`](IrqControl::restore).
    fn save_and_disable(&self) -> bool;

    /// Undo one [`save_and_disable`](IrqControl::save_and_disable).
    fn restore(&self, was_enabled: bool);
}

/// Interrupt control for contexts with no interrupts to mask: host threads
/// and early boot before the IDT is loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIrq;

impl IrqControl for NoIrq {
    #[inline]
    fn save_and_disable(&self) -> bool {
        false
    }

    #[inline]
    fn restore(&self, _was_enabled: bool) {}
}

/// Shared `NoIrq` instance for constructors that want a `&'static`.
pub static NO_IRQ: NoIrq = NoIrq;

/// RFLAGS.IF based masking for x86_64 cores.
#[cfg(feature = "x86_64")]
#[derive(Debug, Default, Clone, Copy)]
pub struct X86Irq;

#[cfg(feature = "x86_64")]
impl IrqControl for X86Irq {
    #[inline(always)]
    fn save_and_disable(&self) -> bool {
        use x86_64::instructions::interrupts;

        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        was_enabled
    }

    #[inline(always)]
    fn restore(&self, was_enabled: bool) {
        // Only re-enable if they were on before: an interrupt handler taking a
        // lock must leave IF clear on the way out.
        if was_enabled {
            x86_64::instructions::interrupts::enable();
        }
    }
}

/// Shared `X86Irq` instance handed to the futex table and work queues.
#[cfg(feature = "x86_64")]
pub static X86_IRQ: X86Irq = X86Irq;
