//! Local-interrupt suppression.
//!
//! Per-core data in the cokernel (most prominently the per-core free-chunk
//! cache) is touched by exactly one core and therefore needs no lock; its
//! only hazard is an interrupt handler on the same core re-entering the
//! structure mid-mutation. [`IrqGuard`] closes that window: it saves the
//! local interrupt state, disables interrupts, and restores the prior state
//! on drop.
//!
//! On bare-metal x86-64 (`target_os = "none"`) this uses `pushfq`/`cli`/
//! `sti`. On hosted targets the guard compiles to a no-op so the crates
//! using it stay testable on a development machine, where interrupt masking
//! is neither possible nor meaningful.

use crate::{Mutex, MutexGuard, RawLock, RawUnlock};

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    /// Snapshot the IF bit, then disable interrupts. Returns whether they
    /// were enabled.
    ///
    /// # Privilege
    ///
    /// `cli` and `pushfq` must be legal in the current execution context
    /// (kernel or a suitable hypervisor context).
    #[inline]
    pub fn save_and_disable() -> bool {
        let rflags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(nostack, preserves_flags));
        }
        let enabled = (rflags & (1 << 9)) != 0;
        if enabled {
            unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
        }
        enabled
    }

    /// Re-enable interrupts if `enabled` says they were on before.
    #[inline]
    pub fn restore(enabled: bool) {
        if enabled {
            unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    // Hosted build: no interrupt flag to manipulate.
    #[inline]
    pub const fn save_and_disable() -> bool {
        false
    }

    #[inline]
    pub const fn restore(_enabled: bool) {}
}

/// RAII guard that disables local interrupts on creation and restores the
/// prior state on drop.
///
/// Nesting is safe: an inner guard observes interrupts already disabled and
/// leaves them disabled when it drops; only the outermost guard re-enables.
///
/// # Examples
///
/// ```no_run
/// use cokernel_sync::IrqGuard;
///
/// {
///     let _g = IrqGuard::new();
///     // per-core state may be mutated here without interrupt reentrancy
/// }
/// // prior interrupt state restored
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            were_enabled: arch::save_and_disable(),
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        arch::restore(self.were_enabled);
    }
}

/// A mutex guard that also disables interrupts while held.
///
/// Created via [`Mutex::lock_irq`]: interrupts are disabled first, then the
/// mutex is acquired; both are released in reverse order on drop. This
/// prevents an interrupt handler from preempting the critical section and
/// re-entering code that uses the same lock on the same core.
pub struct IrqMutex<'a, T, R: RawLock + RawUnlock> {
    _irq: IrqGuard,
    guard: MutexGuard<'a, T, R>,
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Acquires the mutex with interrupts disabled for the guard's lifetime.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutex<'_, T, R> {
        let ig = IrqGuard::new();
        let g = self.lock();
        IrqMutex { _irq: ig, guard: g }
    }
}

impl<T, R: RawLock + RawUnlock> core::ops::Deref for IrqMutex<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, R: RawLock + RawUnlock> core::ops::DerefMut for IrqMutex<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
