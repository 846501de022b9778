//! # Cokernel synchronization primitives
//!
//! Spin-based mutual exclusion for code that must never block or suspend.
//! The allocator paths in this kernel are either instantaneous or return a
//! failure sentinel, so every critical section here is short and a spinning
//! lock is the right tool.
//!
//! Two raw lock flavors are provided behind the generic [`Mutex`]:
//!
//! - [`RawSpin`] — a TATAS spinlock; cheapest in the uncontended case.
//! - [`RawTicket`] — a FIFO ticket lock; fair under contention, used for
//!   locks that many cores hammer (e.g. a NUMA node's free tree).
//!
//! [`IrqGuard`] suppresses local interrupts for the duration of a scope so
//! that per-core data can be mutated without being re-entered by an interrupt
//! handler on the same core. [`Mutex::lock_irq`] combines both.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_spin;
mod raw_ticket;

pub use irq::{IrqGuard, IrqMutex};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use raw_ticket::RawTicket;

pub type SpinMutex<T> = Mutex<T, RawSpin>;
pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

pub trait RawUnlock {
    unsafe fn raw_unlock(&self);
}
