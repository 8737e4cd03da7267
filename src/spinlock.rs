//! Test-and-set spinlock with holder-CPU tracking (spec.md §4.3).
//!
//! Does **not** disable interrupts. The kernel's own convention — interrupts stay
//! masked throughout kernel execution except in the scheduler's idle gap and during
//! ring-3 execution — is what makes that safe; see spec.md §9 for the preemptible-
//! kernel extension this would need.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::percpu::cpuid;

const NO_HOLDER: usize = usize::MAX;

pub struct Spinlock {
    locked: AtomicBool,
    holder: AtomicUsize,
    name: &'static str,
}

impl Spinlock {
    pub const fn new(name: &'static str) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            holder: AtomicUsize::new(NO_HOLDER),
            name,
        }
    }

    pub fn acquire(&self) {
        if self.held_by_current_cpu() {
            panic!("spinlock: recursive acquire of {}", self.name);
        }

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        core::sync::atomic::fence(Ordering::SeqCst);
        self.holder.store(cpuid(), Ordering::Relaxed);
    }

    pub fn release(&self) {
        if !self.held_by_current_cpu() {
            panic!("spinlock: {} not held by this cpu on release", self.name);
        }

        self.holder.store(NO_HOLDER, Ordering::Relaxed);
        core::sync::atomic::fence(Ordering::SeqCst);
        self.locked.store(false, Ordering::Release);
    }

    /// Plain read — atomic on its own on x86_64, no fence needed. Used by
    /// assertions that a lock is (or isn't) held without taking it.
    pub fn holding(&self) -> bool {
        self.held_by_current_cpu()
    }

    fn held_by_current_cpu(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.holder.load(Ordering::Relaxed) == cpuid()
    }
}

// Safety: the struct's invariants (locked <=> holder identifies the owning core)
// are maintained entirely through the atomics above.
unsafe impl Sync for Spinlock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_is_not_held() {
        let lk = Spinlock::new("test");
        assert!(!lk.holding());
    }

    #[test]
    fn acquire_then_release_clears_holder() {
        let lk = Spinlock::new("test");
        lk.acquire();
        assert!(lk.holding());
        lk.release();
        assert!(!lk.holding());
    }

    #[test]
    #[should_panic(expected = "recursive acquire")]
    fn recursive_acquire_is_fatal() {
        let lk = Spinlock::new("test");
        lk.acquire();
        lk.acquire();
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn release_without_acquire_is_fatal() {
        let lk = Spinlock::new("test");
        lk.release();
    }
}
