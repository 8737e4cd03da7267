//! Condition variable layered on a spinlock (spec.md §4.3). The wait-channel is
//! simply the `Condvar`'s own address — `proc::sleep`/`proc::wakeup` match sleepers
//! to notifiers by comparing that address against each slot's `waiting_channel`.

use crate::proc;
use crate::spinlock::Spinlock;

pub struct Condvar {
    pub lock: Spinlock,
}

impl Condvar {
    pub const fn new(name: &'static str) -> Self {
        Condvar {
            lock: Spinlock::new(name),
        }
    }

    /// Caller must already hold `self.lock`. Atomically marks the current process
    /// SLEEPING on this channel, releases the lock, and context-switches to the
    /// scheduler; reacquires the lock before returning.
    pub fn wait(&self) {
        debug_assert!(self.lock.holding(), "condvar::wait without the lock held");
        let chan = self as *const Condvar as usize;
        proc::sleep(chan, &self.lock);
    }

    /// Wakes at most one process waiting on this channel.
    pub fn notify_one(&self) {
        let chan = self as *const Condvar as usize;
        proc::wakeup_one(chan);
    }

    /// Wakes every process waiting on this channel.
    pub fn notify_all(&self) {
        let chan = self as *const Condvar as usize;
        proc::wakeup(chan);
    }
}

unsafe impl Sync for Condvar {}
