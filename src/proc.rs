//! Process table, state machine, and round-robin scheduler (spec.md §4.6).
//!
//! The "context" of a process is never a Rust struct — it's just the saved
//! register window on the resume stack that `asm::context_switch` pushes and
//! pops. A slot's own lock is held continuously across the boundary between
//! whichever code acquired it (the scheduler, about to dispatch; or the
//! process itself, about to yield/sleep/exit) and whichever code resumes past
//! the matching `context_switch` call — that's what lets `Spinlock`'s
//! same-cpu-recursive-acquire check stay correct without the lock ever being
//! "double-acquired": the two sides alternate, they never overlap.

use crate::arch::cr3;
use crate::arch::msr::{self, IA32_KERNEL_GS_BASE};
use crate::condvar::Condvar;
use crate::config::MAX_PROCESSES;
use crate::error::{KError, KResult};
use crate::percpu;
use crate::spinlock::Spinlock;
use crate::vm::{self, UserPagetable};
use crate::{asm, file};

use core::sync::atomic::{AtomicU32, Ordering};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    Unused,
    Used,
    Runnable,
    Running,
    Sleeping,
    Exited,
}

pub struct Proc {
    /// Guards every field below except `ofile`/`cwd`, which are private to the
    /// process and touched only while it's RUNNING — see `file.rs`.
    pub lock: Condvar,
    pub pid: u32,
    pub state: ProcState,
    /// Opaque resume stack pointer. Meaningless while RUNNING (the live value
    /// is on the CPU, not here); valid the instant the slot is anything else.
    pub resume_sp: u64,
    /// Physical address of this process's page-table root, or 0 if none yet.
    pub pagetable: u64,
    pub initial_data_segment: u64,
    pub brk: u64,
    /// 0 means "not sleeping on anything".
    pub waiting_channel: usize,
    pub exit_status: i32,
    pub ofile: [i32; crate::config::MAX_OPEN_FILES],
    pub cwd: u32,
    /// This process's user-mode GS base (spec.md §4.6). Loaded into
    /// IA32_KERNEL_GS_BASE just before dispatch so the first `swapgs` a
    /// syscall from this process executes swaps in the right value instead
    /// of whatever the previously-running process or core left behind.
    pub user_gs_base: u64,
}

impl Proc {
    const fn new() -> Self {
        Proc {
            lock: Condvar::new("proc"),
            pid: 0,
            state: ProcState::Unused,
            resume_sp: 0,
            pagetable: 0,
            initial_data_segment: 0,
            brk: 0,
            waiting_channel: 0,
            exit_status: 0,
            ofile: [-1; crate::config::MAX_OPEN_FILES],
            cwd: 0,
            user_gs_base: 0,
        }
    }
}

static mut PROCS: [Proc; MAX_PROCESSES] = {
    const fn p(_: usize) -> Proc {
        Proc::new()
    }
    [
        p(0), p(1), p(2), p(3), p(4), p(5), p(6), p(7),
        p(8), p(9), p(10), p(11), p(12), p(13), p(14), p(15),
        p(16), p(17), p(18), p(19), p(20), p(21), p(22), p(23),
        p(24), p(25), p(26), p(27), p(28), p(29), p(30), p(31),
        p(32), p(33), p(34), p(35), p(36), p(37), p(38), p(39),
        p(40), p(41), p(42), p(43), p(44), p(45), p(46), p(47),
        p(48), p(49), p(50), p(51), p(52), p(53), p(54), p(55),
        p(56), p(57), p(58), p(59), p(60), p(61), p(62), p(63),
    ]
};

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

fn alloc_pid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

fn slot(i: usize) -> &'static mut Proc {
    unsafe { &mut PROCS[i] }
}

/// The process currently RUNNING on this core, if any. `None` during boot,
/// in the scheduler's own idle gap, or in an interrupt that caught the cpu
/// between processes.
pub fn myproc() -> Option<&'static mut Proc> {
    percpu::push_off();
    let cpu = percpu::mycpu();
    let p = unsafe { (*cpu).running_process };
    percpu::pop_off();
    if p.is_null() {
        None
    } else {
        Some(unsafe { &mut *p })
    }
}

/// Finds an UNUSED slot, claims it, and gives it a fresh page table. Returns
/// with the slot's lock held — the caller (`exec`) fills in the rest and
/// either releases it (on failure, via `free_proc`) or marks it RUNNABLE and
/// releases it (on success).
pub fn alloc_proc() -> KResult<&'static mut Proc> {
    for i in 0..MAX_PROCESSES {
        let p = slot(i);
        p.lock.lock.acquire();
        if p.state != ProcState::Unused {
            p.lock.lock.release();
            continue;
        }

        p.pid = alloc_pid();
        p.state = ProcState::Used;
        match vm::user_pagetable_new() {
            Ok(UserPagetable { root }) => {
                p.pagetable = root;
                return Ok(p);
            }
            Err(e) => {
                p.state = ProcState::Unused;
                p.pid = 0;
                p.lock.lock.release();
                return Err(e);
            }
        }
    }
    Err(KError::NoSpace)
}

/// Tears down a slot's page table and resets it to UNUSED. Caller must hold
/// `p.lock.lock` and must only call this on a slot that is not RUNNING or
/// RUNNABLE elsewhere. Open files are closed by `exit`, not here.
fn free_proc(p: &mut Proc) {
    if p.pagetable != 0 {
        vm::user_pagetable_free(&UserPagetable { root: p.pagetable });
    }
    p.pagetable = 0;
    p.pid = 0;
    p.resume_sp = 0;
    p.initial_data_segment = 0;
    p.brk = 0;
    p.waiting_channel = 0;
    p.exit_status = 0;
    p.cwd = 0;
    p.ofile = [-1; crate::config::MAX_OPEN_FILES];
    p.user_gs_base = 0;
    p.state = ProcState::Unused;
}

/// Marks `p` RUNNABLE and releases its lock. Called by `exec` once a process
/// has been fully seeded and is ready for the scheduler to pick up.
pub fn make_runnable(p: &mut Proc) {
    p.state = ProcState::Runnable;
    p.lock.lock.release();
}

/// Undoes a successful `alloc_proc` when a later step of `exec` fails: tears
/// down the page table, resets the slot to UNUSED, and releases its lock
/// (spec.md §4.7 "Failure at any step unwinds ... return the slot to
/// UNUSED").
pub fn abort_alloc(p: &mut Proc) {
    free_proc(p);
    p.lock.lock.release();
}

/// Per-core scheduler loop (spec.md §4.6). Never returns: dispatching a
/// process resumes this call only once that process yields, sleeps, or
/// exits; an idle or exited slot falls straight through to the next one.
pub fn scheduler() -> ! {
    loop {
        crate::arch::irq::enable();

        for i in 0..MAX_PROCESSES {
            let p = slot(i);
            p.lock.lock.acquire();

            match p.state {
                ProcState::Runnable => {
                    p.state = ProcState::Running;
                    let cpu = percpu::mycpu();
                    unsafe {
                        (*cpu).running_process = p as *mut Proc;
                        cr3::write(p.pagetable);
                        // Pre-load this process's own gs base into the "other"
                        // slot so the first swapgs a syscall entry does (from
                        // ring 3, before this code ever runs again) swaps in
                        // the right value rather than a stale one.
                        msr::wrmsr(IA32_KERNEL_GS_BASE, p.user_gs_base);
                        asm::context_switch(p.resume_sp, &mut (*cpu).scheduler_resume_sp);
                        // Resumes here once the process yields, sleeps, or exits.
                        (*cpu).running_process = core::ptr::null_mut();
                    }
                }
                ProcState::Exited => {
                    free_proc(p);
                }
                _ => {}
            }

            p.lock.lock.release();
        }
    }
}

/// Switches from the calling process back to this core's scheduler. Caller
/// must already hold its own `p.lock.lock` and must have already set `state`
/// to whatever it should be once the scheduler sees it again (RUNNABLE,
/// SLEEPING, EXITED). Caller is responsible for releasing the lock once this
/// returns — the scheduler releases it for EXITED callers that never do.
fn scheduler_switch_back() {
    let p = myproc().expect("scheduler_switch_back: no running process");
    let cpu = percpu::mycpu();
    unsafe {
        asm::context_switch((*cpu).scheduler_resume_sp, &mut p.resume_sp);
    }
}

/// Voluntarily gives up the CPU for one round.
pub fn yield_now() {
    let p = myproc().expect("yield_now: no running process");
    p.lock.lock.acquire();
    p.state = ProcState::Runnable;
    scheduler_switch_back();
    p.lock.lock.release();
}

/// Puts the calling process to sleep on `chan`, releasing `lk` for the
/// duration (unless `lk` already is the caller's own process lock). Mirrors
/// the teacher's `sleep`/`wakeup` pair exactly; `lk` names whatever lock
/// currently protects the condition being waited on, not necessarily the
/// caller's own slot.
pub fn sleep(chan: usize, lk: &Spinlock) {
    let p = myproc().expect("sleep: no running process");
    let own_lock = core::ptr::eq(lk, &p.lock.lock);

    if !own_lock {
        p.lock.lock.acquire();
        lk.release();
    }

    p.waiting_channel = chan;
    p.state = ProcState::Sleeping;
    scheduler_switch_back();
    p.waiting_channel = 0;

    if !own_lock {
        p.lock.lock.release();
        lk.acquire();
    }
}

/// Wakes every process sleeping on `chan`, skipping the caller's own slot —
/// a process is never the one that needs waking from inside its own call,
/// and skipping it is what lets `exit` hold its own lock across the notify
/// (spec.md §4.3: "must not hold their own lock across a cross-process lock
/// acquisition").
pub fn wakeup(chan: usize) {
    let me = myproc().map(|p| p as *const Proc);
    for i in 0..MAX_PROCESSES {
        let p = slot(i);
        if me == Some(p as *const Proc) {
            continue;
        }
        p.lock.lock.acquire();
        if p.state == ProcState::Sleeping && p.waiting_channel == chan {
            p.state = ProcState::Runnable;
            p.waiting_channel = 0;
        }
        p.lock.lock.release();
    }
}

/// Like `wakeup`, but stops after the first match.
pub fn wakeup_one(chan: usize) {
    let me = myproc().map(|p| p as *const Proc);
    for i in 0..MAX_PROCESSES {
        let p = slot(i);
        if me == Some(p as *const Proc) {
            continue;
        }
        p.lock.lock.acquire();
        if p.state == ProcState::Sleeping && p.waiting_channel == chan {
            p.state = ProcState::Runnable;
            p.waiting_channel = 0;
            p.lock.lock.release();
            return;
        }
        p.lock.lock.release();
    }
}

/// Terminates the calling process. Never returns.
pub fn exit(status: i32) -> ! {
    let p = myproc().expect("exit: no running process");
    file::close_all(p);

    p.lock.lock.acquire();
    p.exit_status = status;
    p.state = ProcState::Exited;
    // Hold the lock through the notify (we skip our own slot in wakeup) and
    // into the switch-back, so no other core can see EXITED and reap us
    // before we've actually switched away.
    p.lock.notify_all();
    scheduler_switch_back();
    unreachable!("exit: resumed after being marked EXITED");
}

/// Blocks until process `pid` exits, then returns its exit status.
///
/// Known limitation: if the scheduler's own reap of an EXITED slot (see
/// `scheduler`) wins the race against a concurrent `wait(pid)` for the same
/// pid, the waiter observes the slot already back to UNUSED and reports
/// `NotFound` rather than the real exit status. The data model here carries
/// no parent-child relationship (spec.md §3 doesn't list one), so unlike
/// xv6's `wait_lock`-serialized reparent/wakeup dance, no slot is reserved
/// for a specific waiter to reap unilaterally.
pub fn wait(pid: u32) -> KResult<i32> {
    loop {
        let mut found = false;
        for i in 0..MAX_PROCESSES {
            let p = slot(i);
            p.lock.lock.acquire();
            if p.pid != pid || p.state == ProcState::Unused {
                p.lock.lock.release();
                continue;
            }
            found = true;
            if p.state == ProcState::Exited {
                let status = p.exit_status;
                free_proc(p);
                p.lock.lock.release();
                return Ok(status);
            }
            p.lock.wait();
            p.lock.lock.release();
            break;
        }
        if !found {
            return Err(KError::NotFound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_unused() {
        let p = Proc::new();
        assert_eq!(p.state, ProcState::Unused);
        assert_eq!(p.pid, 0);
        assert!(p.ofile.iter().all(|&fd| fd == -1));
    }

    #[test]
    fn pid_allocation_is_monotonic() {
        let a = alloc_pid();
        let b = alloc_pid();
        assert!(b > a);
    }
}
