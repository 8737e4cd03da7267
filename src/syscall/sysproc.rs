//! Process-lifecycle and clock syscall handlers (spec.md §6). Grounded on
//! the teacher's `syscall/sysproc.rs` shape (thin wrappers around the real
//! `proc.rs` operations) with xv6's `fork`/`kill`/`getpid` family dropped —
//! this kernel's process model has no fork (spec.md §1 Non-goals) — in favor
//! of `sbrk`/`exit`/`wait`/`sleep`/`time`.

use crate::arch::tsc;
use crate::error::KResult;
use crate::proc::{self, Proc};

pub fn sys_sbrk(p: &mut Proc, delta: u64) -> KResult<i64> {
    let old_brk = p.brk;
    let new_brk = crate::vm::sbrk(p.pagetable, p.initial_data_segment, old_brk, delta as i64)?;
    p.brk = new_brk;
    Ok(old_brk as i64)
}

/// Never returns — `dispatch`'s `SYS_EXIT` arm relies on `!` coercing to
/// whatever its match expression's type turns out to be.
pub fn sys_exit(_p: &mut Proc, code: u64) -> ! {
    proc::exit(code as i32)
}

pub fn sys_wait(pid: u64) -> KResult<i64> {
    let status = proc::wait(pid as u32)?;
    Ok(status as i64)
}

/// Polls the TSC-derived monotonic clock, yielding the CPU each round
/// (spec.md §5: "`sleep` is the only timeout primitive and is polled against
/// a TSC-derived monotonic clock" — no timer wheel in this kernel).
pub fn sys_sleep(msec: u64) -> KResult<i64> {
    let target = tsc::now_ms() + msec;
    while tsc::now_ms() < target {
        proc::yield_now();
    }
    Ok(0)
}

pub fn sys_time() -> i64 {
    tsc::now_ms() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sys_time_is_nonnegative() {
        assert!(sys_time() >= 0);
    }
}
