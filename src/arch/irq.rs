//! Interrupt-flag control (`cli`/`sti`), used by `percpu::push_off`/`pop_off` and
//! by the scheduler loop's brief re-enable (spec.md §4.6 step 1).

use core::arch::asm;

pub fn enabled() -> bool {
    let flags: u64;
    unsafe {
        asm!("pushfq", "pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags & (1 << 9) != 0 // IF
}

/// # Safety: disabling interrupts is always sound; callers rely on the
/// `push_off`/`pop_off` nesting discipline to avoid masking them forever.
pub fn disable() {
    unsafe { asm!("cli", options(nomem, nostack)) };
}

pub fn enable() {
    unsafe { asm!("sti", options(nomem, nostack)) };
}
