//! Trap/interrupt/syscall entry (spec.md §4.5). IDT gate construction and
//! the TSS.IST/RSP0 wiring that points a vector at the right stack are
//! mechanical x86 descriptor bring-up and out of scope (spec.md §1); what's
//! in scope, and written here, is the stub bodies themselves — "save this
//! register window, call the Rust dispatcher, restore" (spec.md §9) — and
//! the fast-syscall MSR setup.
//!
//! Grounded on the teacher's `trap.rs` shape (a `trapinit`/`trapinithart`
//! pair plus a dispatching entry point), rewired from RISC-V's
//! `stvec`/`sepc`/trampoline scheme to x86_64's `SYSCALL`/`SYSRET` and
//! IDT-vector model per CrowOS's `syscall.c`/`trap.c`.

use core::arch::global_asm;

use crate::arch::msr::{self, IA32_EFER, IA32_FMASK, IA32_LSTAR, IA32_STAR, IA32_TSC_AUX};
use crate::config::SYSCALLSTACK_TOP;
use crate::gdt;
use crate::proc;

/// The one software interrupt vector this kernel gives meaning to
/// (spec.md §4.5): callable from ring 3 (DPL=3), models a voluntary yield.
pub const T_YIELD: u8 = 0x80;

/// Saved general-purpose register window for a vectored trap, in the order
/// `yield_trap_entry`'s stub pushes them. Only used for vectors other than
/// the fast-syscall path, which has its own (smaller) scratch-stack layout.
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    // Hardware-pushed on every trap taken from ring 3:
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

extern "C" {
    fn syscall_entry();
    fn yield_trap_entry();
}

global_asm!(
    r#"
.global syscall_entry
syscall_entry:
    swapgs
    mov [{scratch_top} - 8], rsp
    mov [{scratch_top} - 16], rax
    lea rsp, [{scratch_top} - 16]
    push rcx
    push r11
    mov rcx, rdx
    mov rdx, rsi
    mov rsi, rdi
    mov rdi, rax
    call syscall_dispatch
    pop r11
    pop rcx
    mov rsp, [{scratch_top} - 8]
    swapgs
    sysretq

.global yield_trap_entry
yield_trap_entry:
    push 0              # error_code placeholder, this vector has none
    push {t_yield}       # vector
    push rax
    push rbx
    push rcx
    push rdx
    push rsi
    push rdi
    push rbp
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15
    mov rdi, rsp
    call kernel_trap
    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rbp
    pop rdi
    pop rsi
    pop rdx
    pop rcx
    pop rbx
    pop rax
    add rsp, 16
    iretq
"#,
    scratch_top = const SYSCALLSTACK_TOP,
    t_yield = const T_YIELD,
);

/// Programs the fast-syscall MSRs: `STAR` packs the kernel/user segment
/// selectors `SYSCALL`/`SYSRET` use, `LSTAR` is the entry point, `FMASK`
/// clears IF (and DF) on entry so the syscall stub never takes an
/// interrupt before it's reinstalled `GS_BASE`. Must run once per core.
pub fn init_syscall_msrs() {
    unsafe {
        let efer = msr::rdmsr(IA32_EFER);
        msr::wrmsr(IA32_EFER, efer | 1); // SCE: enable SYSCALL/SYSRET

        // STAR[47:32] = kernel CS (SS = CS+8 on SYSCALL); STAR[63:48] = user
        // CS base selector (SYSRET computes CS = base+16, SS = base+8, both
        // already carrying RPL 3 via gdt's selector constants).
        let star = (gdt::KERNEL_CODE as u64) << 32 | (gdt::USER_DATA as u64 - 8) << 48;
        msr::wrmsr(IA32_STAR, star);

        msr::wrmsr(IA32_LSTAR, syscall_entry as u64);
        msr::wrmsr(IA32_FMASK, 0x200 | 0x400); // IF | DF
        msr::wrmsr(IA32_TSC_AUX, crate::percpu::cpuid() as u64);
    }
}

/// Entry point for the syscall fast path (called from `syscall_entry`).
/// `num` is the syscall number; `a1..a3` are its up-to-three arguments.
#[no_mangle]
extern "C" fn syscall_dispatch(num: u64, a1: u64, a2: u64, a3: u64) -> i64 {
    crate::syscall::dispatch(num, a1, a2, a3)
}

/// Entry point for vectored traps (called from `yield_trap_entry`, and
/// would be called from any other vector's stub this kernel's out-of-scope
/// IDT bring-up wires up the same way).
#[no_mangle]
extern "C" fn kernel_trap(frame: *mut TrapFrame) {
    let vector = unsafe { (*frame).vector } as u8;
    match vector {
        T_YIELD => proc::yield_now(),
        other => panic!("kernel_trap: unhandled vector {other}"),
    }
}

/// Address of the yield stub, for the (out-of-scope) IDT-gate installer to
/// point `T_YIELD`'s gate at, with DPL=3.
pub fn yield_entry_addr() -> u64 {
    yield_trap_entry as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_frame_default_is_zeroed() {
        let f = TrapFrame::default();
        assert_eq!(f.vector, 0);
        assert_eq!(f.rax, 0);
    }
}
