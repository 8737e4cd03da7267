//! The two hand-written assembly stubs the scheduler and exec need directly.
//! Per spec.md §9 ("keep that stub minimal; move all logic to the Rust side"),
//! both are a handful of instructions; everything else (seeding what they read,
//! deciding when to call them) lives in `proc.rs`/`exec.rs`.

use core::arch::global_asm;

extern "C" {
    /// Saves the caller's callee-saved registers on the current stack, records the
    /// resulting `rsp` at `*old_rsp_out`, switches to `new_rsp`, and pops the
    /// callee-saved window waiting there. The "context" of spec.md §4.5 is exactly
    /// that saved register window — nothing about it is visible to, or needs
    /// representation in, Rust beyond the two `u64`s this function trades.
    pub fn context_switch(new_rsp: u64, old_rsp_out: *mut u64);

    /// Installed as the return address on a brand-new process's resume stack
    /// (`exec::seed_ring3_context`). When the scheduler's `context_switch` first
    /// switches to that process, execution falls through to here instead of
    /// returning from `context_switch` normally. Expects `r12..r15` to already
    /// hold `(argc, argv, user_rsp, entry)` — exactly the registers
    /// `context_switch`'s epilogue just popped — sets user segment registers, and
    /// `iretq`s to ring 3.
    pub fn jump_to_ring3() -> !;
}

global_asm!(
    r#"
.global context_switch
context_switch:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15
    mov [rsi], rsp
    mov rsp, rdi
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret

.global jump_to_ring3
jump_to_ring3:
    mov rdi, r12
    mov rsi, r13
    mov ax, {user_data}
    mov ds, ax
    mov es, ax
    push {user_data}
    push r14
    pushfq
    push {user_code}
    push r15
    iretq
"#,
    user_data = const crate::gdt::user_data_sel(),
    user_code = const crate::gdt::user_code_sel(),
);
