//! Thin inline-asm wrappers around the x86_64 register operations the rest of the
//! kernel needs (MSRs, CR3, TSC, interrupt-flag control). GDT/IDT/TSS construction
//! itself is out of scope (spec.md §1) — the helpers here are the ones called out
//! by name in §4.4/§4.5 (TSC_AUX, fast-syscall MSRs, CR3 switch).

pub mod msr;
pub mod irq;
pub mod tsc;
pub mod cr3;
