//! Segment selectors. The GDT/TSS descriptors themselves are mechanical x86
//! boilerplate and out of scope (spec.md §1); this module only names the
//! selector values the rest of the kernel must agree on — the fast-syscall MSR
//! setup (`trap::init_syscall_msrs`) and the ring-3 trampoline (`asm::jump_to_ring3`)
//! both index into whatever GDT the (assumed, out-of-scope) bring-up code installs,
//! so the two are kept next to each other here rather than hardcoded twice.

pub const KERNEL_CODE: u16 = 0x08;
pub const KERNEL_DATA: u16 = 0x10;
pub const USER_DATA: u16 = 0x18;
pub const USER_CODE: u16 = 0x20;

pub const RPL3: u16 = 3;

pub const fn user_data_sel() -> u16 {
    USER_DATA | RPL3
}

pub const fn user_code_sel() -> u16 {
    USER_CODE | RPL3
}
