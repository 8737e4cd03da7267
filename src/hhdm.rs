//! High-half direct map bookkeeping (spec.md §3 GLOSSARY: "a 1:1 virtual mapping of
//! all physical memory at a fixed offset, supplied by the bootloader"). Mirrors
//! `original_source`'s `hhdm_offset`/`V2P`/`P2V` (`kernel/mem/mem.h`).

use core::sync::atomic::{AtomicU64, Ordering};

static OFFSET: AtomicU64 = AtomicU64::new(0);

/// Set exactly once, at boot, from the bootloader's HHDM response (`boot::BootInfo`).
pub fn init(offset: u64) {
    OFFSET.store(offset, Ordering::Relaxed);
}

fn offset() -> u64 {
    OFFSET.load(Ordering::Relaxed)
}

/// Virtual-to-physical: strips the HHDM offset from a direct-map address.
pub fn v2p(virt: u64) -> u64 {
    virt - offset()
}

/// Physical-to-virtual: the HHDM view of a physical address.
pub fn p2v(phys: u64) -> u64 {
    phys + offset()
}
