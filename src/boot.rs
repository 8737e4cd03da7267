//! Boot protocol surface consumed from the (out-of-scope, spec.md §1) bootloader.
//! Shaped after Limine's response structures, since spec.md §6 explicitly calls the
//! protocol "Limine-style": a memory map, an HHDM offset, the kernel's physical/
//! virtual base, and per-core SMP entry points.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum MemmapKind {
    Usable = 0,
    Reclaimable = 1,
    Reserved = 2,
    AcpiNvs = 3,
    BadMemory = 4,
    KernelAndModules = 5,
}

#[derive(Clone, Copy, Debug)]
pub struct MemmapEntry {
    pub base: u64,
    pub length: u64,
    pub kind: MemmapKind,
}

#[derive(Clone, Copy, Debug)]
pub struct HhdmResponse {
    pub offset: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct KernelAddressResponse {
    pub physical_base: u64,
    pub virtual_base: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct SmpCpu {
    pub processor_id: u32,
    pub lapic_id: u32,
    /// Written by the boot CPU; the firmware starts the slave core by jumping to
    /// whatever function pointer is stored here.
    pub goto_address: u64,
}

pub struct BootInfo<'a> {
    pub memmap: &'a [MemmapEntry],
    pub hhdm: HhdmResponse,
    pub kernel_address: KernelAddressResponse,
    pub cpus: &'a [SmpCpu],
}

impl MemmapEntry {
    pub fn is_usable(&self) -> bool {
        self.kind == MemmapKind::Usable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_usable_kind_is_usable() {
        let e = MemmapEntry { base: 0, length: 4096, kind: MemmapKind::Reserved };
        assert!(!e.is_usable());
        let e = MemmapEntry { base: 0, length: 4096, kind: MemmapKind::Usable };
        assert!(e.is_usable());
    }
}
