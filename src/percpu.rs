//! Per-CPU context (spec.md §4.4), reached through the x86_64 GS-base segment
//! register rather than a flat array indexed by a CSR the way the teacher's RISC-V
//! `tp`-register scheme did; the fields carried over are the same ones
//! (`original_source`'s `cpu_local_data` in `kernel/cpu/smp.h`, and the teacher's
//! `Cpu`/`CPUS` in `proc.rs`): cpu id, LAPIC base, running-process pointer, and an
//! interrupt-enable nesting depth (push_off/pop_off).

use core::ptr::null_mut;

use crate::arch::msr;
use crate::config::MAX_CORES;
use crate::proc::Proc;

/// IA32_GS_BASE. Swapped with IA32_KERNEL_GS_BASE across the ring-3 boundary by
/// `swapgs`; while in kernel code, GS_BASE always points at this core's `PerCpu`.
const IA32_GS_BASE: u32 = 0xC000_0101;

#[repr(C)]
pub struct PerCpu {
    pub cpuid: usize,
    pub lapic_base: usize,
    pub running_process: *mut Proc,
    /// Depth of push_off() nesting.
    pub noff: u16,
    /// Were interrupts enabled before the first push_off()?
    pub intena: bool,
    /// This core's own resume stack pointer while a process is RUNNING on it —
    /// the scheduler's half of the `context_switch` handshake (proc.rs).
    pub scheduler_resume_sp: u64,
}

impl PerCpu {
    const fn new(cpuid: usize) -> Self {
        PerCpu {
            cpuid,
            lapic_base: 0,
            running_process: null_mut(),
            noff: 0,
            intena: false,
            scheduler_resume_sp: 0,
        }
    }
}

static mut CPUS: [PerCpu; MAX_CORES] = {
    // const-eval can't build an array from a non-Copy closure capturing an index,
    // so this is written out the long way — matches the teacher's own
    // `[Default::default(); NCPU]` intent but without requiring `Default`.
    const fn cpu(i: usize) -> PerCpu {
        PerCpu::new(i)
    }
    [
        cpu(0), cpu(1), cpu(2), cpu(3),
        cpu(4), cpu(5), cpu(6), cpu(7),
    ]
};

/// Installs this core's `PerCpu` record as its GS_BASE. Must run once per core,
/// before anything else on that core touches `mycpu()`.
pub fn init(id: usize) {
    unsafe {
        let ptr = core::ptr::addr_of_mut!(CPUS[id]);
        msr::wrmsr(IA32_GS_BASE, ptr as u64);
    }
}

/// Must be called with interrupts disabled — cpuid is undefined if we migrate
/// cores between reading GS_BASE and using the result.
pub fn cpuid() -> usize {
    unsafe { (*mycpu()).cpuid }
}

/// Returns this core's `PerCpu` record via GS_BASE. Caller must ensure interrupts
/// are disabled for the duration of use, same caveat as `cpuid()`.
pub fn mycpu() -> *mut PerCpu {
    unsafe { msr::rdmsr(IA32_GS_BASE) as *mut PerCpu }
}

/// Disables interrupts, tracking nesting depth so pairs of push_off/pop_off can be
/// nested without an inner pop_off re-enabling interrupts a caller still expects
/// masked.
pub fn push_off() {
    let enabled = crate::arch::irq::enabled();
    crate::arch::irq::disable();
    unsafe {
        let cpu = &mut *mycpu();
        if cpu.noff == 0 {
            cpu.intena = enabled;
        }
        cpu.noff += 1;
    }
}

pub fn pop_off() {
    unsafe {
        let cpu = &mut *mycpu();
        if crate::arch::irq::enabled() {
            panic!("pop_off: interrupts enabled on entry");
        }
        if cpu.noff == 0 {
            panic!("pop_off: unbalanced with push_off");
        }
        cpu.noff -= 1;
        if cpu.noff == 0 && cpu.intena {
            crate::arch::irq::enable();
        }
    }
}
