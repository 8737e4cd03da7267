//! Kernel entry and boot sequence (spec.md §2, §6). GDT/IDT/TSS construction
//! and the bootloader protocol itself are out of scope (spec.md §1) — this
//! file assumes a Limine-style loader has already handed control to `kmain`
//! in long mode with paging enabled, and that whatever thin bring-up shim
//! calls `kmain` has already parsed the loader's responses into a
//! `boot::BootInfo` and has concrete `Uart`/`BlockDevice`/`BlockFs`
//! implementations ready to hand in — those three are external collaborators
//! (spec.md §6) this crate never implements itself.
//!
//! Built as both a `bin` and a `lib` (see `Cargo.toml`): the `kernel_as_a_lib`
//! feature is for an external bring-up binary that owns the real entry
//! symbol and Limine request/response plumbing, then calls `kmain` directly;
//! without it, this crate's own (minimal, out-of-scope) `_start` calls it.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(any(test, feature = "kernel_as_a_lib")), no_main)]

mod arch;
mod asm;
mod block;
mod boot;
mod condvar;
mod config;
mod console;
mod elf;
mod error;
mod exec;
mod file;
mod fs;
mod gdt;
mod hhdm;
mod kalloc;
mod log_setup;
mod pagecache;
mod percpu;
mod proc;
mod spinlock;
mod syscall;
mod trap;
mod vm;

#[cfg(not(test))]
use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("{info}");
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt");
        }
    }
}

const INIT_PATH: &[u8] = b"/init";

/// Runs on the boot core once paging, HHDM, and the kernel's own page table
/// are already live. Brings up every in-scope subsystem in dependency order,
/// installs the out-of-scope collaborators the caller supplies, spawns
/// `/init`, and falls into the scheduler. Never returns.
pub fn kmain(
    boot: &boot::BootInfo,
    uart: &'static dyn console::Uart,
    block_device: &'static dyn block::BlockDevice,
    fs: &'static dyn fs::inode::BlockFs,
) -> ! {
    hhdm::init(boot.hhdm.offset);
    vm::set_kernel_pagetable(arch::cr3::read());
    percpu::init(0);

    kalloc::init(boot);
    pagecache::init();

    trap::init_syscall_msrs();

    block::install(block_device);
    fs::inode::install(fs);
    console::init(uart);
    file::register_device(file::CONSOLE_MAJOR, console::device());

    log_setup::init();
    log::info!("boot core online, {} cpu(s) reported by loader", boot.cpus.len());

    match exec::exec(INIT_PATH, &[INIT_PATH]) {
        Ok(pid) => log::info!("spawned {:?} as pid {pid}", core::str::from_utf8(INIT_PATH)),
        Err(e) => panic!("failed to exec {:?}: {e:?}", core::str::from_utf8(INIT_PATH)),
    }

    proc::scheduler();
}

/// Runs on an application core once the boot core has pointed its loader-
/// provided `goto_address` here (spec.md §6's `smp.cpus[].goto_address`;
/// the actual cross-core kick is out-of-scope mechanical bring-up). The
/// kernel page table and fast-syscall MSRs are per-core state and must be
/// re-installed; the frame allocator, page cache, and device table are
/// already shared and initialized by the boot core.
pub fn ap_main(cpuid: usize) -> ! {
    percpu::init(cpuid);
    vm::set_kernel_pagetable(vm::kernel_pagetable());
    trap::init_syscall_msrs();
    log::info!("core {cpuid} online");
    proc::scheduler();
}

/// Real entry symbol for the standalone `bin` build. A genuine Limine entry
/// needs request/response sections this crate doesn't define (spec.md §1
/// treats the loader protocol as an external collaborator); this stub exists
/// only so `cargo build` produces a linkable binary; an actual boot image is
/// expected to build with `kernel_as_a_lib` and supply its own entry point
/// and collaborators.
#[cfg(not(any(test, feature = "kernel_as_a_lib")))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_path_is_nul_free_and_absolute() {
        assert_eq!(INIT_PATH[0], b'/');
        assert!(!INIT_PATH.contains(&0));
    }
}
