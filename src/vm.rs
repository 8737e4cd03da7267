//! 4-level x86_64 virtual memory manager (spec.md §4.2). PTE bit layout and the
//! walk/map/allocate/io-map/user-pagetable-lifecycle/sbrk/memcpy_user operations
//! are grounded on `original_source`'s `kernel/mem/vmm.c`/`.h`; the `walk`/
//! `mappages`-style shape (panic-on-remap, `Option<&mut Pte>` return) follows the
//! teacher's own `vm.rs`, adapted from three RISC-V Sv39 levels to four x86_64
//! levels.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::{self, PAGE_SIZE};
use crate::error::{KError, KResult};
use crate::hhdm;
use crate::kalloc;

/// One page-table entry. Bit layout carried over from `original_source`'s
/// `struct pte_t` (`kernel/mem/vmm.h`): present, rw, us, pwt, pct, accessed, dirty,
/// huge, global, 3 ignored bits, 34-bit frame number, 6 reserved bits, 11 ignored
/// bits, xd.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(pub u64);

const PTE_PRESENT: u64 = 1 << 0;
const PTE_WRITABLE: u64 = 1 << 1;
const PTE_USER: u64 = 1 << 2;
const PTE_PWT: u64 = 1 << 3;
const PTE_PCD: u64 = 1 << 4;
const PTE_ACCESSED: u64 = 1 << 5;
const PTE_DIRTY: u64 = 1 << 6;
const PTE_HUGE: u64 = 1 << 7;
const PTE_GLOBAL: u64 = 1 << 8;
const PTE_ADDR_SHIFT: u32 = 12;
const PTE_ADDR_MASK: u64 = 0x0000_000f_ffff_f000; // 34-bit frame number, shifted
const PTE_XD: u64 = 1 << 63;

impl Pte {
    pub const fn empty() -> Self {
        Pte(0)
    }

    pub fn present(&self) -> bool {
        self.0 & PTE_PRESENT != 0
    }

    pub fn writable(&self) -> bool {
        self.0 & PTE_WRITABLE != 0
    }

    pub fn user(&self) -> bool {
        self.0 & PTE_USER != 0
    }

    pub fn executable(&self) -> bool {
        self.0 & PTE_XD == 0
    }

    pub fn address(&self) -> u64 {
        self.0 & PTE_ADDR_MASK
    }

    fn leaf(addr: u64, perm: Perm) -> Self {
        let mut bits = PTE_PRESENT | (addr & PTE_ADDR_MASK);
        if perm.writable {
            bits |= PTE_WRITABLE;
        }
        if perm.user {
            bits |= PTE_USER;
        }
        if perm.write_through {
            bits |= PTE_PWT;
        }
        if perm.cache_disable {
            bits |= PTE_PCD;
        }
        if !perm.executable {
            bits |= PTE_XD;
        }
        Pte(bits)
    }

    /// Generous permissions for a newly-allocated intermediate table (spec.md
    /// §4.2: "sets generous intermediate permissions (writable, user-accessible)";
    /// the leaf PTE is what actually restricts access).
    fn intermediate(addr: u64) -> Self {
        Pte(PTE_PRESENT | PTE_WRITABLE | PTE_USER | (addr & PTE_ADDR_MASK))
    }

    fn points_to_table(&self) -> bool {
        self.present() && self.0 & PTE_HUGE == 0
    }
}

#[derive(Clone, Copy)]
pub struct Perm {
    pub writable: bool,
    pub executable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
}

impl Perm {
    pub const fn rw_kernel() -> Self {
        Perm { writable: true, executable: false, user: false, write_through: false, cache_disable: false }
    }
    pub const fn rx_kernel() -> Self {
        Perm { writable: false, executable: true, user: false, write_through: false, cache_disable: false }
    }
    pub const fn rw_user() -> Self {
        Perm { writable: true, executable: false, user: true, write_through: false, cache_disable: false }
    }
    pub const fn rwx_user() -> Self {
        Perm { writable: true, executable: true, user: true, write_through: false, cache_disable: false }
    }
    pub const fn io() -> Self {
        Perm { writable: true, executable: false, user: false, write_through: true, cache_disable: true }
    }
}

/// A single level of the 4-level tree: 512 PTEs, one frame.
#[repr(C)]
pub struct PageTable(pub [Pte; 512]);

fn pt_index(va: u64, level: u32) -> usize {
    ((va >> (12 + 9 * level)) & 0x1ff) as usize
}

/// The kernel's own page table, installed by the bootloader and never freed.
static KERNEL_PAGETABLE: AtomicU64 = AtomicU64::new(0);

pub fn set_kernel_pagetable(phys: u64) {
    KERNEL_PAGETABLE.store(phys, Ordering::Relaxed);
}

pub fn kernel_pagetable() -> u64 {
    KERNEL_PAGETABLE.load(Ordering::Relaxed)
}

fn table_at<'a>(phys: u64) -> &'a mut PageTable {
    unsafe { &mut *(hhdm::p2v(phys) as *mut PageTable) }
}

/// Splits `va` into four 9-bit level indices and walks down, allocating
/// intermediate tables when `alloc` is set. `io` relaxes the `[VA_MIN, VA_MAX)`
/// bound for device-window mappings (spec.md §4.2: "Walk rejects VAs outside
/// [VA_MIN, VA_MAX) for non-IO requests").
pub fn walk(root: u64, va: u64, alloc: bool, io: bool) -> KResult<*mut Pte> {
    if !io && (va >= config::VA_MAX || va < config::VA_MIN) {
        panic!("walk: va 0x{:x} out of range", va);
    }

    let mut table = table_at(root);
    for level in (1..4).rev() {
        let pte = &mut table.0[pt_index(va, level)];
        if pte.points_to_table() {
            table = table_at(pte.address());
        } else if pte.present() {
            panic!("walk: huge page in intermediate level");
        } else {
            if !alloc {
                return Err(KError::NotFound);
            }
            let frame = kalloc::alloc_zero()?;
            *pte = Pte::intermediate(frame);
            table = table_at(frame);
        }
    }

    Ok(&mut table.0[pt_index(va, 0)] as *mut Pte)
}

/// Maps `[va, va+size)` onto frames already starting at `pa` (spec.md §4.2
/// "map"). `size`/`va`/`pa` need not be page-aligned; they are rounded down to the
/// containing pages. Mapping over an already-present PTE is a fatal programming
/// error, not a recoverable one (spec.md §4.2/§7).
pub fn map(root: u64, va: u64, pa: u64, size: u64, perm: Perm) -> KResult<()> {
    map_impl(root, va, pa, size, perm, false)
}

/// Device MMIO mapping into the monotonically-advancing IO window (spec.md §4.2
/// "io-map"): cache-disable and write-through set, never user-accessible.
static IO_MAP_NEXT: AtomicU64 = AtomicU64::new(config::IO_MAP_BASE);

pub fn io_map(pa: u64, size: u64) -> KResult<u64> {
    let size = config::page_round_up(size).max(PAGE_SIZE as u64);
    let va = IO_MAP_NEXT.fetch_add(size, Ordering::Relaxed);
    map_impl(kernel_pagetable(), va, pa, size, Perm::io(), true)?;
    Ok(va)
}

fn map_impl(root: u64, va: u64, pa: u64, size: u64, perm: Perm, io: bool) -> KResult<()> {
    if size == 0 {
        panic!("map: zero size");
    }
    let mut a = config::page_round_down(va);
    let last = config::page_round_down(va + size - 1);
    let mut pa = config::page_round_down(pa);

    loop {
        let pte = walk(root, a, true, io)?;
        unsafe {
            if (*pte).present() {
                panic!("map: remap at va 0x{:x}", a);
            }
            *pte = Pte::leaf(pa, perm);
        }
        if a == last {
            break;
        }
        a += PAGE_SIZE as u64;
        pa += PAGE_SIZE as u64;
    }
    Ok(())
}

/// Maps `[va, va+size)` to freshly-allocated frames (spec.md §4.2 "allocate").
/// `zero` zeros each frame first (used for BSS/heap growth).
pub fn allocate(root: u64, va: u64, size: u64, perm: Perm, zero: bool) -> KResult<()> {
    let mut a = config::page_round_down(va);
    let last = config::page_round_down(va + size - 1);
    loop {
        let frame = if zero { kalloc::alloc_zero()? } else { kalloc::alloc()? };
        let pte = walk(root, a, true, false)?;
        unsafe {
            if (*pte).present() {
                panic!("allocate: remap at va 0x{:x}", a);
            }
            *pte = Pte::leaf(frame, perm);
        }
        if a == last {
            break;
        }
        a += PAGE_SIZE as u64;
    }
    Ok(())
}

/// Unmaps `npages` starting at `va` (must be page-aligned); optionally frees the
/// backing frames.
pub fn unmap(root: u64, va: u64, npages: u64, free_frames: bool) {
    if !config::page_aligned(va) {
        panic!("unmap: unaligned va");
    }
    for i in 0..npages {
        let a = va + i * PAGE_SIZE as u64;
        let pte = match walk(root, a, false, false) {
            Ok(p) => p,
            Err(_) => panic!("unmap: walk miss at 0x{:x}", a),
        };
        unsafe {
            if !(*pte).present() {
                panic!("unmap: not mapped at 0x{:x}", a);
            }
            if free_frames {
                kalloc::free((*pte).address());
            }
            *pte = Pte::empty();
        }
    }
}

/// Deep-copies the subtree rooted at `src` into a freshly-allocated `dst` table
/// (spec.md §4.2's "deep-copying only the upper-half subtrees"). `level` counts
/// down from 3 (top) to 0 (leaf page). At the leaf level this copies PTEs
/// directly (frames are shared, not duplicated) — deep-copying only duplicates
/// *table* nodes, matching `original_source`'s `copy_pagetable`.
fn copy_pagetable_subtree(dst_root: u64, src_root: u64, level: u32) -> KResult<()> {
    let src = table_at(src_root);
    let dst = table_at(dst_root);
    for i in 0..512 {
        let pte = src.0[i];
        if !pte.present() {
            continue;
        }
        if level == 0 || !pte.points_to_table() {
            dst.0[i] = pte;
            continue;
        }
        let child = kalloc::alloc_zero()?;
        dst.0[i] = Pte::intermediate(child);
        copy_pagetable_subtree(child, pte.address(), level - 1)?;
    }
    Ok(())
}

/// A freshly-created user address space: page-table root plus its three fixed
/// kernel-only stacks (spec.md §3/§4.2).
pub struct UserPagetable {
    pub root: u64,
}

/// Builds a new user page table: shallow-copies the kernel root's top-level
/// entries, then deep-copies only the upper-half (kernel) subtrees so kernel code
/// stays addressable after a CR3 switch while every process's intermediate tables
/// remain independent (spec.md §4.2). Allocates and maps the user stack, the
/// interrupt stack, and the syscall scratch stack at their fixed addresses.
///
/// Known limitation carried over from `original_source` (spec.md §4.2 "Failure
/// semantics"): an allocation failure partway through the deep-copy leaks the
/// intermediate nodes already allocated for this call. A production
/// implementation would keep a rollback log; this one does not.
pub fn user_pagetable_new() -> KResult<UserPagetable> {
    let root = kalloc::alloc_zero()?;
    let kroot = kernel_pagetable();
    let ktable = table_at(kroot);
    let utable = table_at(root);

    // Shallow copy: every top-level slot points at the same (or a fresh, deep-
    // copied) subtree; this loop seeds it with the kernel's own slots, then the
    // deep copy below replaces upper-half entries with independent subtrees.
    for i in 0..512 {
        utable.0[i] = ktable.0[i];
    }
    // Upper half: va bit 47 set, i.e. top-level index >= 256.
    for i in 256..512 {
        let pte = ktable.0[i];
        if !pte.present() || !pte.points_to_table() {
            continue;
        }
        let child = kalloc::alloc_zero()?;
        utable.0[i] = Pte::intermediate(child);
        copy_pagetable_subtree(child, pte.address(), 2)?;
    }

    map(root, config::USER_STACK_BOTTOM, kalloc::alloc_zero()?, PAGE_SIZE as u64, Perm::rw_user())?;
    map(root, config::INTSTACK_BOTTOM, kalloc::alloc_zero()?, PAGE_SIZE as u64, Perm::rw_kernel())?;
    map(root, config::SYSCALLSTACK_BOTTOM, kalloc::alloc_zero()?, PAGE_SIZE as u64, Perm::rw_kernel())?;

    Ok(UserPagetable { root })
}

/// Recursively tears down a user page table (spec.md §4.2 "User page-table
/// teardown"). For any PTE whose virtual range intersects `[VA_MIN, VA_MAX)`,
/// recurse and free leaves; upper-half (kernel) entries are skipped entirely —
/// only the slot is discarded, never the frame it points to.
fn free_subtree(root: u64, base_va: u64, level: u32) {
    let table = table_at(root);
    if level == 0 {
        // This table's entries are leaf PTEs (data frames), not child tables:
        // `points_to_table()` can't tell the two apart since a 4 KiB leaf has
        // HUGE=0 same as an intermediate PTE, so the loop below frees every
        // present entry unconditionally before freeing the table itself.
        for i in 0..512 {
            let pte = table.0[i];
            if !pte.present() {
                continue;
            }
            let child_va = base_va + i as u64 * PAGE_SIZE as u64;
            if child_va < config::VA_MIN || child_va >= config::VA_MAX {
                continue;
            }
            kalloc::free(pte.address());
        }
        kalloc::free(root);
        return;
    }
    let span = 1u64 << (12 + 9 * level);
    for i in 0..512 {
        let pte = table.0[i];
        if !pte.present() {
            continue;
        }
        let child_va = base_va + i as u64 * span;
        // Skip entries entirely outside the user range: these are shared kernel
        // subtrees, not owned by this page table.
        if child_va + span <= config::VA_MIN || child_va >= config::VA_MAX {
            continue;
        }
        if pte.points_to_table() {
            free_subtree(pte.address(), child_va, level - 1);
        } else {
            kalloc::free(pte.address());
        }
    }
    kalloc::free(root);
}

pub fn user_pagetable_free(pt: &UserPagetable) {
    for va in [config::USER_STACK_BOTTOM, config::INTSTACK_BOTTOM, config::SYSCALLSTACK_BOTTOM] {
        match walk(pt.root, va, false, false) {
            Ok(pte) => unsafe { kalloc::free((*pte).address()) },
            Err(_) => panic!("user_pagetable_free: missing fixed stack at 0x{:x}", va),
        }
    }
    free_subtree(pt.root, 0, 3);
}

/// Grows or shrinks the break (spec.md §4.2 "sbrk"). Positive `delta` allocates
/// fresh zeroed, user-writable pages starting at `old_brk` rounded up. Negative
/// delta frees pages whose entire range falls within
/// `[initial_data_segment, old_brk + delta]`; shrinking below
/// `initial_data_segment` clamps rather than erroring. Returns the new break.
pub fn sbrk(root: u64, initial_data_segment: u64, old_brk: u64, delta: i64) -> KResult<u64> {
    if delta >= 0 {
        let start = config::page_round_up(old_brk);
        let new_brk = old_brk + delta as u64;
        if new_brk > start {
            allocate(root, start, new_brk - start, Perm::rw_user(), true)?;
        }
        Ok(new_brk)
    } else {
        let shrink = (-delta) as u64;
        let new_brk = old_brk.saturating_sub(shrink).max(initial_data_segment);
        let old_aligned = config::page_round_down(old_brk);
        let new_aligned = config::page_round_up(new_brk);
        if old_aligned > new_aligned {
            unmap(root, new_aligned, (old_aligned - new_aligned) / PAGE_SIZE as u64, true);
        }
        Ok(new_brk)
    }
}

/// Copies `len` bytes from `src` (a kernel-side buffer) into `dst_va` of the
/// target page table, page by page, through each destination frame's HHDM view.
/// Rejects missing, read-only, or wrong-privilege pages (spec.md §4.2). `is_user`
/// selects whether the destination mapping must carry the user bit — `exec` uses
/// this to write argv into a child that isn't installed on any core yet.
pub fn memcpy_user(root: u64, dst_va: u64, src: &[u8], is_user: bool) -> KResult<()> {
    let mut written = 0usize;
    let mut va = dst_va;
    while written < src.len() {
        let pte = walk(root, config::page_round_down(va), false, false)?;
        unsafe {
            if !(*pte).present() || !(*pte).writable() || (*pte).user() != is_user {
                return Err(KError::BadArg);
            }
            let page_off = (va % PAGE_SIZE as u64) as usize;
            let n = (PAGE_SIZE - page_off).min(src.len() - written);
            let dst_frame = hhdm::p2v((*pte).address()) as *mut u8;
            core::ptr::copy_nonoverlapping(src.as_ptr().add(written), dst_frame.add(page_off), n);
            written += n;
            va += n as u64;
        }
    }
    Ok(())
}

/// Symmetric direction of `memcpy_user`: copies `dst.len()` bytes out of
/// `src_va` in the target page table into a kernel-side buffer. Used by
/// syscall handlers to read a user-supplied pointer argument (spec.md §6's
/// READ/WRITE/OPEN take user buffer/path pointers) while that process's page
/// table is the one installed on this core.
pub fn copy_from_user(root: u64, src_va: u64, dst: &mut [u8]) -> KResult<()> {
    let mut read_n = 0usize;
    let mut va = src_va;
    while read_n < dst.len() {
        let pte = walk(root, config::page_round_down(va), false, false)?;
        unsafe {
            if !(*pte).present() || !(*pte).user() {
                return Err(KError::BadArg);
            }
            let page_off = (va % PAGE_SIZE as u64) as usize;
            let n = (PAGE_SIZE - page_off).min(dst.len() - read_n);
            let src_frame = hhdm::p2v((*pte).address()) as *const u8;
            core::ptr::copy_nonoverlapping(src_frame.add(page_off), dst.as_mut_ptr().add(read_n), n);
            read_n += n;
            va += n as u64;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_pte_round_trips_address_and_perm() {
        let pte = Pte::leaf(0x1234_5000, Perm::rwx_user());
        assert!(pte.present());
        assert!(pte.writable());
        assert!(pte.user());
        assert!(pte.executable());
        assert_eq!(pte.address(), 0x1234_5000);
    }

    #[test]
    fn non_executable_perm_sets_xd() {
        let pte = Pte::leaf(0x1000, Perm::rw_user());
        assert!(!pte.executable());
    }

    #[test]
    fn io_perm_sets_cache_disable_and_write_through() {
        let pte = Pte::leaf(0x1000, Perm::io());
        assert_eq!(pte.0 & PTE_PCD, PTE_PCD);
        assert_eq!(pte.0 & PTE_PWT, PTE_PWT);
        assert!(!pte.user());
    }

    #[test]
    fn pt_index_splits_four_levels() {
        // A canonical address with distinct index bits at each level.
        let va: u64 = (1 << (12 + 9 * 3 + 3))
            | (2 << (12 + 9 * 2))
            | (3 << (12 + 9 * 1))
            | (4 << 12);
        assert_eq!(pt_index(va, 3), 1 << 3);
        assert_eq!(pt_index(va, 2), 2);
        assert_eq!(pt_index(va, 1), 3);
        assert_eq!(pt_index(va, 0), 4);
    }
}
