//! Physical frame allocator (spec.md §4.1). A single global LIFO free list linked
//! through the frames themselves, guarded by one spinlock — grounded on the
//! teacher's `kalloc.rs` (`Run`, `KMem`, `freerange`) and `original_source`'s
//! `kernel/mem/mem.c` (`freepage_t`, `init_mem`, the `1`/`2`/`0` sentinel fill
//! bytes for free/alloc/zero-alloc, kept here only under `cfg(debug_assertions)`).

use crate::boot::{BootInfo, MemmapEntry};
use crate::config::PAGE_SIZE;
use crate::error::{KError, KResult};
use crate::hhdm;
use crate::spinlock::Spinlock;

#[cfg(debug_assertions)]
const FILL_FREE: u8 = 1;
#[cfg(debug_assertions)]
const FILL_ALLOC: u8 = 2;

/// Self-referential free-list node: the "next" pointer lives inside the free frame
/// itself. Spec.md §9 calls this out as the one raw-pointer trick that needs an
/// explicit unsafe boundary in Rust; that boundary is this module — `alloc`/
/// `alloc_zero`/`alloc_for_cache`/`free` are the only safe surface.
#[repr(C)]
struct Run {
    next: *mut Run,
}

struct FreeList {
    lock: Spinlock,
    head: *mut Run,
    free_count: usize,
}

static FREELIST: SpinCell = SpinCell::new();

/// Wraps `FreeList`'s interior mutability so it can live in a `static` without
/// scattering `UnsafeCell` access through this file; `FreeList::lock` is still the
/// thing that actually makes concurrent use sound.
struct SpinCell(core::cell::UnsafeCell<FreeList>);

impl SpinCell {
    const fn new() -> Self {
        SpinCell(core::cell::UnsafeCell::new(FreeList {
            lock: Spinlock::new("kalloc"),
            head: core::ptr::null_mut(),
            free_count: 0,
        }))
    }

    #[allow(clippy::mut_from_ref)]
    fn get(&self) -> &mut FreeList {
        unsafe { &mut *self.0.get() }
    }
}

unsafe impl Sync for SpinCell {}

/// Pushes every page of every `USABLE` memmap region onto the free list. Panics if
/// a usable region's base/length is not page-aligned — matches `init_mem`'s
/// behavior in `original_source`, where that indicates a bootloader contract
/// violation, not a recoverable condition.
pub fn init(boot: &BootInfo) {
    let list = FREELIST.get();
    for region in boot.memmap {
        if !region.is_usable() {
            continue;
        }
        freerange(list, region);
    }
    log::info!("kalloc: {} pages free after init", list.free_count);
}

fn freerange(list: &mut FreeList, region: &MemmapEntry) {
    if region.base % PAGE_SIZE as u64 != 0 || region.length % PAGE_SIZE as u64 != 0 {
        panic!("kalloc: unaligned usable memmap region");
    }
    let mut pa = region.base;
    let end = region.base + region.length;
    while pa < end {
        push(list, pa);
        pa += PAGE_SIZE as u64;
    }
}

fn push(list: &mut FreeList, pa: u64) {
    debug_assert!(pa % PAGE_SIZE as u64 == 0, "kfree: unaligned frame");
    let va = hhdm::p2v(pa) as *mut Run;
    #[cfg(debug_assertions)]
    unsafe {
        core::ptr::write_bytes(va as *mut u8, FILL_FREE, PAGE_SIZE);
    }
    unsafe {
        (*va).next = list.head;
    }
    list.head = va;
    list.free_count += 1;
}

fn pop(list: &mut FreeList) -> Option<*mut Run> {
    let head = list.head;
    if head.is_null() {
        return None;
    }
    unsafe {
        list.head = (*head).next;
    }
    list.free_count -= 1;
    Some(head)
}

/// Pops one frame off the free list, if any, applying the debug fill. Shared
/// by `alloc` and `alloc_for_cache`; the two differ only in what happens on
/// `None`.
fn pop_free() -> Option<u64> {
    let list = FREELIST.get();
    list.lock.acquire();
    let got = pop(list);
    list.lock.release();
    got.map(|run| {
        #[cfg(debug_assertions)]
        unsafe {
            core::ptr::write_bytes(run as *mut u8, FILL_ALLOC, PAGE_SIZE);
        }
        hhdm::v2p(run as u64)
    })
}

/// Hands out one frame (as a physical address). Contents are undefined — a debug
/// build scribbles a sentinel, release leaves whatever was there.
///
/// A may-evict context (spec.md §2/§4.1): when the free list is exhausted this
/// falls back to `pagecache::steal()` before giving up, so a system whose free
/// memory is entirely clean page-cache frames doesn't OOM while they sit idle.
pub fn alloc() -> KResult<u64> {
    if let Some(pa) = pop_free() {
        return Ok(pa);
    }
    let pa = crate::pagecache::steal()?;
    #[cfg(debug_assertions)]
    unsafe {
        core::ptr::write_bytes(hhdm::p2v(pa) as *mut u8, FILL_ALLOC, PAGE_SIZE);
    }
    Ok(pa)
}

/// As `alloc`, but the frame is zeroed. Used for new page tables, which require
/// every PTE to start absent.
pub fn alloc_zero() -> KResult<u64> {
    let pa = alloc()?;
    unsafe {
        core::ptr::write_bytes(hhdm::p2v(pa) as *mut u8, 0, PAGE_SIZE);
    }
    Ok(pa)
}

/// Same signature as `alloc`, but reserved for the page cache (spec.md §4.1/§9):
/// refuses to recurse into `pagecache::steal` no matter what, simply failing on
/// exhaustion instead. `pagecache.rs` calls this while already holding its own
/// coarse `CACHE.lock`, and `pagecache::steal` re-acquires that same lock — were
/// this function to fall back to `steal` the way `alloc` does, that call would
/// deadlock against itself. This is the real non-recursive contract that
/// `original_source`'s `kalloc_for_page_cache` never actually implemented (it
/// was a byte-for-byte duplicate of `kalloc`).
pub fn alloc_for_cache() -> KResult<u64> {
    pop_free().ok_or(KError::NoMem)
}

/// Returns a frame to the pool. `pa` must be frame-aligned and must have been
/// returned by one of the allocators above — violating that is a fatal bug, not a
/// recoverable error, matching spec.md §7.
pub fn free(pa: u64) {
    if pa % PAGE_SIZE as u64 != 0 {
        panic!("kfree: unaligned frame 0x{:x}", pa);
    }
    let list = FREELIST.get();
    list.lock.acquire();
    push(list, pa);
    list.lock.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc as std_alloc, dealloc, Layout};

    /// Builds a fake HHDM over a heap-backed region so the free-list logic can be
    /// exercised without real physical memory. Host-only test scaffolding.
    fn with_fake_region<F: FnOnce()>(pages: usize, f: F) {
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
        let base = unsafe { std_alloc(layout) } as u64;
        hhdm::init(0); // identity map: va == pa for this test's fake region
        let region = MemmapEntry {
            base,
            length: (pages * PAGE_SIZE) as u64,
            kind: crate::boot::MemmapKind::Usable,
        };
        let boot = BootInfo {
            memmap: core::slice::from_ref(&region),
            hhdm: crate::boot::HhdmResponse { offset: 0 },
            kernel_address: crate::boot::KernelAddressResponse { physical_base: 0, virtual_base: 0 },
            cpus: &[],
        };
        init(&boot);
        f();
        unsafe { dealloc(base as *mut u8, layout) };
    }

    #[test]
    fn roundtrip_preserves_free_count() {
        with_fake_region(4, || {
            let before = FREELIST.get().free_count;
            let a = alloc().unwrap();
            let b = alloc().unwrap();
            assert_eq!(FREELIST.get().free_count, before - 2);
            free(a);
            free(b);
            assert_eq!(FREELIST.get().free_count, before);
        });
    }

    #[test]
    fn exhaustion_reports_nomem() {
        with_fake_region(1, || {
            let _a = alloc().unwrap();
            assert_eq!(alloc(), Err(KError::NoMem));
        });
    }

    #[test]
    fn alloc_zero_is_zeroed() {
        with_fake_region(1, || {
            let pa = alloc_zero().unwrap();
            let va = hhdm::p2v(pa) as *const u8;
            let slice = unsafe { core::slice::from_raw_parts(va, PAGE_SIZE) };
            assert!(slice.iter().all(|&b| b == 0));
        });
    }
}
