//! Fixed kernel tunables. Plain consts, no runtime config file — this is a kernel,
//! not a daemon.

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

pub const MAX_CORES: usize = 8;
pub const MAX_PROCESSES: usize = 64;
pub const MAX_OPEN_FILES: usize = 16;
/// Size of the global open-file pool (distinct from `MAX_OPEN_FILES`, the
/// per-process fd-table size): several processes can each hold an fd that
/// dups into the same global `File`, or hold fds backed by distinct entries.
pub const MAX_FILES: usize = 128;
pub const MAX_INODES: usize = 64;
pub const NUM_DEVICES: usize = 8;
pub const MAX_ARG: usize = 32;
pub const MAX_PATH: usize = 128;

/// Block size of the backing store. Must evenly divide `PAGE_SIZE` (spec.md §6).
pub const BLOCK_SIZE: usize = 512;

/// Number of page-cache entries packed into a single entry frame (spec.md §4.8:
/// "each a page holding ~170 entries plus a link" — sized here to the entry layout
/// actually used, see `pagecache::ENTRIES_PER_FRAME`).
pub const PAGECACHE_ENTRIES_PER_FRAME: usize = 170;

/// Number of consecutive wrap-arounds the Clock hand may make before `do_steal`
/// reports exhaustion (spec.md §4.8).
pub const PAGECACHE_CLOCK_MAX_SWEEPS: usize = 2;

// Virtual address space layout (spec.md §3, §6), values carried over unchanged
// from `original_source`'s `kernel/mem/vmm.h`.
pub const VA_MIN: u64 = 1 << 22; // 4 MiB
pub const VA_MAX: u64 = 1 << 46;
pub const USER_STACK_TOP: u64 = 1 << 45;
pub const USER_STACK_BOTTOM: u64 = USER_STACK_TOP - PAGE_SIZE as u64;

pub const INTSTACK_TOP: u64 = VA_MAX;
pub const INTSTACK_BOTTOM: u64 = INTSTACK_TOP - PAGE_SIZE as u64;
pub const SYSCALLSTACK_TOP: u64 = INTSTACK_BOTTOM;
pub const SYSCALLSTACK_BOTTOM: u64 = SYSCALLSTACK_TOP - PAGE_SIZE as u64;

/// Starting address of the monotonically-advancing IO-mmap window, carried over
/// unchanged from `original_source`'s `io_memmap_current_address` initial value.
pub const IO_MAP_BASE: u64 = 0xffff_ffff_f000_0000;

pub const fn page_round_up(x: u64) -> u64 {
    (x + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

pub const fn page_round_down(x: u64) -> u64 {
    x & !(PAGE_SIZE as u64 - 1)
}

pub const fn page_aligned(x: u64) -> bool {
    x & (PAGE_SIZE as u64 - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_idempotent_on_aligned_input() {
        assert_eq!(page_round_up(PAGE_SIZE as u64), PAGE_SIZE as u64);
        assert_eq!(page_round_down(PAGE_SIZE as u64), PAGE_SIZE as u64);
    }

    #[test]
    fn rounding_crosses_boundary_correctly() {
        assert_eq!(page_round_up(1), PAGE_SIZE as u64);
        assert_eq!(page_round_down(PAGE_SIZE as u64 + 1), PAGE_SIZE as u64);
    }

    #[test]
    fn va_layout_is_page_aligned() {
        assert!(page_aligned(VA_MIN));
        assert!(page_aligned(USER_STACK_BOTTOM));
        assert!(page_aligned(INTSTACK_BOTTOM));
        assert!(page_aligned(SYSCALLSTACK_BOTTOM));
    }
}
