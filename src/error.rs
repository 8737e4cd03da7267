//! Recoverable error taxonomy (spec.md §7). Programming-invariant violations
//! (double-map, recursive lock, double-free, scheduler returning from `exit`)
//! are not represented here — those stay `panic!`s, per §7's fatal/recoverable
//! split.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KError {
    /// Frame or page-cache-entry exhaustion.
    NoMem = 1,
    /// Bad fd, bad path, unaligned address, out-of-range VA for a non-IO op.
    BadArg = 2,
    /// No such file, inode, process, or pid.
    NotFound = 3,
    /// Resource momentarily unavailable (e.g. fd table full).
    Busy = 4,
    /// Block device or page-cache I/O failure.
    Io = 5,
    /// Fixed-size table (process table, inode cache, open-file table) is full.
    NoSpace = 6,
    /// ELF validation failed (magic, class, program header sanity).
    BadElf = 7,
    /// Operation not permitted given the object's current state (e.g. write to a
    /// read-only fd).
    NotPermitted = 8,
}

pub type KResult<T> = Result<T, KError>;

impl From<KError> for i64 {
    fn from(e: KError) -> i64 {
        -(e as i64)
    }
}

/// Collapses a `KResult` into the kernel's syscall-return convention: the `Ok`
/// payload on success, `-errno` on failure. Callers that need the `Ok` value
/// widened to `i64` should prefer this over a bare `.map_err`/`?` so every
/// syscall handler renders errors identically.
pub fn as_syscall_ret<T: Into<i64>>(r: KResult<T>) -> i64 {
    match r {
        Ok(v) => v.into(),
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_conversion_is_negative() {
        let v: i64 = KError::NotFound.into();
        assert_eq!(v, -3);
    }

    #[test]
    fn as_syscall_ret_passes_through_ok() {
        let r: KResult<i64> = Ok(42);
        assert_eq!(as_syscall_ret(r), 42);
    }

    #[test]
    fn as_syscall_ret_negates_err() {
        let r: KResult<i64> = Err(KError::BadArg);
        assert_eq!(as_syscall_ret(r), -2);
    }
}
