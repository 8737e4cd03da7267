//! Open-file table and device table (spec.md §4.9/§6). Grounded on the
//! teacher's `file/file.rs` (`FTable`, `filealloc`/`filedup`/`fileclose`
//! refcounting) and `file/mod.rs` (`Devsw`, `DEVSW`, `File` fields), collapsed
//! from a directory into one module since this kernel has no pipes (spec.md
//! §1 Non-goals) and no disk-format-specific fields to split out.
//!
//! Global `File` entries are referenced by index rather than by pointer/
//! reference — matching the rest of this kernel's fixed-array, no-heap
//! design (`kalloc`'s frame free list, `proc`'s process table) rather than
//! the teacher's `Option<&File>` borrows.

use crate::config::{MAX_FILES, NUM_DEVICES};
use crate::error::{KError, KResult};
use crate::fs::inode;
use crate::proc::Proc;
use crate::spinlock::Spinlock;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    None,
    Inode,
    Device,
}

#[derive(Clone, Copy)]
pub struct File {
    kind: FileKind,
    ref_cnt: u32,
    readable: bool,
    writable: bool,
    /// Valid when `kind == Inode` or `kind == Device` (a device file still
    /// has a directory entry, per spec.md §4.9's O_DEVICE routing).
    inode: u32,
    off: u64,
    /// Valid when `kind == Device`: index into `DEVSW`.
    major: usize,
}

impl File {
    const fn empty() -> Self {
        File { kind: FileKind::None, ref_cnt: 0, readable: false, writable: false, inode: 0, off: 0, major: 0 }
    }
}

struct FTable {
    lock: Spinlock,
    files: [File; MAX_FILES],
}

static mut FTABLE: FTable = FTable {
    lock: Spinlock::new("ftable"),
    files: [File::empty(); MAX_FILES],
};

/// Maps a device's major number to its read/write implementation (spec.md
/// §4.9: O_DEVICE routes through here instead of the inode content path).
pub trait Devsw: Sync {
    fn read(&self, dst: &mut [u8]) -> KResult<usize>;
    fn write(&self, src: &[u8]) -> KResult<usize>;
}

pub static mut DEVSW: [Option<&'static dyn Devsw>; NUM_DEVICES] = [None; NUM_DEVICES];

pub const CONSOLE_MAJOR: usize = 1;

pub fn register_device(major: usize, dev: &'static dyn Devsw) {
    unsafe {
        DEVSW[major] = Some(dev);
    }
}

/// Allocates a global file-table slot with ref_cnt 1. Returns its index.
fn file_alloc() -> KResult<usize> {
    unsafe {
        FTABLE.lock.acquire();
        for (i, f) in FTABLE.files.iter_mut().enumerate() {
            if f.ref_cnt == 0 {
                f.ref_cnt = 1;
                FTABLE.lock.release();
                return Ok(i);
            }
        }
        FTABLE.lock.release();
        Err(KError::NoSpace)
    }
}

fn file_dup(idx: usize) {
    unsafe {
        FTABLE.lock.acquire();
        let f = &mut FTABLE.files[idx];
        if f.ref_cnt < 1 {
            panic!("file_dup: closed file");
        }
        f.ref_cnt += 1;
        FTABLE.lock.release();
    }
}

fn file_close(idx: usize) {
    unsafe {
        FTABLE.lock.acquire();
        let f = &mut FTABLE.files[idx];
        if f.ref_cnt < 1 {
            panic!("file_close: already closed");
        }
        f.ref_cnt -= 1;
        if f.ref_cnt > 0 {
            FTABLE.lock.release();
            return;
        }
        let kind = f.kind;
        let inum = f.inode;
        f.kind = FileKind::None;
        FTABLE.lock.release();

        if matches!(kind, FileKind::Inode | FileKind::Device) {
            inode::put(inum);
        }
    }
}

/// Finds an unused fd slot in `p`'s table, lowest first.
fn alloc_fd(p: &Proc) -> KResult<usize> {
    p.ofile.iter().position(|&fd| fd < 0).ok_or(KError::Busy)
}

/// Opens inode `inum` (already `inode::get`'d by the caller's path lookup)
/// for the calling process, returning its fd. `is_device` routes reads/
/// writes through `DEVSW[major]` instead of the inode's own content.
pub fn open(p: &mut Proc, inum: u32, readable: bool, writable: bool, is_device: bool, major: usize) -> KResult<i32> {
    let fd = alloc_fd(p)?;
    let idx = file_alloc()?;
    unsafe {
        FTABLE.lock.acquire();
        let f = &mut FTABLE.files[idx];
        f.kind = if is_device { FileKind::Device } else { FileKind::Inode };
        f.readable = readable;
        f.writable = writable;
        f.inode = inum;
        f.off = 0;
        f.major = major;
        FTABLE.lock.release();
    }
    p.ofile[fd] = idx as i32;
    Ok(fd as i32)
}

pub fn close(p: &mut Proc, fd: i32) -> KResult<()> {
    let slot = p.ofile.get_mut(fd as usize).ok_or(KError::BadArg)?;
    if *slot < 0 {
        return Err(KError::BadArg);
    }
    file_close(*slot as usize);
    *slot = -1;
    Ok(())
}

/// Closes every fd a process still holds — called once, from `proc::exit`.
pub fn close_all(p: &mut Proc) {
    for slot in p.ofile.iter_mut() {
        if *slot >= 0 {
            file_close(*slot as usize);
            *slot = -1;
        }
    }
}

pub fn dup(p: &mut Proc, fd: i32) -> KResult<i32> {
    let idx = *p.ofile.get(fd as usize).ok_or(KError::BadArg)?;
    if idx < 0 {
        return Err(KError::BadArg);
    }
    let new_fd = alloc_fd(p)?;
    file_dup(idx as usize);
    p.ofile[new_fd] = idx;
    Ok(new_fd as i32)
}

pub fn read(p: &mut Proc, fd: i32, dst: &mut [u8]) -> KResult<usize> {
    let idx = *p.ofile.get(fd as usize).ok_or(KError::BadArg)? as usize;
    unsafe {
        FTABLE.lock.acquire();
        let f = FTABLE.files[idx];
        FTABLE.lock.release();
        if !f.readable {
            return Err(KError::NotPermitted);
        }
        match f.kind {
            FileKind::Device => DEVSW[f.major].ok_or(KError::BadArg)?.read(dst),
            FileKind::Inode => {
                let n = inode::read_at(f.inode, f.off, dst)?;
                FTABLE.lock.acquire();
                FTABLE.files[idx].off += n as u64;
                FTABLE.lock.release();
                Ok(n)
            }
            FileKind::None => Err(KError::BadArg),
        }
    }
}

pub fn write(p: &mut Proc, fd: i32, src: &[u8]) -> KResult<usize> {
    let idx = *p.ofile.get(fd as usize).ok_or(KError::BadArg)? as usize;
    unsafe {
        FTABLE.lock.acquire();
        let f = FTABLE.files[idx];
        FTABLE.lock.release();
        if !f.writable {
            return Err(KError::NotPermitted);
        }
        match f.kind {
            FileKind::Device => DEVSW[f.major].ok_or(KError::BadArg)?.write(src),
            FileKind::Inode => {
                let n = inode::write_at(f.inode, f.off, src)?;
                FTABLE.lock.acquire();
                FTABLE.files[idx].off += n as u64;
                FTABLE.lock.release();
                Ok(n)
            }
            FileKind::None => Err(KError::BadArg),
        }
    }
}

pub fn lseek(p: &Proc, fd: i32, off: i64, whence: i32) -> KResult<u64> {
    let idx = *p.ofile.get(fd as usize).ok_or(KError::BadArg)? as usize;
    unsafe {
        FTABLE.lock.acquire();
        let f = &mut FTABLE.files[idx];
        let size = if f.kind == FileKind::Inode { inode::size_of(f.inode) } else { 0 };
        let base: i64 = match whence {
            0 => 0,                 // SEEK_SET
            1 => f.off as i64,       // SEEK_CUR
            2 => size as i64,        // SEEK_END
            _ => {
                FTABLE.lock.release();
                return Err(KError::BadArg);
            }
        };
        let new_off = base + off;
        if new_off < 0 {
            FTABLE.lock.release();
            return Err(KError::BadArg);
        }
        f.off = new_off as u64;
        let ret = f.off;
        FTABLE.lock.release();
        Ok(ret)
    }
}
