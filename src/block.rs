//! Block device collaborator trait (spec.md §6). The concrete transport
//! (virtio-blk, AHCI, ramdisk) is out of scope — `original_source`'s
//! `dev/virtio_disk.c` drove a single fixed disk through an interrupt-
//! completion queue, but spec.md's Non-goals exclude transport details, so
//! this is reduced to a synchronous trait `pagecache.rs` reads/writes
//! through, same shape as `console::Uart`.

use crate::config::BLOCK_SIZE;
use crate::error::KResult;

pub trait BlockDevice: Sync {
    /// Total number of `BLOCK_SIZE`-byte blocks the device exposes.
    fn block_count(&self) -> u64;

    /// Reads block `block_no` in full into `buf`, which must be exactly
    /// `BLOCK_SIZE` bytes.
    fn read_block(&self, block_no: u64, buf: &mut [u8; BLOCK_SIZE]) -> KResult<()>;

    /// Writes block `block_no` in full from `buf`.
    fn write_block(&self, block_no: u64, buf: &[u8; BLOCK_SIZE]) -> KResult<()>;
}

static mut DEVICE: Option<&'static dyn BlockDevice> = None;

pub fn install(dev: &'static dyn BlockDevice) {
    unsafe {
        DEVICE = Some(dev);
    }
}

fn device() -> &'static dyn BlockDevice {
    unsafe { DEVICE.expect("block::install was never called") }
}

pub fn read_block(block_no: u64, buf: &mut [u8; BLOCK_SIZE]) -> KResult<()> {
    device().read_block(block_no, buf)
}

pub fn write_block(block_no: u64, buf: &[u8; BLOCK_SIZE]) -> KResult<()> {
    device().write_block(block_no, buf)
}

pub fn block_count() -> u64 {
    device().block_count()
}
