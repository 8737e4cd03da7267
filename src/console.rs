//! Line-buffered console input plus raw byte output (spec.md §4.9's
//! console device). Grounded on the teacher's `console.rs` (ring buffer,
//! `consoleintr`, backspace/kill-line handling), with the UART itself
//! abstracted behind a `Uart` trait — an external collaborator (spec.md §1)
//! rather than the teacher's concrete 16550 driver.

use core::fmt::{self, Write};

use crate::error::KResult;
use crate::file::Devsw;
use crate::proc;
use crate::spinlock::Spinlock;

pub trait Uart: Sync {
    fn putc_sync(&self, c: u8);
}

const BACKSPACE: u8 = 0x08;
const INPUT_BUF_SIZE: usize = 128;

pub struct Console {
    lock: Spinlock,
    uart: &'static dyn Uart,
    buf: [u8; INPUT_BUF_SIZE],
    r: usize,
    w: usize,
    e: usize,
}

/// Wait channel for `read`: the address of the console's own read index,
/// matching the teacher's `wakeup(&self.r)`.
fn read_chan(c: &Console) -> usize {
    &c.r as *const usize as usize
}

static mut CONSOLE: Option<Console> = None;

pub fn init(uart: &'static dyn Uart) {
    unsafe {
        CONSOLE = Some(Console {
            lock: Spinlock::new("console"),
            uart,
            buf: [0; INPUT_BUF_SIZE],
            r: 0,
            w: 0,
            e: 0,
        });
    }
}

fn console() -> &'static mut Console {
    unsafe { CONSOLE.as_mut().expect("console::init was never called") }
}

impl Console {
    fn putc(&self, c: u8) {
        if c == BACKSPACE {
            self.uart.putc_sync(0x08);
            self.uart.putc_sync(b' ');
            self.uart.putc_sync(0x08);
        } else {
            self.uart.putc_sync(c);
        }
    }

    /// Called by the UART interrupt handler for each received byte. Handles
    /// line-kill ('U') and backspace/delete locally; otherwise echoes and
    /// buffers, waking any blocked `read` once a full line has arrived.
    pub fn interrupt(&mut self, c: u8) {
        self.lock.acquire();
        match c {
            b'U' | 0x15 => {
                while self.e != self.w && self.buf[(self.e - 1) % INPUT_BUF_SIZE] != b'\n' {
                    self.e -= 1;
                    self.putc(BACKSPACE);
                }
            }
            0x08 | 0x7f => {
                if self.e != self.w {
                    self.e -= 1;
                    self.putc(BACKSPACE);
                }
            }
            _ => {
                if c != 0 && self.e - self.r < INPUT_BUF_SIZE {
                    let c = if c == b'\r' { b'\n' } else { c };
                    self.putc(c);
                    self.buf[self.e % INPUT_BUF_SIZE] = c;
                    self.e += 1;
                    if c == b'\n' || self.e - self.r == INPUT_BUF_SIZE {
                        self.w = self.e;
                        let chan = read_chan(self);
                        self.lock.release();
                        proc::wakeup(chan);
                        self.lock.acquire();
                    }
                }
            }
        }
        self.lock.release();
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.putc(b);
        }
        Ok(())
    }
}

impl Devsw for Console {
    /// Blocks until a full line (or buffer-full) has arrived, then copies up
    /// to `dst.len()` bytes.
    fn read(&self, dst: &mut [u8]) -> KResult<usize> {
        let this = console();
        let mut n = 0;
        this.lock.acquire();
        while n < dst.len() {
            while this.r == this.w {
                let chan = read_chan(this);
                proc::sleep(chan, &this.lock);
            }
            let c = this.buf[this.r % INPUT_BUF_SIZE];
            this.r += 1;
            dst[n] = c;
            n += 1;
            if c == b'\n' {
                break;
            }
        }
        this.lock.release();
        Ok(n)
    }

    fn write(&self, src: &[u8]) -> KResult<usize> {
        let this = console();
        for &b in src {
            this.putc(b);
        }
        Ok(src.len())
    }
}

/// Kernel-side logging sink (`log_setup.rs`) writes straight through the
/// lock-free `putc` path — log lines are expected to come from contexts that
/// may not be able to block, so this bypasses the input-side lock entirely.
pub fn write_str_unbuffered(s: &str) -> KResult<()> {
    let this = console();
    for b in s.bytes() {
        this.putc(b);
    }
    Ok(())
}

pub fn device() -> &'static dyn Devsw {
    console() as &dyn Devsw
}
