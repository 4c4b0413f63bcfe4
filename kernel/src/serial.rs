//! COM1 serial output, the kernel's only console.
//!
//! On bare metal this drives a real 16550 UART through `uart_16550`. On
//! the host (plain `cargo test`/`cargo check`, no `--target`) it falls
//! back to stdout so log output is visible while running unit tests.

use core::fmt;
use spin::Mutex;

#[cfg(target_os = "none")]
struct Port(uart_16550::SerialPort);

#[cfg(target_os = "none")]
impl Port {
    /// # Safety
    /// `base` must be the I/O port of an unused, present 16550-compatible UART.
    unsafe fn new(base: u16) -> Self {
        let mut inner = unsafe { uart_16550::SerialPort::new(base) };
        inner.init();
        Self(inner)
    }
}

#[cfg(target_os = "none")]
impl fmt::Write for Port {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s)
    }
}

#[cfg(not(target_os = "none"))]
struct Port;

#[cfg(not(target_os = "none"))]
impl fmt::Write for Port {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        std::print!("{s}");
        Ok(())
    }
}

#[cfg(target_os = "none")]
const COM1: u16 = 0x3F8;

static PORT: Mutex<Option<Port>> = Mutex::new(None);

/// Bring up the serial console. Must run before the first `print!`.
pub fn init() {
    #[cfg(target_os = "none")]
    let port = unsafe { Port::new(COM1) };
    #[cfg(not(target_os = "none"))]
    let port = Port;
    *PORT.lock() = Some(port);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let mut guard = PORT.lock();
    if guard.is_none() {
        #[cfg(target_os = "none")]
        let port = unsafe { Port::new(COM1) };
        #[cfg(not(target_os = "none"))]
        let port = Port;
        *guard = Some(port);
    }
    let _ = guard.as_mut().unwrap().write_fmt(args);
}

/// Write raw bytes straight to the console, bypassing `fmt::Write`'s UTF-8
/// requirement. Used by the `write` syscall (§9: hard-coded to the kernel
/// log, not a per-process file descriptor table).
pub fn write_bytes(bytes: &[u8]) {
    let mut guard = PORT.lock();
    if guard.is_none() {
        #[cfg(target_os = "none")]
        let port = unsafe { Port::new(COM1) };
        #[cfg(not(target_os = "none"))]
        let port = Port;
        *guard = Some(port);
    }
    let _port = guard.as_mut().unwrap();
    #[cfg(target_os = "none")]
    for &b in bytes {
        _port.0.send(b);
    }
    #[cfg(not(target_os = "none"))]
    {
        use std::io::Write as _;
        let _ = std::io::stdout().write_all(bytes);
    }
}
