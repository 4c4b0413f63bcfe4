//! Talus kernel library.
//!
//! Exposes the kernel's subsystems as a library crate so that
//! architecture-independent logic (frame allocator, address-space
//! bookkeeping, scheduler queues, synchronization primitives) can be
//! exercised with a plain `cargo test` on the host, while `src/main.rs`
//! links the same crate into the bare-metal `_start` entry point.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", feature(naked_functions))]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare metal: a real heap carved out of identity-mapped physical memory.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Host target (`cargo test`/`cargo check` with no `--target`): delegate to
/// the system allocator so `alloc`-backed logic compiles and runs under std.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod config;
pub mod elf;
pub mod error;
pub mod irq;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod syscall;
pub mod vfs;

pub use error::{KernelError, KernelResult};

#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
