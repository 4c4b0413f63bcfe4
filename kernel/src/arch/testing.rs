//! Host-test stand-in for the bare-metal arch intrinsics: plain global
//! state instead of real IRQ masking or an asm context switch, so the
//! scheduler and synchronization primitives can be exercised under
//! `cargo test` without hardware.

use crate::process::ThreadId;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static IRQS_ENABLED: AtomicBool = AtomicBool::new(true);
static CURRENT_THREAD: AtomicU64 = AtomicU64::new(0);

pub fn disable_irqs() -> bool {
    IRQS_ENABLED.swap(false, Ordering::AcqRel)
}

pub fn enable_irqs() {
    IRQS_ENABLED.store(true, Ordering::Release);
}

pub fn current_thread_id() -> ThreadId {
    ThreadId(CURRENT_THREAD.load(Ordering::Acquire))
}

pub fn set_current_thread_id(tid: ThreadId) {
    CURRENT_THREAD.store(tid.0, Ordering::Release);
}

/// A host build never really switches stacks: it just relabels "current".
/// # Safety
/// Same contract as [`crate::arch::context_switch`]; on host this is a
/// plain store, so it is safe in practice, but the signature is kept
/// identical so callers do not special-case the host build.
pub unsafe fn context_switch(_outgoing_ctx_slot: *mut usize, _incoming_ctx: usize) {}

pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Test-only alias: set up "current thread" for a scenario under test.
pub fn set_current_thread(tid: ThreadId) {
    set_current_thread_id(tid);
}

/// Host build: no real saved-register frame exists, so record the intent
/// on the thread itself (observable by tests) instead of writing memory.
pub fn mark_fork_child_return_zero(thread: &mut crate::process::thread::Thread) {
    thread.fork_returns_zero = true;
}
