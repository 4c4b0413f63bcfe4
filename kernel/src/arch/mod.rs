//! Architecture glue: everything the rest of the kernel treats as an
//! intrinsic rather than portable logic — IRQ masking, the preempt
//! counter, the context switch, and "what thread is running right now".
//!
//! Bare metal (`target_os = "none"`) implements these for 32-bit
//! protected-mode x86 in `arch::x86`. Host builds (`cargo test`/`cargo
//! check` with no `--target`) use a simple global-variable model in
//! `arch::testing` so the portable scheduler/process logic above this
//! layer can be exercised without real hardware.

use crate::process::ThreadId;

#[cfg(target_os = "none")]
pub mod x86;
#[cfg(target_os = "none")]
pub use x86 as imp;

#[cfg(not(target_os = "none"))]
pub mod testing;
#[cfg(not(target_os = "none"))]
pub use testing as imp;

/// Nesting count (held in the current thread's header, per §3) that
/// forbids involuntary context switches while positive.
pub fn preempt_disable() {
    crate::process::table::inc_preempt(current_thread_id());
}

/// Decrements the preempt-disable counter; when it reaches zero, checks
/// for a pending reschedule (§4.G).
pub fn preempt_enable() {
    let current = current_thread_id();
    if crate::process::table::dec_preempt(current) == 0 {
        check_pending_reschedule(current);
    }
}

fn check_pending_reschedule(current: ThreadId) {
    if crate::process::table::take_reschedule_flag(current) {
        crate::sched::scheduler::reschedule();
    }
}

/// Mask interrupts, returning whether they were enabled beforehand.
pub fn disable_irqs() -> bool {
    imp::disable_irqs()
}

pub fn enable_irqs() {
    imp::enable_irqs();
}

/// The thread presently executing on this (sole) execution engine.
///
/// On bare metal this recovers the thread header by masking the current
/// stack pointer down to `THREAD_STACK_MASK`, per §4.F / §9. Host builds
/// substitute a plain global updated by the scheduler on every switch.
pub fn current_thread_id() -> ThreadId {
    imp::current_thread_id()
}

pub fn set_current_thread_id(tid: ThreadId) {
    imp::set_current_thread_id(tid);
}

/// Perform the outgoing/incoming stack-pointer context switch described in
/// §4.G: save callee-preserved registers, swap stack pointers, restore.
///
/// # Safety
/// `outgoing_ctx_slot` must point at the outgoing thread's saved context
/// slot and `incoming_ctx` must be a context previously saved the same way
/// (or the bare-metal-specific entry trampoline for a never-before-run
/// thread).
pub unsafe fn context_switch(outgoing_ctx_slot: *mut usize, incoming_ctx: usize) {
    unsafe { imp::context_switch(outgoing_ctx_slot, incoming_ctx) };
}

/// Request a reschedule at the next safe point (used by `mutex::acquire`'s
/// retry loop and the public `yield`/`reschedule` syscalls).
pub fn reschedule() {
    crate::sched::scheduler::reschedule();
}

pub fn halt() -> ! {
    imp::halt()
}

/// Write the fork-child return value (0) into the saved register frame
/// the child will resume through, per §4.F step 5 / §9's "syscall return
/// value injection" pattern.
pub fn mark_fork_child_return_zero(thread: &mut crate::process::thread::Thread) {
    imp::mark_fork_child_return_zero(thread);
}
