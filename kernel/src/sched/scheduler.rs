//! The single global scheduler: a runnable list and the context-switch
//! sequencing around it (§4.G).

use crate::arch;
use crate::process::table;
use crate::process::{ThreadId, ThreadState};
use crate::sched::sync::Spinlock;
use alloc::collections::VecDeque;

static RUN_QUEUE: Spinlock<VecDeque<ThreadId>> = Spinlock::new(VecDeque::new());

/// The permanently-runnable thread kept on hand so the run queue is never
/// empty in steady state (§9 Open Questions: this core always creates one).
static IDLE_THREAD: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

pub fn set_idle_thread(tid: ThreadId) {
    IDLE_THREAD.store(tid.0, core::sync::atomic::Ordering::Release);
}

fn idle_thread() -> ThreadId {
    ThreadId(IDLE_THREAD.load(core::sync::atomic::Ordering::Acquire))
}

/// `make_runnable(t)`: must not be called on the currently running thread.
pub fn make_runnable(tid: ThreadId) {
    debug_assert_ne!(tid, arch::current_thread_id());
    table::set_state(tid, ThreadState::Runnable);
    RUN_QUEUE.lock().push_back(tid);
}

/// `reschedule()`: clears RESCHEDULE on the current thread and switches.
pub fn reschedule() {
    let current = arch::current_thread_id();
    table::take_reschedule_flag(current);
    sched_switch();
}

/// `sched_switch()`: the scheduler lock is acquired here and released by
/// whichever thread resumes execution after the switch — which may be a
/// different call frame than the one that acquired it, hence the manual
/// (non-RAII) lock/unlock pair.
pub fn sched_switch() {
    let current = arch::current_thread_id();

    unsafe { RUN_QUEUE.lock_raw() };
    let queue = unsafe { &mut *RUN_QUEUE.data_ptr() };

    if table::thread_state(current) == Some(ThreadState::Runnable) {
        queue.push_back(current);
    }

    let next = queue
        .pop_front()
        .unwrap_or_else(idle_thread);

    if next == current {
        unsafe { RUN_QUEUE.unlock_raw() };
        return;
    }

    table::set_state(next, ThreadState::Running);
    arch::set_current_thread_id(next);

    let (outgoing_ctx_slot, incoming_ctx) = table::with_thread(current, |t| &mut t.ctx as *mut usize)
        .zip(table::with_thread(next, |t| t.ctx))
        .expect("current and next threads must exist in the table");

    unsafe { arch::context_switch(outgoing_ctx_slot, incoming_ctx) };

    // Execution resumes here for whichever thread is now current; that
    // thread releases the lock the outgoing side acquired above.
    unsafe { RUN_QUEUE.unlock_raw() };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table as ptable;
    use crate::process::thread::Thread;
    use crate::process::ProcessId;

    fn fresh_thread() -> ThreadId {
        let tid = ptable::alloc_tid();
        ptable::insert_thread(Thread::new(tid, ProcessId(0), 0, 0));
        tid
    }

    #[test]
    fn make_runnable_enqueues_and_sets_state() {
        ptable::reset_for_test();
        let tid = fresh_thread();
        ptable::set_state(tid, ThreadState::Blocked);
        make_runnable(tid);
        assert_eq!(ptable::thread_state(tid), Some(ThreadState::Runnable));
        assert_eq!(RUN_QUEUE.lock().pop_front(), Some(tid));
    }

    #[test]
    fn sched_switch_falls_back_to_idle_when_queue_empty() {
        ptable::reset_for_test();
        let current = fresh_thread();
        let idle = fresh_thread();
        set_idle_thread(idle);
        arch::set_current_thread_id(current);
        ptable::set_state(current, ThreadState::Blocked);

        sched_switch();
        assert_eq!(arch::current_thread_id(), idle);
    }

    #[test]
    fn runnable_current_is_reenqueued_behind_a_waiting_thread() {
        ptable::reset_for_test();
        let current = fresh_thread();
        let other = fresh_thread();
        let idle = fresh_thread();
        set_idle_thread(idle);
        arch::set_current_thread_id(current);
        make_runnable(other);

        sched_switch();
        assert_eq!(arch::current_thread_id(), other);
        // current was re-enqueued since it was still Runnable
        assert_eq!(RUN_QUEUE.lock().pop_front(), Some(current));
    }
}
