//! Global process and thread tables. There is exactly one scheduler and
//! one set of tables in this core (§5, no SMP); each is protected by its
//! own lock per the declared acquisition order (frame-zone < address-space
//! < scheduler; §9).

use crate::process::pcb::Process;
use crate::process::thread::{Thread, ThreadState};
use crate::process::{ProcessId, ThreadId};
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

static NEXT_PID: AtomicU64 = AtomicU64::new(2); // 1 is reserved for init
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub static PROCESSES: Mutex<BTreeMap<ProcessId, Process>> = Mutex::new(BTreeMap::new());
pub static THREADS: Mutex<BTreeMap<ThreadId, Thread>> = Mutex::new(BTreeMap::new());

pub fn alloc_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

pub fn insert_process(process: Process) {
    PROCESSES.lock().insert(process.pid, process);
}

pub fn insert_thread(thread: Thread) {
    THREADS.lock().insert(thread.id, thread);
}

pub fn remove_process(pid: ProcessId) -> Option<Process> {
    PROCESSES.lock().remove(&pid)
}

pub fn remove_thread(tid: ThreadId) -> Option<Thread> {
    THREADS.lock().remove(&tid)
}

pub fn with_process<R>(pid: ProcessId, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    PROCESSES.lock().get_mut(&pid).map(f)
}

pub fn with_thread<R>(tid: ThreadId, f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
    THREADS.lock().get_mut(&tid).map(f)
}

pub fn thread_state(tid: ThreadId) -> Option<ThreadState> {
    THREADS.lock().get(&tid).map(|t| t.state)
}

pub fn set_state(tid: ThreadId, state: ThreadState) {
    if let Some(t) = THREADS.lock().get_mut(&tid) {
        t.state = state;
    }
}

pub fn set_reschedule(tid: ThreadId) {
    if let Some(t) = THREADS.lock().get(&tid) {
        t.set_reschedule();
    }
}

pub fn take_reschedule_flag(tid: ThreadId) -> bool {
    THREADS.lock().get(&tid).map(|t| t.take_reschedule()).unwrap_or(false)
}

/// Returns the counter's new value, or 1 if `tid` has no table entry yet
/// (early boot, before the idle thread exists).
pub fn inc_preempt(tid: ThreadId) -> u32 {
    THREADS.lock().get(&tid).map(|t| t.inc_preempt()).unwrap_or(1)
}

pub fn dec_preempt(tid: ThreadId) -> u32 {
    THREADS.lock().get(&tid).map(|t| t.dec_preempt()).unwrap_or(0)
}

pub fn preempt_count(tid: ThreadId) -> u32 {
    THREADS.lock().get(&tid).map(|t| t.preempt_count()).unwrap_or(0)
}

#[cfg(test)]
pub fn reset_for_test() {
    PROCESSES.lock().clear();
    THREADS.lock().clear();
    NEXT_PID.store(2, Ordering::Relaxed);
    NEXT_TID.store(1, Ordering::Relaxed);
    // `arch::testing::CURRENT_THREAD` is a process-global static outliving
    // this reset; without rezeroing it here, a tid a previous test left
    // "current" can collide with the freshly-renumbered tids this reset
    // hands out next.
    crate::arch::testing::set_current_thread_id(crate::process::ThreadId(0));
}

/// Insert a minimal runnable thread with no owning process, for
/// synchronization-primitive unit tests that only care about queue
/// membership.
#[cfg(test)]
pub fn alloc_thread_for_test() -> ThreadId {
    let tid = alloc_tid();
    insert_thread(Thread::new(tid, ProcessId(0), 0, 0));
    tid
}
