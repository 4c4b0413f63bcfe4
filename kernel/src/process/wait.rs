//! `exit()` and `wait()`: process termination, orphan reparenting, and
//! the parent-side reap (§4.F).

use crate::error::{KernelError, KernelResult};
use crate::process::pcb::INIT_PID;
use crate::process::table;
use crate::process::{ProcessId, ThreadId, ThreadState};
use crate::sched;

/// Mark the current thread EXITED, record `status`, reparent every child
/// to init, kick init's wait queue, release the address space and file,
/// then hand control to the scheduler. Never returns.
pub fn exit(pid: ProcessId, tid: ThreadId, status: i32) -> ! {
    table::set_state(tid, ThreadState::Exited);

    let children = table::with_process(pid, |p| {
        p.exit_status = Some(status);
        core::mem::take(&mut p.children)
    })
    .unwrap_or_default();

    for child in &children {
        table::with_process(*child, |c| c.parent = Some(INIT_PID));
    }
    table::with_process(INIT_PID, |init| init.children.extend(children));

    if let Some(parent) = table::with_process(pid, |p| p.parent).flatten() {
        table::with_process(parent, |p| p.wait_queue.kick());
    } else {
        table::with_process(INIT_PID, |p| p.wait_queue.kick());
    }

    table::with_process(pid, |p| {
        p.address_space.unmap_all();
        p.file = None;
    });

    sched::reschedule();
    unreachable!("exited thread must never be rescheduled");
}

/// `wait(&status)`: reap the first exited child, blocking if none is
/// ready yet and no children exist returns `NoChildren` (§4.F).
pub fn wait(pid: ProcessId) -> KernelResult<(ProcessId, i32)> {
    loop {
        let children = table::with_process(pid, |p| p.children.clone()).unwrap_or_default();
        if children.is_empty() {
            return Err(KernelError::NoChildren);
        }

        let reaped = children
            .iter()
            .copied()
            .find(|c| table::with_process(*c, |child| child.all_threads_exited()).unwrap_or(false));

        if let Some(child_pid) = reaped {
            table::with_process(pid, |p| p.children.retain(|&c| c != child_pid));
            let status = table::with_process(child_pid, |c| c.exit_status.unwrap_or(0)).unwrap_or(0);
            let thread_ids = table::with_process(child_pid, |c| core::mem::take(&mut c.threads)).unwrap_or_default();
            for tid in thread_ids {
                if let Some(t) = table::remove_thread(tid) {
                    crate::process::thread::free_kernel_stack(t.kernel_stack_base);
                }
            }
            table::remove_process(child_pid);
            return Ok((child_pid, status));
        }

        table::with_process(pid, |p| p.wait_queue.begin_wait());
        sched::reschedule();
    }
}
