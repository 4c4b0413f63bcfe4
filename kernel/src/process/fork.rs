//! `fork()`: clone address space with COW, duplicate the kernel stack,
//! relocate the saved context pointer, and make the child return 0 while
//! the parent returns its pid (§4.F, §9).

use crate::error::{KernelError, KernelResult};
use crate::process::table;
use crate::process::thread::{alloc_kernel_stack, Thread};
use crate::process::{Process, ProcessId, ThreadId};
use crate::sched;

/// Runs in the parent's context. Returns the child's pid to the parent;
/// the child itself resumes later at the relocated context and the
/// syscall-return path delivers it `0` (§4.F step 5, §9).
pub fn fork(parent_pid: ProcessId, parent_tid: ThreadId) -> KernelResult<ProcessId> {
    let only_thread = table::with_process(parent_pid, |p| p.threads.len() == 1)
        .ok_or(KernelError::Panic {
            reason: "fork: parent process missing from table",
        })?;
    if !only_thread {
        return Err(KernelError::InvalidArgument {
            what: "fork: only single-threaded processes may fork",
        });
    }

    let child_pid = table::alloc_pid();
    let child_tid = table::alloc_tid();

    let child_space = table::with_process(parent_pid, |p| p.address_space.fork_cow())
        .ok_or(KernelError::Panic {
            reason: "fork: parent process missing from table",
        })??;

    let (child_stack_base, child_stack_top) = alloc_kernel_stack(child_tid);

    let (parent_stack_base, parent_ctx, parent_saved_regs, file) = table::with_thread(parent_tid, |t| {
        (t.kernel_stack_base, t.ctx, t.saved_regs, ())
    })
    .map(|(base, ctx, regs, _)| (base, ctx, regs, ()))
    .ok_or(KernelError::Panic {
        reason: "fork: parent thread missing from table",
    })?;
    let _ = file;

    unsafe {
        core::ptr::copy_nonoverlapping(
            parent_stack_base as *const u8,
            child_stack_base as *const u8 as *mut u8,
            crate::config::THREAD_STACK_SIZE,
        );
    }

    // child.ctx = parent.ctx - parent.stack_base + child.stack_base (§4.F step 4).
    let child_ctx = parent_ctx - parent_stack_base + child_stack_base;
    // Likewise relocate the saved-register-frame pointer so the child's
    // syscall-return path reads its own copied stack.
    let child_saved_regs = if parent_saved_regs == 0 {
        0
    } else {
        parent_saved_regs - parent_stack_base + child_stack_base
    };

    let mut child_thread = Thread::new(child_tid, child_pid, child_stack_base, child_stack_top);
    child_thread.ctx = child_ctx;
    child_thread.saved_regs = child_saved_regs;
    crate::arch::mark_fork_child_return_zero(&mut child_thread);
    table::insert_thread(child_thread);

    let parent_file = table::with_process(parent_pid, |p| p.file.clone()).flatten();
    let mut child_process = Process::new(child_pid, Some(parent_pid), child_space);
    child_process.threads.push(child_tid);
    child_process.file = parent_file;
    table::insert_process(child_process);

    table::with_process(parent_pid, |p| p.children.push(child_pid));

    sched::make_runnable(child_tid);

    Ok(child_pid)
}
