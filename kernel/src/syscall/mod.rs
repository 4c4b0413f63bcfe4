//! Fixed 6-entry syscall dispatch table (§4.H, §6).
//!
//! Soft-trap vector indexes a fixed-size table: `write=0`, `getpid=1`,
//! `fork=2`, `yield=3`, `exit=4`, `wait=5`. Arguments live in a saved
//! register frame on the thread's kernel stack; the trap trampoline builds
//! that frame and calls [`dispatch`], which records the frame pointer on
//! the current thread, calls the target function, and writes the return
//! value back into the frame. Unknown syscall numbers panic the kernel in
//! this core (a production design would return `NoSyscall`).

use crate::config::{page_align_down, PAGE_SIZE};
use crate::error::KernelError;
use crate::mm::frame_allocator;
use crate::process::table;
use crate::process::{fork as proc_fork, wait as proc_wait};
use crate::process::{ProcessId, ThreadId};
use crate::sched;

pub const SYS_WRITE: u32 = 0;
pub const SYS_GETPID: u32 = 1;
pub const SYS_FORK: u32 = 2;
pub const SYS_YIELD: u32 = 3;
pub const SYS_EXIT: u32 = 4;
pub const SYS_WAIT: u32 = 5;

/// The saved-register frame a trap trampoline builds on the kernel stack
/// before calling [`dispatch`], following the 32-bit x86 `int 0x80`
/// convention: `eax` carries the syscall number in and the return value
/// out, `ebx`/`ecx`/`edx` carry up to three arguments.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrapFrame {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Copy `len` bytes starting at user virtual address `addr` out of `pid`'s
/// address space, a page at a time via the page directory's existing
/// mapping (no fault-in: the caller is expected to have touched the range
/// already, as in scenario 3's `write(0, "hi", 2)`).
fn copy_from_user(pid: ProcessId, addr: usize, len: usize) -> Result<alloc::vec::Vec<u8>, KernelError> {
    let end = addr.checked_add(len).ok_or(KernelError::BadFault { addr })?;
    if end > crate::config::KERNEL_BASE {
        return Err(KernelError::BadFault { addr });
    }
    let phys_base = frame_allocator::phys_base();
    let mut out = alloc::vec::Vec::with_capacity(len);
    let mut cur = addr;
    while cur < end {
        let page = page_align_down(cur);
        let offset_in_page = cur - page;
        let chunk = core::cmp::min(end - cur, PAGE_SIZE - offset_in_page);
        let frame = table::with_process(pid, |p| p.address_space.directory.translate(page))
            .flatten()
            .map(|(frame, _flags)| frame)
            .ok_or(KernelError::BadFault { addr: cur })?;
        let src = (frame.addr(phys_base) + offset_in_page) as *const u8;
        out.extend_from_slice(unsafe { core::slice::from_raw_parts(src, chunk) });
        cur += chunk;
    }
    Ok(out)
}

/// Write `bytes` into user virtual address `addr` within `pid`'s address
/// space, used by `wait`'s status-out pointer.
fn copy_to_user(pid: ProcessId, addr: usize, bytes: &[u8]) -> Result<(), KernelError> {
    let end = addr.checked_add(bytes.len()).ok_or(KernelError::BadFault { addr })?;
    if end > crate::config::KERNEL_BASE {
        return Err(KernelError::BadFault { addr });
    }
    let phys_base = frame_allocator::phys_base();
    let mut cur = addr;
    let mut written = 0usize;
    while cur < end {
        let page = page_align_down(cur);
        let offset_in_page = cur - page;
        let chunk = core::cmp::min(bytes.len() - written, PAGE_SIZE - offset_in_page);
        let frame = table::with_process(pid, |p| p.address_space.directory.translate(page))
            .flatten()
            .map(|(frame, _flags)| frame)
            .ok_or(KernelError::BadFault { addr: cur })?;
        let dst = (frame.addr(phys_base) + offset_in_page) as *mut u8;
        unsafe { core::ptr::copy_nonoverlapping(bytes[written..].as_ptr(), dst, chunk) };
        cur += chunk;
        written += chunk;
    }
    Ok(())
}

/// `write(buf, len)`: hard-coded to the kernel log rather than a
/// per-process file descriptor table (§9 Open Questions).
fn sys_write(pid: ProcessId, buf_ptr: u32, len: u32) -> i32 {
    if len == 0 {
        return 0;
    }
    match copy_from_user(pid, buf_ptr as usize, len as usize) {
        Ok(bytes) => {
            crate::serial::write_bytes(&bytes);
            bytes.len() as i32
        }
        Err(e) => e.to_errno() as i32,
    }
}

fn sys_getpid(pid: ProcessId) -> i32 {
    pid.0 as i32
}

/// Parent gets the child's pid back from here; the child's own return
/// value of 0 is delivered by the syscall-return path it resumes through
/// after `fork` relocates its saved context (§4.F step 5, §9).
fn sys_fork(pid: ProcessId, tid: ThreadId) -> i32 {
    match proc_fork::fork(pid, tid) {
        Ok(child_pid) => child_pid.0 as i32,
        Err(e) => e.to_errno() as i32,
    }
}

fn sys_yield() -> i32 {
    sched::reschedule();
    0
}

fn sys_exit(pid: ProcessId, tid: ThreadId, status: i32) -> ! {
    proc_wait::exit(pid, tid, status)
}

/// `wait(status_ptr)`: returns the reaped child's pid and, if
/// `status_ptr` is non-null, writes its exit status there (the saved
/// register frame has room for one return value, so the status is
/// delivered POSIX-style through a caller-supplied pointer).
fn sys_wait(pid: ProcessId, status_ptr: u32) -> i32 {
    match proc_wait::wait(pid) {
        Ok((child_pid, status)) => {
            if status_ptr != 0 {
                if let Err(e) = copy_to_user(pid, status_ptr as usize, &status.to_le_bytes()) {
                    return e.to_errno() as i32;
                }
            }
            child_pid.0 as i32
        }
        Err(e) => e.to_errno() as i32,
    }
}

/// Service one syscall trap for `pid`/`tid`. Records `frame`'s address on
/// the current thread, dispatches through the fixed table, and writes the
/// return value back into `frame.eax`.
pub fn dispatch(pid: ProcessId, tid: ThreadId, frame: &mut TrapFrame) {
    table::with_thread(tid, |t| t.saved_regs = frame as *mut TrapFrame as usize);

    let ret = match frame.eax {
        SYS_WRITE => sys_write(pid, frame.ebx, frame.ecx),
        SYS_GETPID => sys_getpid(pid),
        SYS_FORK => sys_fork(pid, tid),
        SYS_YIELD => sys_yield(),
        SYS_EXIT => sys_exit(pid, tid, frame.ebx as i32),
        SYS_WAIT => sys_wait(pid, frame.ebx),
        other => panic!("unknown syscall number {other}"),
    };

    frame.eax = ret as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::AddressSpace;
    use crate::process::pcb::Process;
    use crate::process::thread::Thread;

    fn setup_process() -> (ProcessId, ThreadId) {
        table::reset_for_test();
        frame_allocator::init(0, 64);
        let pid = table::alloc_pid();
        let tid = table::alloc_tid();
        let space = AddressSpace::new().unwrap();
        let mut process = Process::new(pid, None, space);
        process.threads.push(tid);
        table::insert_process(process);
        table::insert_thread(Thread::new(tid, pid, 0, 0));
        crate::arch::testing::set_current_thread(tid);
        (pid, tid)
    }

    #[test]
    fn getpid_returns_the_caller_pid() {
        let (pid, tid) = setup_process();
        let mut frame = TrapFrame {
            eax: SYS_GETPID,
            ..Default::default()
        };
        dispatch(pid, tid, &mut frame);
        assert_eq!(frame.eax as i32, pid.0 as i32);
    }

    #[test]
    fn wait_with_no_children_returns_no_children_errno() {
        let (pid, tid) = setup_process();
        let mut frame = TrapFrame {
            eax: SYS_WAIT,
            ebx: 0,
            ..Default::default()
        };
        dispatch(pid, tid, &mut frame);
        assert_eq!(frame.eax as i32, KernelError::NoChildren.to_errno() as i32);
    }

    #[test]
    #[should_panic(expected = "unknown syscall number")]
    fn unknown_syscall_number_panics() {
        let (pid, tid) = setup_process();
        let mut frame = TrapFrame {
            eax: 99,
            ..Default::default()
        };
        dispatch(pid, tid, &mut frame);
    }

    #[test]
    fn dispatch_records_the_frame_pointer_on_the_thread() {
        let (pid, tid) = setup_process();
        let mut frame = TrapFrame {
            eax: SYS_GETPID,
            ..Default::default()
        };
        let frame_addr = &frame as *const TrapFrame as usize;
        dispatch(pid, tid, &mut frame);
        assert_eq!(table::with_thread(tid, |t| t.saved_regs), Some(frame_addr));
    }
}
