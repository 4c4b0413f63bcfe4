//! Process control block: identity, family ties, address space, and the
//! wait queue parents block on inside `wait()`.

use crate::mm::AddressSpace;
use crate::process::{ProcessId, ThreadId};
use crate::sched::sync::WaitQueue;
use crate::vfs::File;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub const INIT_PID: ProcessId = ProcessId(1);

pub struct Process {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub children: Vec<ProcessId>,
    pub threads: Vec<ThreadId>,
    pub address_space: AddressSpace,
    pub file: Option<Arc<dyn File>>,
    pub exit_status: Option<i32>,
    pub wait_queue: WaitQueue,
}

impl Process {
    pub fn new(pid: ProcessId, parent: Option<ProcessId>, address_space: AddressSpace) -> Self {
        Self {
            pid,
            parent,
            children: Vec::new(),
            threads: Vec::new(),
            address_space,
            file: None,
            exit_status: None,
            wait_queue: WaitQueue::new(),
        }
    }

    /// A process is EXITED once it has threads and every one of them has
    /// exited (§3).
    pub fn all_threads_exited(&self) -> bool {
        !self.threads.is_empty()
            && self
                .threads
                .iter()
                .all(|tid| crate::process::table::thread_state(*tid) == Some(crate::process::thread::ThreadState::Exited))
    }
}
