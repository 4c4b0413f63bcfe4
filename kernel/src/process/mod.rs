//! Process and thread model: identity, the global tables, fork/exit/wait,
//! and the ELF loader's process-side wiring.

pub mod fork;
pub mod loader;
pub mod pcb;
pub mod table;
pub mod thread;
pub mod wait;

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub use pcb::{Process, INIT_PID};
pub use thread::{Thread, ThreadState};

/// Construct process 1 ("init"), the static reparenting target for
/// orphans (§3, §4.F). Must run exactly once at boot, before any `fork`.
pub fn init_process() -> crate::error::KernelResult<()> {
    let address_space = crate::mm::AddressSpace::new()?;
    let process = Process::new(INIT_PID, None, address_space);
    table::insert_process(process);
    Ok(())
}
