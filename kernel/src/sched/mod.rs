//! Scheduler and synchronization primitives (§4.G).

pub mod scheduler;
pub mod sync;

pub use scheduler::{make_runnable, reschedule, sched_switch, set_idle_thread};
pub use sync::{Mutex, PreemptSpinlock, Spinlock, WaitQueue};
