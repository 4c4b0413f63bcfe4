//! Memory management: physical frames, the MMU interface, address spaces
//! and virtual regions, and the kernel's temporary mapping window.

pub mod frame_allocator;
pub mod kmap;
pub mod page_table;
pub mod vas;

pub use frame_allocator::FrameNumber;
pub use page_table::PageFlags;
pub use vas::{AddressSpace, FaultOutcome, MmapFlags, Prot};

use crate::config::PAGE_SIZE;

/// Install the frame zone from the amount of usable RAM discovered at
/// boot (Multiboot's upper-memory field, in KiB, per §6).
pub fn init(upper_mem_kib: usize) {
    let bytes = upper_mem_kib * 1024;
    let frame_count = bytes / PAGE_SIZE;
    // Frame 0 upward; the first megabyte plus the kernel image are carved
    // out by the boot-time identity map before this zone is handed out.
    frame_allocator::init(0, frame_count);
}
