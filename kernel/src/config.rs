//! Kernel-wide constants: page geometry and the address-space layout.
//!
//! Collected here because they are referenced from `mm`, `process` and
//! `arch` alike and must agree exactly between them.

/// Size of one physical frame / virtual page.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Entries per page table / page directory on IA-32.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Size of a thread's kernel stack. One page, so that masking the stack
/// pointer down to `PAGE_SIZE` always recovers the thread header at the
/// low end of the stack (see `process::thread`).
pub const THREAD_STACK_SIZE: usize = PAGE_SIZE;
pub const THREAD_STACK_MASK: usize = !(THREAD_STACK_SIZE - 1);

/// 3 GiB / 1 GiB user/kernel split, the classic IA-32 layout. Everything
/// at or above `KERNEL_BASE` is mapped supervisor+global in every address
/// space; everything below is per-process user space.
pub const KERNEL_BASE: usize = 0xC000_0000;
pub const USER_TOP: usize = KERNEL_BASE;

/// Window of kernel virtual addresses reserved for transient mappings
/// (`mm::kmap`). Disjoint from the direct-mapped kernel image, which lives
/// immediately above `KERNEL_BASE`.
pub const KMAP_WINDOW_BASE: usize = 0xFF80_0000;
pub const KMAP_WINDOW_PAGES: usize = 256; // 1 MiB window
pub const KMAP_WINDOW_SIZE: usize = KMAP_WINDOW_PAGES * PAGE_SIZE;

/// Round `addr` down/up to a page boundary.
pub const fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn page_align_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}
