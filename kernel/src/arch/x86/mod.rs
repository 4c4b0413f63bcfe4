//! 32-bit protected-mode x86 arch glue (`target_os = "none"` only). Not
//! buildable in this checkout (the nightly `rust-src` component needed for
//! `-Z build-std` is unavailable here); written to the same contract
//! `arch::testing` satisfies for the host so the portable layers above
//! never see the difference.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod multiboot;
pub mod pit;

core::arch::global_asm!(include_str!("boot.s"), options(att_syntax));

pub use context::{
    context_switch, current_thread_id, disable_irqs, enable_irqs, halt, mark_fork_child_return_zero,
    set_current_thread_id,
};

/// Bring up the GDT/TSS, IDT, PIC remap, and PIT. Must run once, before
/// interrupts are unmasked. The kernel page directory used to stage
/// page-fault kmap mappings is installed separately, via
/// [`idt::set_kernel_directory`], once `mm::init` has a frame zone to
/// allocate it from.
pub fn init() {
    gdt::init();
    idt::init();
    crate::irq::init();
    pit::init(100); // 100 Hz tick
}
