//! Flat GDT: one code and one data segment each for kernel and user, plus
//! a TSS so `int`/syscall traps load the kernel stack for the interrupted
//! thread. Segment flags are hand-encoded per the classic IA-32 descriptor
//! layout (Intel SDM 3a §3.4.5); the `x86` crate does not build 32-bit
//! descriptors for us.

use core::arch::asm;
use core::mem::size_of;
use x86::bits32::task::TaskStateSegment;
use x86::dtables::{lgdt, DescriptorTablePointer};
use x86::segmentation::SegmentSelector;

const NULL: usize = 0;
const KCODE: usize = 1;
const KDATA: usize = 2;
const UCODE: usize = 3;
const UDATA: usize = 4;
const TSS: usize = 5;
const ENTRY_COUNT: usize = 6;

pub const KERNEL_CS: SegmentSelector = SegmentSelector::new(KCODE as u16, x86::Ring::Ring0);
pub const KERNEL_DS: SegmentSelector = SegmentSelector::new(KDATA as u16, x86::Ring::Ring0);
pub const USER_CS: SegmentSelector = SegmentSelector::new(UCODE as u16, x86::Ring::Ring3);
pub const USER_DS: SegmentSelector = SegmentSelector::new(UDATA as u16, x86::Ring::Ring3);
pub const TSS_SELECTOR: SegmentSelector = SegmentSelector::new(TSS as u16, x86::Ring::Ring0);

/// `base`/`limit` flat descriptor, access byte per SDM 3a Table 3-1.
const fn descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let limit_lo = (limit & 0xFFFF) as u64;
    let limit_hi = ((limit >> 16) & 0xF) as u64;
    let base_lo = (base & 0xFFFFFF) as u64;
    let base_hi = ((base >> 24) & 0xFF) as u64;
    limit_lo
        | (base_lo << 16)
        | ((access as u64) << 40)
        | (limit_hi << 48)
        | ((flags as u64) << 52)
        | (base_hi << 56)
}

const fn tss_descriptor(base: u32, limit: u32) -> u64 {
    // present, ring 0, 32-bit TSS (type 0x9), byte-granular.
    descriptor(base, limit, 0x89, 0x0)
}

static mut GDT: [u64; ENTRY_COUNT] = [0; ENTRY_COUNT];
static mut TSS_ENTRY: TaskStateSegment = TaskStateSegment::new();

/// Point the TSS's ring-0 stack at `esp0` (the current thread's kernel
/// stack top), so the next privilege-level change traps onto it.
pub fn set_kernel_stack(esp0: u32) {
    unsafe { (&raw mut TSS_ENTRY).as_mut().unwrap().esp0 = esp0 };
}

pub fn init() {
    unsafe {
        let gdt = (&raw mut GDT).as_mut().unwrap();
        gdt[NULL] = 0;
        gdt[KCODE] = descriptor(0, 0xFFFFF, 0x9A, 0xC); // present, ring0, code, 32-bit, 4K gran
        gdt[KDATA] = descriptor(0, 0xFFFFF, 0x92, 0xC); // present, ring0, data
        gdt[UCODE] = descriptor(0, 0xFFFFF, 0xFA, 0xC); // present, ring3, code
        gdt[UDATA] = descriptor(0, 0xFFFFF, 0xF2, 0xC); // present, ring3, data
        let tss_ptr = (&raw const TSS_ENTRY) as u32;
        gdt[TSS] = tss_descriptor(tss_ptr, size_of::<TaskStateSegment>() as u32 - 1);

        let gdt_ptr = DescriptorTablePointer::new_from_slice(gdt);
        lgdt(&gdt_ptr);

        asm!(
            "mov ax, {kds:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            kds = in(reg) KERNEL_DS.bits(),
            out("ax") _,
        );
        x86::bits32::segmentation::load_cs(KERNEL_CS);
        x86::task::load_tr(TSS_SELECTOR);
    }
}
