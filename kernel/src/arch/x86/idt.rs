//! IDT: page fault (#PF, vector 14), the timer IRQ (remapped to vector 32),
//! and the `int 0x80` syscall gate (vector 0x80). Gate descriptors are
//! hand-encoded the same way the GDT's segment descriptors are; `x86`
//! only hands us the vector numbers and the `lidt` instruction wrapper.

use super::gdt::KERNEL_CS;
use crate::mm::page_table::PageDirectory;
use crate::mm::vas::FaultOutcome;
use crate::syscall::TrapFrame;
use core::arch::asm;
use x86::dtables::{lidt, DescriptorTablePointer};
use x86::irq::PAGE_FAULT_VECTOR;

pub const TIMER_VECTOR: u8 = 32;
pub const SYSCALL_VECTOR: u8 = 0x80;
const NUM_ENTRIES: usize = 256;

/// Present, ring-0 (or ring-3 for the syscall gate, so `int 0x80` is
/// callable from user code), 32-bit interrupt gate (type 0xE).
const fn gate(handler: u32, selector: u16, dpl: u8) -> u128 {
    let offset_lo = (handler & 0xFFFF) as u128;
    let offset_hi = ((handler >> 16) & 0xFFFF) as u128;
    let access = 0x8Eu128 | ((dpl as u128) << 5);
    offset_lo | ((selector as u128) << 16) | (access << 40) | (offset_hi << 48)
}

static mut IDT: [u64; NUM_ENTRIES * 2] = [0; NUM_ENTRIES * 2];

fn set_gate(vector: u8, handler: u32, dpl: u8) {
    let entry = gate(handler, KERNEL_CS.bits(), dpl);
    let idt = unsafe { (&raw mut IDT).as_mut().unwrap() };
    idt[vector as usize * 2] = entry as u64;
    idt[vector as usize * 2 + 1] = (entry >> 64) as u64;
}

pub fn init() {
    set_gate(PAGE_FAULT_VECTOR, page_fault_handler as u32, 0);
    set_gate(TIMER_VECTOR, timer_handler as u32, 0);
    set_gate(SYSCALL_VECTOR, syscall_entry as u32, 3);

    unsafe {
        let idt = (&raw const IDT).as_ref().unwrap();
        // `DescriptorTablePointer<u64>` over a `[u64; 2*N]` slice describes
        // the same byte range as `[u128; N]` would; `x86::dtables` has no
        // u128 entry type, and the layout is identical either way.
        let ptr = DescriptorTablePointer::new_from_slice(idt);
        lidt(&ptr);
    }
}

/// Only the fields the trampolines here push by hand; `ecode` is the CPU's
/// pushed error code for faults that have one, otherwise absent.
#[repr(C)]
struct InterruptFrame {
    eip: u32,
    cs: u32,
    eflags: u32,
}

static mut KERNEL_DIRECTORY: Option<PageDirectory> = None;

/// Install the directory used to stage kmap mappings while resolving a
/// page fault. Must run after `mm::init` and before interrupts are
/// unmasked.
pub fn set_kernel_directory(dir: PageDirectory) {
    unsafe { *(&raw mut KERNEL_DIRECTORY) = Some(dir) };
}

extern "x86-interrupt" fn page_fault_handler(_frame: InterruptFrame, error_code: u32) {
    let fault_addr: usize;
    unsafe { asm!("mov {0}, cr2", out(reg) fault_addr, options(nomem, nostack)) };

    let current = crate::arch::current_thread_id();
    let pid = crate::process::table::with_thread(current, |t| t.process);
    let Some(pid) = pid else {
        panic!("page fault on vector with no owning process");
    };

    let kdir = unsafe { (&raw mut KERNEL_DIRECTORY).as_mut().unwrap() }
        .as_mut()
        .expect("kernel directory not installed");

    // Error code bit 1 = write access, bit 2 = user-mode access (SDM 3a §4.7).
    let write = error_code & 0b010 != 0;
    let user = error_code & 0b100 != 0;
    let outcome =
        crate::process::table::with_process(pid, |p| p.address_space.handle_page_fault(fault_addr, write, user, kdir));

    match outcome {
        Some(Ok(FaultOutcome::Resolved)) => {}
        Some(Ok(FaultOutcome::Kill)) | None => crate::process::wait::exit(pid, current, -1),
        Some(Ok(FaultOutcome::Fatal)) | Some(Err(_)) => panic!("unrecoverable page fault at {fault_addr:#x}"),
    }
}

extern "x86-interrupt" fn timer_handler(_frame: InterruptFrame) {
    crate::irq::handle_irq(crate::irq::TIMER_VECTOR);
}

/// `extern "x86-interrupt"` only hands us the hardware-pushed frame, not
/// the general-purpose registers `int 0x80`'s arguments travel in, so the
/// syscall gate is this hand-written stub instead: it stacks
/// eax/ebx/ecx/edx in [`TrapFrame`]'s field order, calls [`syscall_trap`]
/// with a pointer to them, then unwinds the same four registers (now
/// carrying the return value in `eax`) before `iretd`.
#[naked]
unsafe extern "C" fn syscall_entry() {
    unsafe {
        asm!(
            "push edx",
            "push ecx",
            "push ebx",
            "push eax",
            "mov eax, esp",
            "push eax",
            "call {handler}",
            "add esp, 4",
            "pop eax",
            "pop ebx",
            "pop ecx",
            "pop edx",
            "iretd",
            handler = sym syscall_trap,
            options(noreturn),
        );
    }
}

extern "C" fn syscall_trap(frame: *mut TrapFrame) {
    let current = crate::arch::current_thread_id();
    let pid = crate::process::table::with_thread(current, |t| t.process).expect("syscall: thread missing process");
    let trap = unsafe { &mut *frame };
    crate::syscall::dispatch(pid, current, trap);
}
