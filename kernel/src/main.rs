#![no_std]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
use core::panic::PanicInfo;
#[cfg(target_os = "none")]
use talus_kernel::arch;
#[cfg(target_os = "none")]
use talus_kernel::process::{self, loader, pcb::INIT_PID, table, thread};
#[cfg(target_os = "none")]
use talus_kernel::vfs::Ramdisk;
#[cfg(target_os = "none")]
use talus_kernel::{println, sched};

/// The host build has no kernel entry point to run: its only purpose is
/// to make `cargo check`/`cargo build` succeed for the `[[bin]]` target
/// alongside the library's host-testable `cargo test`.
#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("[KERNEL PANIC] {}", info);
    arch::halt();
}

/// Entry point called by `arch::x86::boot.s` once a stack is live, with
/// the Multiboot magic and info-block pointer exactly as the bootloader
/// left them in `eax`/`ebx` (§6).
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn kernel_main(multiboot_magic: u32, multiboot_info: usize) -> ! {
    arch::x86::init();

    let boot_info = unsafe { arch::x86::multiboot::parse(multiboot_magic, multiboot_info) };
    println!("talus-kernel v{}", env!("CARGO_PKG_VERSION"));
    println!("multiboot: {} KiB upper memory", boot_info.mem_upper_kib);

    talus_kernel::mm::init(boot_info.mem_upper_kib);

    let kernel_dir =
        talus_kernel::mm::page_table::PageDirectory::new_from_kernel_template().expect("kernel directory");
    arch::x86::idt::set_kernel_directory(kernel_dir);

    process::init_process().expect("init process");

    let module = boot_info.module.expect("no initial ramdisk module");
    let image = unsafe { core::slice::from_raw_parts(module.start as *const u8, module.end - module.start) }.to_vec();
    let ramdisk = Ramdisk::parse(image).expect("malformed initial ramdisk");
    let init_file = ramdisk.open("init").expect("ramdisk missing \"init\" program");
    let bytes = init_file.bytes().to_vec();
    let file: alloc::sync::Arc<dyn talus_kernel::vfs::File> = alloc::sync::Arc::new(init_file);

    let entry = table::with_process(INIT_PID, |p| loader::load(&mut p.address_space, file.clone(), &bytes))
        .expect("init process missing")
        .expect("failed to load init program");

    const USER_STACK_TOP: usize = talus_kernel::config::KERNEL_BASE - talus_kernel::config::PAGE_SIZE;
    const USER_STACK_PAGES: usize = 16;
    table::with_process(INIT_PID, |p| {
        p.address_space.mmap(
            USER_STACK_TOP - USER_STACK_PAGES * talus_kernel::config::PAGE_SIZE,
            USER_STACK_PAGES * talus_kernel::config::PAGE_SIZE,
            talus_kernel::mm::Prot::READ | talus_kernel::mm::Prot::WRITE,
            talus_kernel::mm::MmapFlags::FIXED | talus_kernel::mm::MmapFlags::ANONYMOUS,
            None,
        )
    })
    .expect("init process missing")
    .expect("failed to map init's user stack");

    let init_tid = table::alloc_tid();
    let (stack_base, stack_top) = thread::alloc_kernel_stack(init_tid);
    let mut init_thread = thread::Thread::new(init_tid, INIT_PID, stack_base, stack_top);
    init_thread.user_entry = entry;
    init_thread.user_stack_top = USER_STACK_TOP as u32;
    init_thread.ctx = thread::prepare_initial_stack(stack_top, arch::x86::context::user_entry_trampoline as usize);
    table::insert_thread(init_thread);
    table::with_process(INIT_PID, |p| p.threads.push(init_tid));

    let idle_tid = table::alloc_tid();
    let (idle_base, idle_top) = thread::alloc_kernel_stack(idle_tid);
    let mut idle_thread = thread::Thread::new(idle_tid, INIT_PID, idle_base, idle_top);
    idle_thread.ctx = thread::prepare_initial_stack(idle_top, arch::x86::context::idle_loop as usize);
    let idle_ctx = idle_thread.ctx;
    table::insert_thread(idle_thread);
    sched::set_idle_thread(idle_tid);
    sched::make_runnable(init_tid);

    println!("talus-kernel initialized; entering scheduler");

    // The boot stack `kernel_main` is running on was never stamped with a
    // `ThreadId` (§9's masking trick needs a real thread stack for that),
    // so the handoff into the idle thread is a direct one-shot switch
    // rather than a call through `sched::reschedule`; every switch after
    // this one runs from a real, stamped kernel stack.
    let mut discarded_ctx: usize = 0;
    unsafe { arch::context_switch(&mut discarded_ctx as *mut usize, idle_ctx) };
    unreachable!("idle thread's entry point never returns");
}

