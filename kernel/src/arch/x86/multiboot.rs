//! Multiboot 1 info block (§6): the magic value check and the
//! `mem_upper` field the frame allocator sizes itself from.
//!
//! Only what this core reads is modeled; the dozens of other optional
//! fields (framebuffer, ELF section headers, drive info, ...) are left
//! unparsed.

pub const MAGIC: u32 = 0x2BADB002;

const FLAG_MEM: u32 = 1 << 0;
const FLAG_MODS: u32 = 1 << 3;

#[repr(C)]
struct RawInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    // remaining fields (ELF sections, memory map, ...) unused here.
}

#[repr(C)]
struct RawModule {
    mod_start: u32,
    mod_end: u32,
    string: u32,
    reserved: u32,
}

/// The initial ramdisk module: its bytes as loaded by the bootloader.
pub struct Module {
    pub start: usize,
    pub end: usize,
}

/// Parsed view of the subset of the Multiboot info block this kernel uses.
pub struct BootInfo {
    pub mem_upper_kib: usize,
    pub module: Option<Module>,
}

/// # Safety
/// `magic` and `info_addr` must be exactly the values the bootloader
/// handed to `_start` in `eax`/`ebx`.
pub unsafe fn parse(magic: u32, info_addr: usize) -> BootInfo {
    assert_eq!(magic, MAGIC, "not booted by a Multiboot-compliant loader");
    let info = unsafe { &*(info_addr as *const RawInfo) };

    let mem_upper_kib = if info.flags & FLAG_MEM != 0 {
        info.mem_upper as usize
    } else {
        0
    };

    let module = if info.flags & FLAG_MODS != 0 && info.mods_count > 0 {
        let first = unsafe { &*(info.mods_addr as *const RawModule) };
        Some(Module {
            start: first.mod_start as usize,
            end: first.mod_end as usize,
        })
    } else {
        None
    };

    BootInfo { mem_upper_kib, module }
}
