//! Kernel temporary mappings: a bitmap-managed window of kernel virtual
//! addresses used for transient access to a frame (e.g. to fill a
//! freshly allocated user page during demand paging).
//!
//! On bare metal `kmap` installs a real mapping through `kernel_dir` at a
//! window address and hands that address back. The host build has no MMU
//! underneath `kernel_dir` to make that address dereferenceable (see
//! `mm::frame_allocator::Zone`'s host arena for the same problem solved on
//! the frame side), so it only tracks window capacity and hands back the
//! frame's own host-arena pointer directly.

#[cfg(target_os = "none")]
use crate::config::KMAP_WINDOW_BASE;
use crate::config::{KMAP_WINDOW_PAGES, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::FrameNumber;
#[cfg(target_os = "none")]
use crate::mm::page_table::{tlb_invalidate, PageFlags};
use crate::mm::page_table::PageDirectory;
use spin::Mutex;

struct Window {
    used: [bool; KMAP_WINDOW_PAGES],
}

impl Window {
    const fn new() -> Self {
        Self {
            used: [false; KMAP_WINDOW_PAGES],
        }
    }

    fn claim(&mut self) -> KernelResult<usize> {
        for (i, used) in self.used.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return Ok(i);
            }
        }
        Err(KernelError::OutOfMemory {
            requested: PAGE_SIZE,
            available: 0,
        })
    }

    #[cfg(target_os = "none")]
    fn release(&mut self, bit: usize) {
        self.used[bit] = false;
    }
}

static WINDOW: Mutex<Window> = Mutex::new(Window::new());

/// Map `frame` into the kernel temporary window and return its virtual
/// address.
#[cfg(target_os = "none")]
pub fn kmap(kernel_dir: &mut PageDirectory, frame: FrameNumber) -> KernelResult<usize> {
    let bit = WINDOW.lock().claim()?;
    let addr = KMAP_WINDOW_BASE + bit * PAGE_SIZE;
    if let Err(e) = kernel_dir.map_page(addr, frame, PageFlags::kernel_rw()) {
        WINDOW.lock().release(bit);
        return Err(e);
    }
    tlb_invalidate(addr, PAGE_SIZE);
    Ok(addr)
}

/// Unmap a previously `kmap`ped address and free its window slot.
#[cfg(target_os = "none")]
pub fn kunmap(kernel_dir: &mut PageDirectory, addr: usize) {
    debug_assert!(addr >= KMAP_WINDOW_BASE && addr < KMAP_WINDOW_BASE + KMAP_WINDOW_PAGES * PAGE_SIZE);
    let bit = (addr - KMAP_WINDOW_BASE) / PAGE_SIZE;
    kernel_dir.unmap_page(addr);
    tlb_invalidate(addr, PAGE_SIZE);
    WINDOW.lock().release(bit);
}

/// Host build: no real window to map into, so `kmap` only enforces the
/// window's capacity limit and hands back the frame's already-accessible
/// host-arena pointer (same address `frame_allocator::phys_base`-relative
/// arithmetic produces elsewhere, e.g. the COW-copy path).
#[cfg(not(target_os = "none"))]
pub fn kmap(_kernel_dir: &mut PageDirectory, frame: FrameNumber) -> KernelResult<usize> {
    WINDOW.lock().claim()?;
    Ok(frame.addr(crate::mm::frame_allocator::phys_base()))
}

/// Host build: releases one window slot. There is no real per-address
/// bookkeeping to reverse (`kmap` never claimed one), so any call simply
/// gives back one unit of window capacity.
#[cfg(not(target_os = "none"))]
pub fn kunmap(_kernel_dir: &mut PageDirectory, _addr: usize) {
    let mut window = WINDOW.lock();
    for used in window.used.iter_mut() {
        if *used {
            *used = false;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::frame_allocator;

    #[test]
    fn kmap_then_kunmap_frees_the_bit() {
        frame_allocator::init(0, 16);
        let mut dir = PageDirectory::new_from_kernel_template().unwrap();
        let f = frame_allocator::alloc_pages(1).unwrap();
        let addr = kmap(&mut dir, f).unwrap();
        unsafe { *(addr as *mut u8) = 0x42 };
        assert_eq!(unsafe { *(addr as *const u8) }, 0x42);
        kunmap(&mut dir, addr);

        // the freed window slot is reusable
        let f2 = frame_allocator::alloc_pages(1).unwrap();
        assert!(kmap(&mut dir, f2).is_ok());
        kunmap(&mut dir, 0);
    }

    #[test]
    fn exhausting_the_window_is_out_of_memory() {
        frame_allocator::init(0, KMAP_WINDOW_PAGES + 4);
        let mut dir = PageDirectory::new_from_kernel_template().unwrap();
        let mut addrs = alloc::vec::Vec::new();
        for _ in 0..KMAP_WINDOW_PAGES {
            let f = frame_allocator::alloc_pages(1).unwrap();
            addrs.push(kmap(&mut dir, f).unwrap());
        }
        let f = frame_allocator::alloc_pages(1).unwrap();
        assert!(matches!(kmap(&mut dir, f), Err(KernelError::OutOfMemory { .. })));

        // `WINDOW` is a process-global static shared by every test in this
        // binary; release what this test claimed so later tests see a
        // fresh window.
        for addr in addrs {
            kunmap(&mut dir, addr);
        }
    }
}
