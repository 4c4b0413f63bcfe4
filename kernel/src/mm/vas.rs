//! Address space and virtual region list: mmap/munmap, page-fault
//! resolution, and the COW fork of an address space.

use crate::config::{is_page_aligned, page_align_up, KERNEL_BASE, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::{self, FrameNumber};
use crate::mm::kmap;
use crate::mm::page_table::{tlb_invalidate, PageDirectory, PageFlags};
use crate::vfs::File;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MmapFlags: u32 {
        const FIXED     = 1 << 0;
        const ANONYMOUS = 1 << 1;
        const PRIVATE   = 1 << 2;
        const SHARED    = 1 << 3;
    }
}

fn prot_to_page_flags(prot: Prot) -> PageFlags {
    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if prot.contains(Prot::WRITE) {
        flags |= PageFlags::WRITABLE;
    }
    if prot.contains(Prot::EXECUTE) {
        flags |= PageFlags::EXECUTE;
    }
    flags
}

enum Backing {
    Anonymous,
    File { file: Arc<dyn File>, offset: usize },
}

/// A contiguous range of virtual addresses with uniform permissions and a
/// single backing. Regions within an address space never overlap and are
/// kept ordered by `start`.
pub struct Region {
    pub start: usize,
    pub pages: usize,
    prot: Prot,
    backing: Backing,
}

impl Region {
    pub fn len(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    pub fn end(&self) -> usize {
        self.start + self.len()
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }
}

/// Outcome of a page-fault classification (§4.C).
#[derive(Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    Resolved,
    /// User-mode fault with no survivable resolution: kill the process.
    Kill,
    /// Supervisor-mode fault on a kernel address: unrecoverable.
    Fatal,
}

/// Per-process virtual memory: the ordered region list plus the hardware
/// page directory that realizes it.
pub struct AddressSpace {
    regions: Vec<Region>,
    pub directory: PageDirectory,
}

impl AddressSpace {
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            regions: Vec::new(),
            directory: PageDirectory::new_from_kernel_template()?,
        })
    }

    fn index_for_insert(&self, start: usize) -> usize {
        self.regions.partition_point(|r| r.start < start)
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.regions.iter().any(|r| start < r.end() && r.start < end)
    }

    pub fn find_region(&self, addr: usize) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// `mmap(addr, length, prot, flags, file, offset)` per §4.C.
    pub fn mmap(
        &mut self,
        addr: usize,
        length: usize,
        prot: Prot,
        flags: MmapFlags,
        file: Option<(Arc<dyn File>, usize)>,
    ) -> KernelResult<usize> {
        if !is_page_aligned(addr) {
            return Err(KernelError::InvalidArgument {
                what: "mmap: address not page aligned",
            });
        }
        if let Some((_, offset)) = &file {
            if !is_page_aligned(*offset) {
                return Err(KernelError::InvalidArgument {
                    what: "mmap: file offset not page aligned",
                });
            }
        }
        if flags.contains(MmapFlags::SHARED) {
            return Err(KernelError::InvalidArgument {
                what: "mmap: SHARED mappings are not supported",
            });
        }
        if !flags.contains(MmapFlags::FIXED) {
            return Err(KernelError::InvalidArgument {
                what: "mmap: only FIXED placement is supported",
            });
        }
        let length = page_align_up(length.max(1));
        let pages = length / PAGE_SIZE;
        let end = addr + length;
        if end > KERNEL_BASE {
            return Err(KernelError::InvalidArgument {
                what: "mmap: range extends into kernel space",
            });
        }
        if self.overlaps(addr, end) {
            return Err(KernelError::InvalidArgument {
                what: "mmap: requested range overlaps an existing region",
            });
        }
        let backing = if flags.contains(MmapFlags::ANONYMOUS) {
            Backing::Anonymous
        } else {
            let (file, offset) = file.ok_or(KernelError::InvalidArgument {
                what: "mmap: non-anonymous mapping requires a file",
            })?;
            Backing::File { file, offset }
        };
        let region = Region {
            start: addr,
            pages,
            prot,
            backing,
        };
        let idx = self.index_for_insert(addr);
        self.regions.insert(idx, region);
        Ok(addr)
    }

    /// `munmap(addr, length)` per §4.C: unmap every page in range, `put`
    /// each returned frame, and trim or split the affected region(s).
    pub fn munmap(&mut self, addr: usize, length: usize) -> KernelResult<()> {
        if !is_page_aligned(addr) {
            return Err(KernelError::InvalidArgument {
                what: "munmap: address not page aligned",
            });
        }
        let length = page_align_up(length.max(1));
        let end = addr + length;

        for page in (addr..end).step_by(PAGE_SIZE) {
            if let Some(frame) = self.directory.unmap_page(page) {
                frame_allocator::put(frame);
            }
        }
        tlb_invalidate(addr, length);

        let mut rebuilt = Vec::with_capacity(self.regions.len());
        for mut region in self.regions.drain(..) {
            let rstart = region.start;
            let rend = region.end();
            if rend <= addr || rstart >= end {
                rebuilt.push(region);
                continue;
            }
            if rstart < addr {
                let head_pages = (addr - rstart) / PAGE_SIZE;
                rebuilt.push(Region {
                    start: rstart,
                    pages: head_pages,
                    prot: region.prot,
                    backing: clone_backing(&region.backing),
                });
            }
            if rend > end {
                let tail_start = end;
                let tail_pages = (rend - end) / PAGE_SIZE;
                region.start = tail_start;
                region.pages = tail_pages;
                rebuilt.push(region);
            }
        }
        self.regions = rebuilt;
        Ok(())
    }

    /// Resolve a page fault per §4.C. `write`/`user` describe the access;
    /// `kernel_dir` is the active kernel directory used for the `kmap`
    /// staging step of file-backed first touches.
    pub fn handle_page_fault(
        &mut self,
        fault_addr: usize,
        write: bool,
        user: bool,
        kernel_dir: &mut PageDirectory,
    ) -> KernelResult<FaultOutcome> {
        if fault_addr >= KERNEL_BASE {
            return Ok(if user {
                FaultOutcome::Kill
            } else {
                FaultOutcome::Fatal
            });
        }

        if let Some((frame, flags)) = self.directory.translate(fault_addr) {
            if write && !flags.contains(PageFlags::WRITABLE) {
                return self.resolve_cow_write(fault_addr, frame);
            }
            // present and permitted: nothing to do (race already resolved).
            return Ok(FaultOutcome::Resolved);
        }

        let page = fault_addr & !(PAGE_SIZE - 1);
        let region_idx = self.regions.iter().position(|r| r.contains(page));
        let Some(region_idx) = region_idx else {
            return Ok(FaultOutcome::Kill);
        };

        let frame = frame_allocator::alloc_pages(1)?;
        let kaddr = kmap::kmap(kernel_dir, frame)?;
        let buf = unsafe { core::slice::from_raw_parts_mut(kaddr as *mut u8, PAGE_SIZE) };
        buf.fill(0);

        let region = &self.regions[region_idx];
        let prot = region.prot;
        if let Backing::File { file, offset } = &region.backing {
            let page_offset = offset + (page - region.start);
            let _ = file.read_page(page_offset, buf);
        }
        kmap::kunmap(kernel_dir, kaddr);

        self.directory.map_page(page, frame, prot_to_page_flags(prot))?;
        tlb_invalidate(page, PAGE_SIZE);
        Ok(FaultOutcome::Resolved)
    }

    fn resolve_cow_write(&mut self, fault_addr: usize, old_frame: FrameNumber) -> KernelResult<FaultOutcome> {
        let page = fault_addr & !(PAGE_SIZE - 1);
        let region = self
            .regions
            .iter()
            .find(|r| r.contains(page))
            .ok_or(KernelError::BadFault { addr: fault_addr })?;
        let prot = region.prot;

        if frame_allocator::ZONE
            .lock()
            .as_ref()
            .map(|z| z.refcount(old_frame) == 1)
            .unwrap_or(false)
        {
            // sole owner: just flip the mapping writable, no copy needed.
            self.directory.unmap_page(page);
            self.directory.map_page(page, old_frame, prot_to_page_flags(prot))?;
            tlb_invalidate(page, PAGE_SIZE);
            return Ok(FaultOutcome::Resolved);
        }

        let new_frame = frame_allocator::alloc_pages(1)?;
        let phys_base = frame_allocator::phys_base();
        unsafe {
            let src = old_frame.addr(phys_base) as *const u8;
            let dst = new_frame.addr(phys_base) as *mut u8;
            core::ptr::copy_nonoverlapping(src, dst, PAGE_SIZE);
        }
        self.directory.unmap_page(page);
        self.directory.map_page(page, new_frame, prot_to_page_flags(prot))?;
        frame_allocator::put(old_frame);
        tlb_invalidate(page, PAGE_SIZE);
        Ok(FaultOutcome::Resolved)
    }

    /// Tear down every user mapping, releasing all frames (called on
    /// process exit).
    pub fn unmap_all(&mut self) {
        let regions: Vec<(usize, usize)> = self.regions.iter().map(|r| (r.start, r.len())).collect();
        for (start, len) in regions {
            let _ = self.munmap(start, len);
        }
    }

    /// Build a fresh address space that shares this one's user frames
    /// copy-on-write, per §4.C's fork clone.
    pub fn fork_cow(&mut self) -> KernelResult<AddressSpace> {
        let mut child = AddressSpace::new()?;
        child.regions = self
            .regions
            .iter()
            .map(|r| Region {
                start: r.start,
                pages: r.pages,
                prot: r.prot,
                backing: clone_backing(&r.backing),
            })
            .collect();
        self.directory.fork_cow_into(&mut child.directory)?;
        Ok(child)
    }
}

fn clone_backing(backing: &Backing) -> Backing {
    match backing {
        Backing::Anonymous => Backing::Anonymous,
        Backing::File { file, offset } => Backing::File {
            file: file.clone(),
            offset: *offset,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::InMemoryFile;

    fn setup(frames: usize) {
        frame_allocator::init(0, frames);
    }

    #[test]
    fn mmap_rejects_overlap_and_misalignment() {
        setup(64);
        let mut vas = AddressSpace::new().unwrap();
        vas.mmap(
            0x1000,
            PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MmapFlags::FIXED | MmapFlags::ANONYMOUS,
            None,
        )
        .unwrap();
        assert!(vas
            .mmap(
                0x1000 + 1,
                PAGE_SIZE,
                Prot::READ,
                MmapFlags::FIXED | MmapFlags::ANONYMOUS,
                None,
            )
            .is_err());
        assert!(vas
            .mmap(
                0x1000,
                PAGE_SIZE,
                Prot::READ,
                MmapFlags::FIXED | MmapFlags::ANONYMOUS,
                None,
            )
            .is_err());
    }

    #[test]
    fn anonymous_first_touch_is_zero_filled() {
        setup(64);
        let mut vas = AddressSpace::new().unwrap();
        vas.mmap(
            0x20000,
            PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MmapFlags::FIXED | MmapFlags::ANONYMOUS,
            None,
        )
        .unwrap();
        let mut kdir = PageDirectory::new_from_kernel_template().unwrap();
        let outcome = vas.handle_page_fault(0x20000, false, true, &mut kdir).unwrap();
        assert_eq!(outcome, FaultOutcome::Resolved);
        let (frame, _) = vas.directory.translate(0x20000).unwrap();
        let byte = unsafe { *(frame.addr(frame_allocator::phys_base()) as *const u8) };
        assert_eq!(byte, 0);
    }

    #[test]
    fn file_backed_first_touch_copies_page_contents() {
        setup(64);
        let mut vas = AddressSpace::new().unwrap();
        let file = InMemoryFile::new(alloc::vec![0xAA; PAGE_SIZE], true);
        vas.mmap(
            0x30000,
            PAGE_SIZE,
            Prot::READ,
            MmapFlags::FIXED,
            Some((file, 0)),
        )
        .unwrap();
        let mut kdir = PageDirectory::new_from_kernel_template().unwrap();
        vas.handle_page_fault(0x30000, false, true, &mut kdir).unwrap();
        let (frame, _) = vas.directory.translate(0x30000).unwrap();
        let byte = unsafe { *(frame.addr(frame_allocator::phys_base()) as *const u8) };
        assert_eq!(byte, 0xAA);
    }

    #[test]
    fn fault_outside_any_region_kills_the_process() {
        setup(16);
        let mut vas = AddressSpace::new().unwrap();
        let mut kdir = PageDirectory::new_from_kernel_template().unwrap();
        let outcome = vas.handle_page_fault(0x40000, false, true, &mut kdir).unwrap();
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn user_fault_on_kernel_address_kills_not_panics() {
        setup(16);
        let mut vas = AddressSpace::new().unwrap();
        let mut kdir = PageDirectory::new_from_kernel_template().unwrap();
        let outcome = vas
            .handle_page_fault(KERNEL_BASE + 0x10, false, true, &mut kdir)
            .unwrap();
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn munmap_round_trips_region_list() {
        setup(16);
        let mut vas = AddressSpace::new().unwrap();
        vas.mmap(
            0x1000,
            PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MmapFlags::FIXED | MmapFlags::ANONYMOUS,
            None,
        )
        .unwrap();
        assert_eq!(vas.regions.len(), 1);
        vas.munmap(0x1000, PAGE_SIZE).unwrap();
        assert_eq!(vas.regions.len(), 0);
    }

    #[test]
    fn fork_cow_shares_page_then_diverges_on_write() {
        setup(64);
        let mut parent = AddressSpace::new().unwrap();
        parent
            .mmap(
                0x50000,
                PAGE_SIZE,
                Prot::READ | Prot::WRITE,
                MmapFlags::FIXED | MmapFlags::ANONYMOUS,
                None,
            )
            .unwrap();
        let mut kdir = PageDirectory::new_from_kernel_template().unwrap();
        parent.handle_page_fault(0x50000, true, true, &mut kdir).unwrap();
        let (frame, _) = parent.directory.translate(0x50000).unwrap();
        unsafe { *(frame.addr(frame_allocator::phys_base()) as *mut u8) = 0xAA };

        let mut child = parent.fork_cow().unwrap();
        let (pf, _) = parent.directory.translate(0x50000).unwrap();
        let (cf, _) = child.directory.translate(0x50000).unwrap();
        assert_eq!(pf, cf);

        // child writes -> COW copy, parent's byte is untouched
        child.handle_page_fault(0x50000, true, true, &mut kdir).unwrap();
        let (cf2, _) = child.directory.translate(0x50000).unwrap();
        let phys_base = frame_allocator::phys_base();
        unsafe { *(cf2.addr(phys_base) as *mut u8) = 0xBB };

        let parent_byte = unsafe { *(pf.addr(phys_base) as *const u8) };
        assert_eq!(parent_byte, 0xAA);
    }
}
