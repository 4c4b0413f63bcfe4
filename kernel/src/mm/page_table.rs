//! MMU interface: install/remove single virtual-to-physical mappings in a
//! named address space and keep the TLB coherent with them.
//!
//! The real implementation walks IA-32 two-level page tables through the
//! `x86` crate and only builds for the bare-metal target. Architecture-
//! independent callers (`mm::vas`, `process::fork`) only see [`PageDirectory`]
//! and never the hardware layout, so the same call sites host-test against
//! a software model that tracks exactly the same mapping contract.

use crate::config::is_page_aligned;
use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::{self, FrameNumber};
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT   = 1 << 0;
        const WRITABLE  = 1 << 1;
        const USER      = 1 << 2;
        const GLOBAL    = 1 << 3;
        const EXECUTE   = 1 << 4;
    }
}

impl PageFlags {
    pub fn kernel_rw() -> Self {
        Self::PRESENT | Self::WRITABLE | Self::GLOBAL
    }
}

/// One virtual-to-physical mapping entry, as seen by callers of the MMU
/// interface (not the hardware encoding).
#[derive(Debug, Clone, Copy)]
struct Mapping {
    frame: FrameNumber,
    flags: PageFlags,
}

/// Invalidate every page-aligned address in `[addr, addr + len)`.
pub fn tlb_invalidate(addr: usize, len: usize) {
    arch_tlb::invalidate(addr, len);
}

/// Invalidate the entire TLB.
pub fn tlb_flush() {
    arch_tlb::flush();
}

#[cfg(target_os = "none")]
mod arch_tlb {
    use crate::config::PAGE_SIZE;

    pub fn invalidate(addr: usize, len: usize) {
        let start = addr & !(PAGE_SIZE - 1);
        let end = addr + len;
        let mut page = start;
        while page < end {
            unsafe { x86::tlb::flush(page) };
            page += PAGE_SIZE;
        }
    }

    pub fn flush() {
        unsafe { x86::tlb::flush_all() };
    }
}

#[cfg(not(target_os = "none"))]
mod arch_tlb {
    pub fn invalidate(_addr: usize, _len: usize) {}
    pub fn flush() {}
}

/// A process's page directory: the root of its mapping hierarchy.
///
/// On bare metal this owns the frames backing the hardware page directory
/// and any page tables it has allocated; `kernel_directory()`'s entries are
/// shared by value into every address space rather than duplicated.
pub struct PageDirectory {
    #[cfg(target_os = "none")]
    inner: arch_impl::RealDirectory,
    #[cfg(not(target_os = "none"))]
    inner: mock_impl::MockDirectory,
}

impl PageDirectory {
    /// A fresh, empty directory with only the shared kernel half populated
    /// from the template (by value, never duplicated per §4.B).
    pub fn new_from_kernel_template() -> KernelResult<Self> {
        #[cfg(target_os = "none")]
        return Ok(Self {
            inner: arch_impl::RealDirectory::new_from_kernel_template()?,
        });
        #[cfg(not(target_os = "none"))]
        return Ok(Self {
            inner: mock_impl::MockDirectory::new_from_kernel_template(),
        });
    }

    /// Create intermediate tables as needed and install `virt -> frame`.
    /// Rolls back any intermediate table allocated for this call if a
    /// later allocation in the same call fails.
    pub fn map_page(&mut self, virt: usize, frame: FrameNumber, flags: PageFlags) -> KernelResult<()> {
        if !is_page_aligned(virt) {
            return Err(KernelError::InvalidArgument {
                what: "map_page: unaligned virtual address",
            });
        }
        self.inner.map_page(virt, frame, flags)
    }

    /// Clear the present bit of the leaf entry for `virt`, if any, and
    /// return the frame it mapped.
    pub fn unmap_page(&mut self, virt: usize) -> Option<FrameNumber> {
        self.inner.unmap_page(virt)
    }

    pub fn translate(&self, virt: usize) -> Option<(FrameNumber, PageFlags)> {
        self.inner.translate(virt)
    }

    /// Copy every present user entry from `self` into `child`, raising each
    /// target frame's refcount and marking both sides' entries read-only
    /// (COW). Kernel entries are shared by value, not copied.
    pub fn fork_cow_into(&mut self, child: &mut PageDirectory) -> KernelResult<()> {
        let entries: alloc::vec::Vec<(usize, FrameNumber, PageFlags)> = self.inner.user_entries();
        for (virt, frame, flags) in entries {
            let ro = flags & !PageFlags::WRITABLE;
            frame_allocator::get(frame);
            child.inner.map_page(virt, frame, ro)?;
            // parent's own mapping becomes read-only too
            self.inner.remap_flags(virt, ro);
        }
        Ok(())
    }
}

#[cfg(target_os = "none")]
mod arch_impl {
    use super::{KernelError, KernelResult, Mapping, PageFlags};
    use crate::config::{ENTRIES_PER_TABLE, KERNEL_BASE, PAGE_SIZE};
    use crate::mm::frame_allocator::{self, FrameNumber};
    use x86::bits32::paging::{PDEntry, PDFlags, PTEntry, PTFlags, PAddr, PD, PT};

    const fn pd_index(virt: usize) -> usize {
        (virt >> 22) & 0x3ff
    }
    const fn pt_index(virt: usize) -> usize {
        (virt >> 12) & 0x3ff
    }

    pub struct RealDirectory {
        pd_frame: FrameNumber,
    }

    impl RealDirectory {
        fn pd(&self) -> &'static mut PD {
            unsafe { &mut *(self.phys_base(self.pd_frame) as *mut PD) }
        }

        fn phys_base(&self, frame: FrameNumber) -> usize {
            frame.addr(0)
        }

        pub fn new_from_kernel_template() -> KernelResult<Self> {
            let pd_frame = frame_allocator::alloc_pages(1)?;
            let dir = Self { pd_frame };
            let pd = dir.pd();
            for e in pd.iter_mut() {
                *e = PDEntry(0);
            }
            if let Some(template) = kernel_template() {
                for i in pd_index(KERNEL_BASE)..ENTRIES_PER_TABLE {
                    pd[i] = template.pd()[i];
                }
            }
            Ok(dir)
        }

        pub fn map_page(&mut self, virt: usize, frame: FrameNumber, flags: PageFlags) -> KernelResult<()> {
            let pdi = pd_index(virt);
            let pti = pt_index(virt);
            let pd = self.pd();
            let mut allocated_pt = None;
            if !pd[pdi].is_present() {
                let pt_frame = frame_allocator::alloc_pages(1).map_err(|e| e)?;
                let pt_ptr = self.phys_base(pt_frame) as *mut PT;
                unsafe {
                    for e in (*pt_ptr).iter_mut() {
                        *e = PTEntry(0);
                    }
                }
                pd[pdi] = PDEntry::new(PAddr::from(self.phys_base(pt_frame) as u32), pd_flags(flags));
                allocated_pt = Some(pt_frame);
            }
            let pt_phys = pd[pdi].address().as_u32() as usize;
            let pt = unsafe { &mut *(pt_phys as *mut PT) };
            if pt[pti].is_present() {
                if let Some(f) = allocated_pt {
                    pd[pdi] = PDEntry(0);
                    frame_allocator::free_pages(f, 1);
                }
                return Err(KernelError::InvalidArgument {
                    what: "map_page: address already mapped",
                });
            }
            pt[pti] = PTEntry::new(PAddr::from(frame.addr(0) as u32), pt_flags(flags));
            Ok(())
        }

        pub fn unmap_page(&mut self, virt: usize) -> Option<FrameNumber> {
            let pdi = pd_index(virt);
            let pti = pt_index(virt);
            let pd = self.pd();
            if !pd[pdi].is_present() {
                return None;
            }
            let pt_phys = pd[pdi].address().as_u32() as usize;
            let pt = unsafe { &mut *(pt_phys as *mut PT) };
            if !pt[pti].is_present() {
                return None;
            }
            let frame = FrameNumber((pt[pti].address().as_u32() as usize / PAGE_SIZE) as u32);
            pt[pti] = PTEntry(0);
            if pt.iter().all(|e| !e.is_present()) {
                pd[pdi] = PDEntry(0);
                let pt_frame = FrameNumber((pt_phys / PAGE_SIZE) as u32);
                frame_allocator::free_pages(pt_frame, 1);
            }
            Some(frame)
        }

        pub fn translate(&self, virt: usize) -> Option<(FrameNumber, PageFlags)> {
            let pdi = pd_index(virt);
            let pti = pt_index(virt);
            let pd = unsafe { &*(self.phys_base(self.pd_frame) as *const PD) };
            if !pd[pdi].is_present() {
                return None;
            }
            let pt_phys = pd[pdi].address().as_u32() as usize;
            let pt = unsafe { &*(pt_phys as *const PT) };
            if !pt[pti].is_present() {
                return None;
            }
            let frame = FrameNumber((pt[pti].address().as_u32() as usize / PAGE_SIZE) as u32);
            Some((frame, flags_from_pt(pt[pti].flags())))
        }

        pub fn remap_flags(&mut self, virt: usize, flags: PageFlags) {
            let pdi = pd_index(virt);
            let pti = pt_index(virt);
            let pd = self.pd();
            if !pd[pdi].is_present() {
                return;
            }
            let pt_phys = pd[pdi].address().as_u32() as usize;
            let pt = unsafe { &mut *(pt_phys as *mut PT) };
            if pt[pti].is_present() {
                let addr = pt[pti].address();
                pt[pti] = PTEntry::new(addr, pt_flags(flags));
            }
        }

        /// All present user-range leaf mappings, as (virt, frame, flags).
        pub fn user_entries(&mut self) -> alloc::vec::Vec<(usize, FrameNumber, PageFlags)> {
            let mut out = alloc::vec::Vec::new();
            let pd = self.pd();
            for pdi in 0..pd_index(KERNEL_BASE) {
                if !pd[pdi].is_present() {
                    continue;
                }
                let pt_phys = pd[pdi].address().as_u32() as usize;
                let pt = unsafe { &*(pt_phys as *const PT) };
                for pti in 0..ENTRIES_PER_TABLE {
                    if pt[pti].is_present() {
                        let virt = (pdi << 22) | (pti << 12);
                        let frame = FrameNumber((pt[pti].address().as_u32() as usize / PAGE_SIZE) as u32);
                        out.push((virt, frame, flags_from_pt(pt[pti].flags())));
                    }
                }
            }
            out
        }
    }

    fn pd_flags(flags: PageFlags) -> PDFlags {
        let mut f = PDFlags::P;
        if flags.contains(PageFlags::WRITABLE) {
            f |= PDFlags::RW;
        }
        if flags.contains(PageFlags::USER) {
            f |= PDFlags::US;
        }
        f
    }

    fn pt_flags(flags: PageFlags) -> PTFlags {
        let mut f = PTFlags::P;
        if flags.contains(PageFlags::WRITABLE) {
            f |= PTFlags::RW;
        }
        if flags.contains(PageFlags::USER) {
            f |= PTFlags::US;
        }
        if flags.contains(PageFlags::GLOBAL) {
            f |= PTFlags::G;
        }
        f
    }

    fn flags_from_pt(f: PTFlags) -> PageFlags {
        let mut out = PageFlags::PRESENT;
        if f.contains(PTFlags::RW) {
            out |= PageFlags::WRITABLE;
        }
        if f.contains(PTFlags::US) {
            out |= PageFlags::USER;
        }
        if f.contains(PTFlags::G) {
            out |= PageFlags::GLOBAL;
        }
        out
    }

    static mut KERNEL_TEMPLATE: Option<RealDirectory> = None;

    fn kernel_template() -> Option<&'static RealDirectory> {
        unsafe { (&raw const KERNEL_TEMPLATE).as_ref().unwrap().as_ref() }
    }

    /// Installed once at boot after the kernel's own mappings are built.
    pub fn set_kernel_template(dir: RealDirectory) {
        unsafe {
            KERNEL_TEMPLATE = Some(dir);
        }
    }
}

#[cfg(not(target_os = "none"))]
mod mock_impl {
    use super::{KernelError, KernelResult, Mapping, PageFlags};
    use crate::config::KERNEL_BASE;
    use crate::mm::frame_allocator::FrameNumber;
    use alloc::collections::BTreeMap;

    /// Software model of a page directory used when host-testing
    /// architecture-independent callers. Tracks exactly the mapping
    /// contract the real directory guarantees, with no hardware layout.
    #[derive(Default)]
    pub struct MockDirectory {
        entries: BTreeMap<usize, Mapping>,
    }

    impl MockDirectory {
        pub fn new_from_kernel_template() -> Self {
            Self::default()
        }

        pub fn map_page(&mut self, virt: usize, frame: FrameNumber, flags: PageFlags) -> KernelResult<()> {
            if self.entries.contains_key(&virt) {
                return Err(KernelError::InvalidArgument {
                    what: "map_page: address already mapped",
                });
            }
            self.entries.insert(virt, Mapping { frame, flags });
            Ok(())
        }

        pub fn unmap_page(&mut self, virt: usize) -> Option<FrameNumber> {
            self.entries.remove(&virt).map(|m| m.frame)
        }

        pub fn translate(&self, virt: usize) -> Option<(FrameNumber, PageFlags)> {
            self.entries.get(&virt).map(|m| (m.frame, m.flags))
        }

        pub fn remap_flags(&mut self, virt: usize, flags: PageFlags) {
            if let Some(m) = self.entries.get_mut(&virt) {
                m.flags = flags;
            }
        }

        pub fn user_entries(&mut self) -> alloc::vec::Vec<(usize, FrameNumber, PageFlags)> {
            self.entries
                .iter()
                .filter(|(&virt, _)| virt < KERNEL_BASE)
                .map(|(&virt, m)| (virt, m.frame, m.flags))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u32) -> FrameNumber {
        FrameNumber(n)
    }

    #[test]
    fn map_then_unmap_round_trips() {
        let mut dir = PageDirectory::new_from_kernel_template().unwrap();
        dir.map_page(0x1000, frame(5), PageFlags::PRESENT | PageFlags::WRITABLE)
            .unwrap();
        assert_eq!(dir.translate(0x1000).unwrap().0, frame(5));
        assert_eq!(dir.unmap_page(0x1000), Some(frame(5)));
        assert!(dir.translate(0x1000).is_none());
    }

    #[test]
    fn double_map_is_rejected() {
        let mut dir = PageDirectory::new_from_kernel_template().unwrap();
        dir.map_page(0x2000, frame(1), PageFlags::PRESENT).unwrap();
        assert!(dir.map_page(0x2000, frame(2), PageFlags::PRESENT).is_err());
    }

    #[test]
    fn unaligned_map_is_invalid_argument() {
        let mut dir = PageDirectory::new_from_kernel_template().unwrap();
        assert!(matches!(
            dir.map_page(0x2001, frame(1), PageFlags::PRESENT),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn fork_cow_shares_frame_and_marks_both_sides_read_only() {
        crate::mm::frame_allocator::init(0, 64);
        let f = frame_allocator::alloc_pages(1).unwrap();
        let mut parent = PageDirectory::new_from_kernel_template().unwrap();
        parent
            .map_page(0x3000, f, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER)
            .unwrap();
        let mut child = PageDirectory::new_from_kernel_template().unwrap();
        parent.fork_cow_into(&mut child).unwrap();

        let (pf, pflags) = parent.translate(0x3000).unwrap();
        let (cf, cflags) = child.translate(0x3000).unwrap();
        assert_eq!(pf, f);
        assert_eq!(cf, f);
        assert!(!pflags.contains(PageFlags::WRITABLE));
        assert!(!cflags.contains(PageFlags::WRITABLE));
    }
}
