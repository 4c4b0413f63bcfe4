//! 32-bit ELF executable subset (§4.E): header and program-header
//! parsing. Mapping program headers into an address space is
//! `process::loader`'s job; this module only understands the file format.

use crate::error::KernelError;

const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const CLASS_32: u8 = 1;
const DATA_LE: u8 = 1;
const MACHINE_I386: u16 = 3;
const TYPE_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 1 << 0;
        const WRITE   = 1 << 1;
        const READ    = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub kind: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: SegmentFlags,
}

pub struct ElfImage<'a> {
    data: &'a [u8],
    pub entry: u32,
    ph_offset: u32,
    ph_entry_size: u16,
    ph_count: u16,
}

fn read_u16(data: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(off..off + 2)?.try_into().ok()?))
}

fn read_u32(data: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(off..off + 4)?.try_into().ok()?))
}

impl<'a> ElfImage<'a> {
    /// Validate the ELF header and parse out the entry point and program
    /// header table location. Rejects anything but 32-bit little-endian
    /// i386 EXEC images.
    pub fn parse(data: &'a [u8]) -> Result<Self, KernelError> {
        let bad = || KernelError::InvalidArgument {
            what: "not a loadable 32-bit i386 EXEC ELF image",
        };
        if data.len() < 52 || data[0..4] != MAGIC {
            return Err(bad());
        }
        if data[4] != CLASS_32 || data[5] != DATA_LE {
            return Err(bad());
        }
        let kind = read_u16(data, 16).ok_or_else(bad)?;
        let machine = read_u16(data, 18).ok_or_else(bad)?;
        if kind != TYPE_EXEC || machine != MACHINE_I386 {
            return Err(bad());
        }
        let entry = read_u32(data, 24).ok_or_else(bad)?;
        let ph_offset = read_u32(data, 28).ok_or_else(bad)?;
        let ph_entry_size = read_u16(data, 42).ok_or_else(bad)?;
        let ph_count = read_u16(data, 44).ok_or_else(bad)?;
        Ok(Self {
            data,
            entry,
            ph_offset,
            ph_entry_size,
            ph_count,
        })
    }

    pub fn program_headers(&self) -> impl Iterator<Item = ProgramHeader> + '_ {
        (0..self.ph_count as usize).filter_map(move |i| {
            let base = self.ph_offset as usize + i * self.ph_entry_size as usize;
            let kind = read_u32(self.data, base)?;
            let offset = read_u32(self.data, base + 4)?;
            let vaddr = read_u32(self.data, base + 8)?;
            let filesz = read_u32(self.data, base + 16)?;
            let memsz = read_u32(self.data, base + 20)?;
            let raw_flags = read_u32(self.data, base + 24)?;
            let mut flags = SegmentFlags::empty();
            if raw_flags & 0x1 != 0 {
                flags |= SegmentFlags::EXECUTE;
            }
            if raw_flags & 0x2 != 0 {
                flags |= SegmentFlags::WRITE;
            }
            if raw_flags & 0x4 != 0 {
                flags |= SegmentFlags::READ;
            }
            Some(ProgramHeader {
                kind,
                offset,
                vaddr,
                filesz,
                memsz,
                flags,
            })
        })
    }

    pub fn loadable_segments(&self) -> impl Iterator<Item = ProgramHeader> + '_ {
        self.program_headers().filter(|ph| ph.kind == PT_LOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf(entry: u32, segments: &[(u32, u32, u32, u32, u32)]) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0u8; 52];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = CLASS_32;
        buf[5] = DATA_LE;
        buf[16..18].copy_from_slice(&TYPE_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&MACHINE_I386.to_le_bytes());
        buf[24..28].copy_from_slice(&entry.to_le_bytes());
        let ph_off = buf.len() as u32;
        buf[28..32].copy_from_slice(&ph_off.to_le_bytes());
        buf[42..44].copy_from_slice(&32u16.to_le_bytes());
        buf[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());
        for (offset, vaddr, filesz, memsz, flags) in segments {
            let mut ph = [0u8; 32];
            ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
            ph[4..8].copy_from_slice(&offset.to_le_bytes());
            ph[8..12].copy_from_slice(&vaddr.to_le_bytes());
            ph[16..20].copy_from_slice(&filesz.to_le_bytes());
            ph[20..24].copy_from_slice(&memsz.to_le_bytes());
            ph[24..28].copy_from_slice(&flags.to_le_bytes());
            buf.extend_from_slice(&ph);
        }
        buf
    }

    #[test]
    fn parses_entry_and_segments() {
        let image = build_minimal_elf(0x1000, &[(0, 0x1000, 0x100, 0x100, 0b101)]);
        let elf = ElfImage::parse(&image).unwrap();
        assert_eq!(elf.entry, 0x1000);
        let segs: alloc::vec::Vec<_> = elf.loadable_segments().collect();
        assert_eq!(segs.len(), 1);
        assert!(segs[0].flags.contains(SegmentFlags::READ | SegmentFlags::EXECUTE));
        assert!(!segs[0].flags.contains(SegmentFlags::WRITE));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_minimal_elf(0, &[]);
        image[0] = 0;
        assert!(ElfImage::parse(&image).is_err());
    }

    #[test]
    fn memsz_larger_than_filesz_is_accepted_for_bss() {
        let image = build_minimal_elf(0x2000, &[(0, 0x2000, 0x10, 0x1000, 0b110)]);
        let elf = ElfImage::parse(&image).unwrap();
        let seg = elf.loadable_segments().next().unwrap();
        assert!(seg.memsz > seg.filesz);
    }
}
