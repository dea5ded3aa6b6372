use crate::{PageIndex, Pfn, ProcResult};

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::{
    io::{self, Read, Seek, SeekFrom},
    mem::size_of,
};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Size in bytes of one entry of `/proc/<pid>/pagemap`.
pub const PAGEMAP_ENTRY_SIZE: u64 = size_of::<u64>() as u64;

const fn genmask(high: usize, low: usize) -> u64 {
    let mask_bits = size_of::<u64>() * 8;
    (!0 - (1 << low) + 1) & (!0 >> (mask_bits - 1 - high))
}

/// Bits 0-54 of a present entry.
pub const PFN_MASK: u64 = 0x007F_FFFF_FFFF_FFFF;

// source: Documentation/admin-guide/mm/pagemap.rst
bitflags! {
    /// One decoded entry of the page-table-state table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PagemapEntry: u64 {
        const PFN = genmask(54, 0);
        const SOFT_DIRTY = 1 << 55;
        const MMAP_EXCLUSIVE = 1 << 56;
        const FILE = 1 << 61;
        const SWAP = 1 << 62;
        const PRESENT = 1 << 63;
    }
}

impl PagemapEntry {
    /// Decodes an entry from its on-disk little-endian form.
    pub fn decode(bytes: [u8; 8]) -> PagemapEntry {
        PagemapEntry::from_bits_retain(LittleEndian::read_u64(&bytes))
    }

    /// True if the page is backed by a physical frame right now.
    ///
    /// This is bit 7 of the last byte of the on-disk entry.
    pub fn is_present(&self) -> bool {
        self.contains(PagemapEntry::PRESENT)
    }

    pub fn is_swapped(&self) -> bool {
        self.contains(PagemapEntry::SWAP)
    }

    /// The frame number bits.  Only meaningful when [`is_present()`](Self::is_present).
    ///
    /// Without `CAP_SYS_ADMIN` the kernel (since 4.2) reports zero here.
    pub fn frame_number(&self) -> Pfn {
        Pfn(self.bits() & PFN_MASK)
    }
}

/// The outcome of resolving one virtual page.
///
/// When `resident` is false, `frame_number` and `physical_address` are zero and carry no
/// meaning; use [`frame()`](Self::frame) and [`physical()`](Self::physical) to read them
/// safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct PageTranslation {
    pub virtual_address: u64,
    pub frame_number: u64,
    pub physical_address: u64,
    pub resident: bool,
}

impl PageTranslation {
    pub fn not_resident(virtual_address: u64) -> PageTranslation {
        PageTranslation {
            virtual_address,
            frame_number: 0,
            physical_address: 0,
            resident: false,
        }
    }

    /// Resolves `virtual_address` against the table entry of the page holding it.
    ///
    /// The physical address keeps the offset of `virtual_address` inside its page.
    pub fn resolve(entry: PagemapEntry, virtual_address: u64, page_size: u64) -> PageTranslation {
        if !entry.is_present() {
            return PageTranslation::not_resident(virtual_address);
        }
        let pfn = entry.frame_number();
        PageTranslation {
            virtual_address,
            frame_number: pfn.0,
            physical_address: pfn.physical_address(page_size, virtual_address % page_size),
            resident: true,
        }
    }

    pub fn frame(&self) -> Option<Pfn> {
        self.resident.then_some(Pfn(self.frame_number))
    }

    pub fn physical(&self) -> Option<u64> {
        self.resident.then_some(self.physical_address)
    }
}

/// Reads the entry for the page holding `virtual_address` from a pagemap table.
///
/// A table that ends before the entry (the address lies past the mapped address space)
/// yields a not-resident translation, not an error.
pub fn read_translation<R: Read + Seek>(
    reader: &mut R,
    virtual_address: u64,
    page_size: u64,
) -> ProcResult<PageTranslation> {
    let index = PageIndex::containing(virtual_address, page_size);
    reader.seek(SeekFrom::Start(index.table_offset()))?;

    match reader.read_u64::<LittleEndian>() {
        Ok(raw) => Ok(PageTranslation::resolve(
            PagemapEntry::from_bits_retain(raw),
            virtual_address,
            page_size,
        )),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            log::debug!("pagemap ends before page {:#x}", index);
            Ok(PageTranslation::not_resident(virtual_address))
        }
        Err(e) => Err(e.into()),
    }
}
