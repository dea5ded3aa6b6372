#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

macro_rules! wrap_numeric {
    ($newtype: ident, $underlying: ident, $($c:tt)+) => {
        #[doc = stringify!($($c)+)]
        #[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
        #[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $newtype(pub $underlying);

        impl From<$newtype> for $underlying {
            fn from(value: $newtype) -> Self {
                value.0
            }
        }

        impl From<$underlying> for $newtype {
            fn from(value: $underlying) -> Self {
                $newtype(value)
            }
        }

        impl std::fmt::Display for $newtype {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::fmt::LowerHex for $newtype {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

wrap_numeric!(Pfn, u64, "A physical page frame number");
wrap_numeric!(
    PageIndex,
    u64,
    "The number of a virtual page, i.e. its address divided by the page size"
);

impl PageIndex {
    /// The index of the page holding `virtual_address`.
    pub fn containing(virtual_address: u64, page_size: u64) -> PageIndex {
        PageIndex(virtual_address / page_size)
    }

    /// Byte offset of this page's entry in a pagemap table.
    pub fn table_offset(self) -> u64 {
        self.0 * crate::PAGEMAP_ENTRY_SIZE
    }

    /// First virtual address covered by this page.
    pub fn base_address(self, page_size: u64) -> u64 {
        self.0 * page_size
    }
}

impl Pfn {
    /// The physical address of `offset` bytes into this frame.
    ///
    /// A 55-bit frame number times the page size can exceed 64 bits for corrupt entries; the
    /// product wraps instead of panicking, which keeps the offset bits intact.
    pub fn physical_address(self, page_size: u64, offset: u64) -> u64 {
        self.0.wrapping_mul(page_size).wrapping_add(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_index() {
        let idx = PageIndex::containing(0x400fff, 4096);
        assert_eq!(idx, PageIndex(0x400));
        assert_eq!(idx.table_offset(), 0x2000);
        assert_eq!(idx.base_address(4096), 0x400000);
        assert_eq!(format!("{:x}", idx), "400");

        assert_eq!(PageIndex::containing(0x1_0000, 0x1_0000), PageIndex(1));
    }

    #[test]
    fn test_pfn() {
        let pfn = Pfn::from(5u64);
        assert_eq!(pfn.physical_address(4096, 0), 0x5000);
        assert_eq!(pfn.physical_address(4096, 0x123), 0x5123);
        assert_eq!(u64::from(pfn), 5);
        assert_eq!(format!("{}", pfn), "5");

        let huge = Pfn(0x007F_FFFF_FFFF_FFFF);
        assert_eq!(huge.physical_address(4096, 0x10) % 4096, 0x10);
    }
}
