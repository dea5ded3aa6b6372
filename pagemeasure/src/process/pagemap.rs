use crate::{
    check_page_size, read_translation, FileWrapper, MemoryRegion, PageTranslation, ProcResult,
};

use super::RegionWalk;

/// Translates virtual addresses of one process by reading its `/proc/<pid>/pagemap`.
///
/// Holds the table open, so translating a whole region costs one open.
pub struct PageMap {
    reader: FileWrapper,
    pid: i32,
    page_size: u64,
}

impl PageMap {
    pub(crate) fn from_file_wrapper(file: FileWrapper, pid: i32, page_size: u64) -> Self {
        Self {
            reader: file,
            pid,
            page_size,
        }
    }

    /// Uses `page_size` instead of the page size of the running kernel.
    ///
    /// Returns an error if `page_size` is not a power of two.
    pub fn with_page_size(mut self, page_size: u64) -> ProcResult<Self> {
        self.page_size = check_page_size(page_size)?;
        Ok(self)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Resolves the page holding `virtual_address`.
    ///
    /// An address past the end of the table is reported as not resident.  Errors carry the pid
    /// and `virtual_address`.
    pub fn translate(&mut self, virtual_address: u64) -> ProcResult<PageTranslation> {
        read_translation(&mut self.reader, virtual_address, self.page_size)
            .map_err(|e| e.with_pid(self.pid).at_address(virtual_address))
    }

    /// Translates every page of `region`, one at a time.
    ///
    /// See [`RegionWalk`].
    pub fn walk(&mut self, region: &MemoryRegion) -> RegionWalk<'_> {
        RegionWalk::new(self, region.start, region.end)
    }

    /// Translates every page from `start` to `end`, both included.
    pub fn walk_range(&mut self, start: u64, end: u64) -> RegionWalk<'_> {
        RegionWalk::new(self, start, end)
    }
}
