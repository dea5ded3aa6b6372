use crate::{check_page_size, FileWrapper, PageDigest, ProcResult};

/// Reads whole pages of a process's memory through `/proc/<pid>/mem`.
///
/// Reads are positioned (`pread`), so one reader can be shared by the pages of a walk in any
/// order.  Reading a page that is not mapped fails with an I/O error.
pub struct PageReader {
    file: FileWrapper,
    pid: i32,
    page_size: u64,
}

impl PageReader {
    pub(crate) fn from_file_wrapper(file: FileWrapper, pid: i32, page_size: u64) -> Self {
        Self { file, pid, page_size }
    }

    /// Uses `page_size` instead of the page size of the running kernel.
    pub fn with_page_size(mut self, page_size: u64) -> ProcResult<Self> {
        self.page_size = check_page_size(page_size)?;
        Ok(self)
    }

    /// Reads the content of the page holding `virtual_address`.
    pub fn read_page(&self, virtual_address: u64) -> ProcResult<Vec<u8>> {
        let base = virtual_address - virtual_address % self.page_size;
        let mut buf = vec![0u8; self.page_size as usize];
        self.file
            .read_exact_at(&mut buf, base)
            .map_err(|e| crate::ProcError::from(e).with_pid(self.pid).at_address(base))?;
        Ok(buf)
    }

    /// Hashes the content of the page holding `virtual_address`.
    pub fn digest(&self, virtual_address: u64) -> ProcResult<PageDigest> {
        let base = virtual_address - virtual_address % self.page_size;
        let content = self.read_page(base)?;
        log::trace!("pid {}: digesting {:#x} from {}", self.pid, base, self.file.path().display());
        Ok(PageDigest::compute(base, &content))
    }
}
