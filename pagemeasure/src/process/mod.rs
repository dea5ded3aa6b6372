//! Functions and structs related to a single process
//!
//! The data comes from the files in a `/proc/<pid>/` directory.  If you have a process ID, use
//! [`Process::new(pid)`](struct.Process.html#method.new).
//!
//! In case you have procfs filesystem mounted to a location other than `/proc`, or want to
//! point the crate at a synthetic tree, use
//! [`Process::new_with_root()`](struct.Process.html#method.new_with_root).
//!
//! # Examples
//!
//! Print where the code of the current process lives in physical memory:
//!
//! ```rust
//! # use pagemeasure::process::Process;
//! let me = Process::myself().unwrap();
//! let regions = me.maps().unwrap();
//! let code = pagemeasure::first_code_region(&regions).unwrap();
//!
//! if let Ok(mut pagemap) = me.pagemap() {
//!     for page in pagemap.walk(&code).flatten() {
//!         if let Some(paddr) = page.physical() {
//!             println!("{:#x} -> {:#x}", page.virtual_address, paddr);
//!         }
//!     }
//! }
//! ```

use super::*;

use rustix::fd::OwnedFd;
use rustix::fs::{Mode, OFlags};

mod mem;
pub use mem::*;

mod pagemap;
pub use pagemap::*;

mod walk;
pub use walk::*;

#[cfg(test)]
mod tests;

/// Represents a process in `/proc/<pid>`.
///
/// **Note** The `Process` struct holds an open file descriptor to its `/proc/<pid>` directory.
/// If the process exits, later reads through this struct fail with
/// [`ProcError::ProcessNotFound`] instead of silently reading a recycled pid.
#[derive(Debug)]
pub struct Process {
    fd: OwnedFd,
    pub pid: i32,
    pub(crate) root: PathBuf,
}

/// Methods for constructing a new `Process` object.
impl Process {
    /// Returns a `Process` based on a specified PID.
    ///
    /// This can fail if the process doesn't exist, or if you don't have permission to access it.
    pub fn new(pid: i32) -> ProcResult<Process> {
        let root = PathBuf::from("/proc").join(pid.to_string());
        Self::new_with_root(root)
    }

    /// Returns a `Process` based on a specified `/proc/<pid>` path.
    ///
    /// The last component of `root` must be the pid, or a symlink to it (like `/proc/self`).
    pub fn new_with_root(root: PathBuf) -> ProcResult<Process> {
        let pidres = root
            .as_path()
            .components()
            .last()
            .and_then(|c| match c {
                std::path::Component::Normal(s) => Some(s),
                _ => None,
            })
            .and_then(|s| s.to_string_lossy().parse::<i32>().ok())
            .or_else(|| {
                rustix::fs::readlinkat(rustix::fs::CWD, &root, Vec::new())
                    .ok()
                    .and_then(|s| s.to_string_lossy().parse::<i32>().ok())
            });

        let flags = OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC;
        let file = wrap_io_error!(
            root,
            rustix::fs::openat(rustix::fs::CWD, &root, flags, Mode::empty())
        );
        let file = match (file, pidres) {
            (Ok(file), _) => file,
            (Err(e), Some(pid)) => return Err(ProcError::from(e).with_pid(pid)),
            (Err(e), None) => return Err(e.into()),
        };

        let pid = match pidres {
            Some(pid) => pid,
            None => return Err(ProcError::ProcessNotFound(ErrorContext::from_path(root))),
        };

        Ok(Process { fd: file, pid, root })
    }

    /// Returns a `Process` for the currently running process.
    ///
    /// This is done by using the `/proc/self` symlink
    pub fn myself() -> ProcResult<Process> {
        let root = PathBuf::from("/proc/self");
        Self::new_with_root(root)
    }
}

impl Process {
    /// Returns the process ID for this process, if the process was created from an ID.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Opens a file which is part of the process proc structure, tagging errors with the pid.
    pub(crate) fn open_at(&self, name: &str) -> ProcResult<FileWrapper> {
        FileWrapper::open_at(&self.root, &self.fd, name)
            .map_err(|e| ProcError::from(e).with_pid(self.pid))
    }

    /// Return the memory regions of the process and their access permissions, based on the
    /// `/proc/pid/maps` file.
    ///
    /// Lines that do not parse are skipped.  A process without any mapping (e.g. a kernel
    /// thread) yields an empty list.
    pub fn maps(&self) -> ProcResult<MemoryRegions> {
        let file = self.open_at("maps")?;
        MemoryRegions::from_read(file).map_err(|e| e.with_pid(self.pid))
    }

    /// Returns a struct that can be used to translate virtual addresses through the
    /// `/proc/pid/pagemap` file, using the page size of the running kernel.
    pub fn pagemap(&self) -> ProcResult<PageMap> {
        let file = self.open_at("pagemap")?;
        Ok(PageMap::from_file_wrapper(file, self.pid, crate::page_size()))
    }

    /// Returns a reader for the content of the process memory, through `/proc/pid/mem`.
    ///
    /// Requires the same ptrace access as `pagemap`.
    pub fn mem(&self) -> ProcResult<PageReader> {
        let file = self.open_at("mem")?;
        Ok(PageReader::from_file_wrapper(file, self.pid, crate::page_size()))
    }

    /// Is this process still running?
    ///
    /// Checked by looking for the `/proc/<pid>/maps` entry through the held directory handle.
    pub fn is_alive(&self) -> bool {
        rustix::fs::statat(&self.fd, "maps", rustix::fs::AtFlags::empty()).is_ok()
    }
}
