#![allow(unknown_lints)]
//! This crate resolves which physical pages back the executable mappings of a running Linux
//! process.
//!
//! It reads two per-process files exposed by `procfs`:
//!
//! * `/proc/<pid>/maps`, the list of virtual memory regions of the process, from which the
//!   executable regions are selected, and
//! * `/proc/<pid>/pagemap`, a binary table with one 64-bit entry per virtual page, telling
//!   whether the page is resident and, if so, which physical frame holds it.
//!
//! Optionally, the content of each resident code page can be read through `/proc/<pid>/mem`
//! and hashed, which gives a measurement of the code a process is actually running.
//!
//! # Permissions
//!
//! Reading another process's `pagemap` and `mem` requires ptrace access to it.  Frame numbers
//! are only reported to callers with `CAP_SYS_ADMIN`; other callers see present pages with a
//! frame number of zero.
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> pagemeasure::ProcResult<()> {
//! use pagemeasure::process::Process;
//!
//! let process = Process::new(1234)?;
//! let regions = process.maps()?;
//! let mut pagemap = process.pagemap()?;
//! for region in pagemeasure::select_executable(&regions) {
//!     for page in pagemap.walk(&region) {
//!         println!("{:?}", page?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Cargo features
//!
//! * `serde1` -- Optional.  Derives `Serialize`/`Deserialize` for the data types.
//! * `backtrace` -- Optional.  Captures a stack trace whenever an `InternalError` is raised.

pub use pagemeasure_core::*;

use lazy_static::lazy_static;

use rustix::fd::AsFd;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

macro_rules! wrap_io_error {
    ($path:expr, $expr:expr) => {
        match $expr {
            Ok(v) => Ok(v),
            Err(e) => {
                let kind = e.kind();
                Err(::std::io::Error::new(
                    kind,
                    crate::IoErrorWrapper {
                        path: $path.to_owned(),
                        inner: e.into(),
                    },
                ))
            }
        }
    };
}

pub mod process;

mod scan;
pub use crate::scan::*;

mod container;
pub use crate::container::*;

lazy_static! {
    /// Memory page size, in bytes.
    ///
    /// This is calculated from `sysconf(_SC_PAGESIZE)`.
    static ref PAGESIZE: u64 = {
        rustix::param::page_size() as u64
    };
}

/// Memory page size of the running kernel, in bytes.
///
/// This is calculated once from `sysconf(_SC_PAGESIZE)`.
pub fn page_size() -> u64 {
    *PAGESIZE
}

/// A wrapper around a `File` that remembers the name of the path
pub(crate) struct FileWrapper {
    inner: File,
    path: PathBuf,
}

impl FileWrapper {
    #[cfg(test)]
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> Result<FileWrapper, io::Error> {
        let p = path.as_ref();
        let f = wrap_io_error!(p, File::open(p))?;
        Ok(FileWrapper {
            inner: f,
            path: p.to_owned(),
        })
    }

    pub(crate) fn open_at<P, Q, Fd>(root: P, dirfd: Fd, path: Q) -> Result<FileWrapper, io::Error>
    where
        Fd: AsFd,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        use rustix::fs::{Mode, OFlags};

        let p = root.as_ref().join(path.as_ref());
        let flags = OFlags::RDONLY | OFlags::CLOEXEC;
        let fd = wrap_io_error!(p, rustix::fs::openat(dirfd, path.as_ref(), flags, Mode::empty()))?;
        Ok(FileWrapper {
            inner: File::from(fd),
            path: p,
        })
    }

    /// Reads exactly `buf.len()` bytes at `offset` without moving the file cursor.
    pub(crate) fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;

        wrap_io_error!(self.path, self.inner.read_exact_at(buf, offset))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FileWrapper {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        wrap_io_error!(self.path, self.inner.read(buf))
    }
    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        wrap_io_error!(self.path, self.inner.read_to_end(buf))
    }
    fn read_to_string(&mut self, buf: &mut String) -> io::Result<usize> {
        wrap_io_error!(self.path, self.inner.read_to_string(buf))
    }
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        wrap_io_error!(self.path, self.inner.read_exact(buf))
    }
}

impl Seek for FileWrapper {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        wrap_io_error!(self.path, self.inner.seek(pos))
    }
}

/// Lists the memory regions of process `pid`, in address order.
///
/// See [`Process::maps()`](process::Process::maps).
pub fn list_mappings(pid: i32) -> ProcResult<Vec<MemoryRegion>> {
    let process = process::Process::new(pid)?;
    Ok(process.maps()?.into())
}

/// Resolves the page of process `pid` that holds `virtual_address`.
///
/// Opens the pagemap for a single lookup; use [`Process::pagemap()`](process::Process::pagemap)
/// to translate many addresses.
pub fn translate(pid: i32, virtual_address: u64) -> ProcResult<PageTranslation> {
    let process = process::Process::new(pid).map_err(|e| e.at_address(virtual_address))?;
    let mut pagemap = process.pagemap().map_err(|e| e.at_address(virtual_address))?;
    pagemap.translate(virtual_address)
}
