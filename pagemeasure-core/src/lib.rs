//! This crate provides the data structures and decoders behind `pagemeasure`.
//!
//! Nothing in here touches the filesystem.  Every parser works on a [`Read`] or [`BufRead`]
//! implementor, so the same code handles a live `/proc/<pid>/maps` file, a synthetic table
//! written by a test, or a byte buffer captured from another machine.
//!
//! The two formats decoded here are:
//!
//! * the textual memory-map listing found in `/proc/<pid>/maps` (see [`MemoryRegions`]), and
//! * the binary page-table-state table found in `/proc/<pid>/pagemap`
//!   (see [`PagemapEntry`] and [`read_translation`]).
//!
//! Most users will want the `pagemeasure` crate instead, which opens those files for a given
//! process and re-exports everything from here.
//!
//! # Cargo features
//!
//! * `serde1` -- Optional.  Derives `Serialize`/`Deserialize` for the public data types.
//! * `backtrace` -- Optional.  Captures a stack trace whenever an `InternalError` is raised.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;

macro_rules! build_internal_error {
    ($err: expr) => {
        crate::ProcError::InternalError(crate::InternalError {
            msg: format!("Internal Unwrap Error: {}", $err),
            file: file!(),
            line: line!(),
            #[cfg(feature = "backtrace")]
            backtrace: backtrace::Backtrace::new(),
        })
    };
    ($err: expr, $msg: expr) => {
        crate::ProcError::InternalError(crate::InternalError {
            msg: format!("Internal Unwrap Error: {}: {}", $msg, $err),
            file: file!(),
            line: line!(),
            #[cfg(feature = "backtrace")]
            backtrace: backtrace::Backtrace::new(),
        })
    };
}

macro_rules! expect {
    ($e:expr) => {
        match crate::IntoResult::into($e) {
            Ok(v) => v,
            Err(e) => return Err(build_internal_error!(e)),
        }
    };
    ($e:expr, $msg:expr) => {
        match crate::IntoResult::into($e) {
            Ok(v) => v,
            Err(e) => return Err(build_internal_error!(e, $msg)),
        }
    };
}

macro_rules! from_str {
    ($t:tt, $e:expr) => {{
        let e = $e;
        expect!(
            $t::from_str_radix(e, 10),
            format!("Failed to parse {} ({:?}) as a {}", stringify!($e), e, stringify!($t),)
        )
    }};
    ($t:tt, $e:expr, $radix:expr) => {{
        let e = $e;
        expect!(
            $t::from_str_radix(e, $radix),
            format!("Failed to parse {} ({:?}) as a {}", stringify!($e), e, stringify!($t))
        )
    }};
}

mod types;
pub use types::*;

mod maps;
pub use maps::*;

mod pagemap;
pub use pagemap::*;

mod digest;
pub use digest::*;

mod container;
pub use container::*;

/// Smallest page size supported by any Linux architecture.
///
/// Region boundaries in `/proc/<pid>/maps` are always a multiple of this.
pub const MIN_PAGE_SIZE: u64 = 4096;

// source: include/uapi/asm-generic/errno-base.h
const ESRCH: i32 = 3;

/// Largest page size accepted, that of a 1 GiB huge page.
///
/// A whole page is held in memory when it is digested.
pub const MAX_PAGE_SIZE: u64 = 1 << 30;

/// Checks that `page_size` can be used to split an address into a page index and an offset.
pub fn check_page_size(page_size: u64) -> ProcResult<u64> {
    if page_size == 0 || !page_size.is_power_of_two() {
        return Err(ProcError::Other(format!(
            "page size {} is not a non-zero power of two",
            page_size
        )));
    }
    if page_size > MAX_PAGE_SIZE {
        return Err(ProcError::Other(format!(
            "page size {} is larger than {}",
            page_size, MAX_PAGE_SIZE
        )));
    }
    Ok(page_size)
}

#[doc(hidden)]
pub trait IntoResult<T, E> {
    fn into(t: Self) -> Result<T, E>;
}

#[doc(hidden)]
#[derive(Debug)]
pub struct NoneError;

impl fmt::Display for NoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoneError")
    }
}

impl<T> IntoResult<T, NoneError> for Option<T> {
    fn into(t: Option<T>) -> Result<T, NoneError> {
        t.ok_or(NoneError)
    }
}

impl<T, E> IntoResult<T, E> for Result<T, E> {
    fn into(t: Result<T, E>) -> Result<T, E> {
        t
    }
}

/// A type that can be parsed from any [`Read`] source.
pub trait FromRead: Sized {
    fn from_read<R: Read>(r: R) -> ProcResult<Self>;
}

/// A type that is parsed line by line from a [`BufRead`] source.
pub trait FromBufRead: Sized {
    fn from_buf_read<R: BufRead>(r: R) -> ProcResult<Self>;
}

impl<T: FromBufRead> FromRead for T {
    fn from_read<R: Read>(r: R) -> ProcResult<Self> {
        T::from_buf_read(BufReader::new(r))
    }
}

/// Common result type for pagemeasure operations.
pub type ProcResult<T> = Result<T, ProcError>;

/// Where an error happened.
///
/// Every field is optional; they are filled in as the error travels up from the file read that
/// failed to the process scan that issued it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The process being inspected
    pub pid: Option<i32>,
    /// The file that could not be read
    pub path: Option<PathBuf>,
    /// The virtual address whose translation was attempted
    pub virtual_address: Option<u64>,
}

impl ErrorContext {
    pub fn from_path(path: PathBuf) -> ErrorContext {
        ErrorContext {
            path: Some(path),
            ..Default::default()
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if let Some(pid) = self.pid {
            parts.push(format!("pid {}", pid));
        }
        if let Some(path) = &self.path {
            parts.push(path.display().to_string());
        }
        if let Some(addr) = self.virtual_address {
            parts.push(format!("vaddr {:#x}", addr));
        }
        if parts.is_empty() {
            write!(f, "unknown location")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// The various error conditions in the pagemeasure crates.
#[derive(Debug)]
pub enum ProcError {
    /// The process exited, never existed, or one of its `/proc` files is gone.
    ProcessNotFound(ErrorContext),
    /// The caller lacks the privilege needed to read a per-process resource.
    PermissionDenied(ErrorContext),
    /// Any other read failure.
    Io(io::Error, ErrorContext),
    /// The container runtime does not know the requested container.
    ContainerNotFound(String),
    /// A value passed in by the caller was rejected.
    Other(String),
    /// A parsing invariant was broken.
    InternalError(InternalError),
}

impl ProcError {
    /// Records the pid on this error, if it has a context and no pid yet.
    pub fn with_pid(mut self, pid: i32) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.pid.get_or_insert(pid);
        }
        self
    }

    /// Records the virtual address on this error, if it has a context and no address yet.
    pub fn at_address(mut self, virtual_address: u64) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.virtual_address.get_or_insert(virtual_address);
        }
        self
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            ProcError::ProcessNotFound(ctx)
            | ProcError::PermissionDenied(ctx)
            | ProcError::Io(_, ctx) => Some(ctx),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            ProcError::ProcessNotFound(ctx)
            | ProcError::PermissionDenied(ctx)
            | ProcError::Io(_, ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Returns true if this error ends the inspection of the whole process.
    ///
    /// A vanished process or a missing privilege will not change from one page to the next,
    /// whereas other read errors are tied to a single page.
    pub fn is_process_level(&self) -> bool {
        matches!(self, ProcError::ProcessNotFound(_) | ProcError::PermissionDenied(_))
    }
}

/// An internal error in the pagemeasure crates
///
/// If you encounter this error, consider it a bug and please report it.
pub struct InternalError {
    pub msg: String,
    pub file: &'static str,
    pub line: u32,
    #[cfg(feature = "backtrace")]
    pub backtrace: backtrace::Backtrace,
}

impl fmt::Debug for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bug at {}:{}: {}", self.file, self.line, self.msg)
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bug at {}:{}: {}", self.file, self.line, self.msg)
    }
}

/// An `io::Error` payload that remembers which file was being read.
#[derive(Debug)]
pub struct IoErrorWrapper {
    pub path: PathBuf,
    pub inner: io::Error,
}

impl std::error::Error for IoErrorWrapper {}

impl fmt::Display for IoErrorWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IoErrorWrapper({}): {}", self.path.display(), self.inner)
    }
}

impl From<io::Error> for ProcError {
    fn from(io: io::Error) -> Self {
        use io::ErrorKind;

        let wrapper = io.get_ref().and_then(|inner| inner.downcast_ref::<IoErrorWrapper>());
        let path = wrapper.map(|w| w.path.clone());
        let raw = wrapper.and_then(|w| w.inner.raw_os_error()).or_else(|| io.raw_os_error());
        let ctx = ErrorContext {
            path,
            ..Default::default()
        };

        match io.kind() {
            ErrorKind::PermissionDenied => ProcError::PermissionDenied(ctx),
            ErrorKind::NotFound => ProcError::ProcessNotFound(ctx),
            // a reaped process makes reads through a stale /proc/<pid> descriptor fail with ESRCH
            _ if raw == Some(ESRCH) => ProcError::ProcessNotFound(ctx),
            _ => ProcError::Io(io, ctx),
        }
    }
}

impl From<InternalError> for ProcError {
    fn from(e: InternalError) -> Self {
        ProcError::InternalError(e)
    }
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcError::ProcessNotFound(ctx) => write!(f, "Process not found ({})", ctx),
            ProcError::PermissionDenied(ctx) => write!(f, "Permission denied ({})", ctx),
            ProcError::Io(inner, ctx) => write!(f, "Unexpected IO error ({}): {}", ctx, inner),
            ProcError::ContainerNotFound(id) => write!(f, "Container not found: {}", id),
            ProcError::Other(s) => write!(f, "Unknown error: {}", s),
            ProcError::InternalError(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for ProcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcError::Io(inner, _) => Some(inner),
            _ => None,
        }
    }
}
