use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{FromBufRead, ProcError, ProcResult, MIN_PAGE_SIZE};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// What backs a memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum RegionPath {
    /// The file that is backing the mapping.
    Path(PathBuf),
    /// The process's heap.
    Heap,
    /// The initial process's (also known as the main thread's) stack.
    Stack,
    /// The virtual dynamically linked shared object.
    Vdso,
    /// Shared kernel variables
    Vvar,
    /// obsolete virtual syscalls, succeeded by vdso
    Vsyscall,
    /// An anonymous mapping as obtained via mmap(2).
    Anonymous,
    /// Some other pseudo-path
    Other(String),
}

impl RegionPath {
    fn parse(path: &str) -> RegionPath {
        match path.trim() {
            "" => RegionPath::Anonymous,
            "[heap]" => RegionPath::Heap,
            "[stack]" => RegionPath::Stack,
            "[vdso]" => RegionPath::Vdso,
            "[vvar]" => RegionPath::Vvar,
            "[vsyscall]" => RegionPath::Vsyscall,
            x if x.starts_with('[') && x.ends_with(']') => {
                RegionPath::Other(x[1..x.len() - 1].to_string())
            }
            x => RegionPath::Path(PathBuf::from(x)),
        }
    }
}

/// One contiguous virtual address range of a process, as listed in `/proc/<pid>/maps`.
///
/// `start` is inclusive and `end` exclusive.  Both are page aligned and `start < end`; lines
/// that break this are never turned into a `MemoryRegion`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    /// The permissions token, verbatim (e.g. `r-xp`)
    pub permissions: String,
    /// The line this region was parsed from
    pub raw_line: String,
    /// The offset into the backing file
    pub offset: Option<u64>,
    /// The device (major, minor) of the backing file
    pub dev: Option<(u32, u32)>,
    /// The inode on that device.  0 means no inode is associated with the region.
    pub inode: Option<u64>,
    pub pathname: RegionPath,
}

impl MemoryRegion {
    /// Size of the region in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }

    /// Number of pages spanned by this region.
    pub fn pages(&self, page_size: u64) -> u64 {
        self.len().div_ceil(page_size)
    }

    fn perm(&self, idx: usize, flag: u8) -> bool {
        self.permissions.as_bytes().get(idx) == Some(&flag)
    }

    pub fn is_readable(&self) -> bool {
        self.perm(0, b'r')
    }

    pub fn is_writable(&self) -> bool {
        self.perm(1, b'w')
    }

    /// True if the permissions token carries the executable flag.
    pub fn is_executable(&self) -> bool {
        self.permissions.contains('x')
    }

    /// True for `r-x` regions: readable, executable and not writable.
    pub fn is_code(&self) -> bool {
        self.is_readable() && !self.is_writable() && self.perm(2, b'x')
    }
}

fn split_range(range: &str) -> ProcResult<(u64, u64)> {
    let (start, end) = expect!(range.split_once('-'), "address range has no '-'");
    Ok((from_str!(u64, start, 16), from_str!(u64, end, 16)))
}

fn split_dev(dev: &str) -> ProcResult<(u32, u32)> {
    let (major, minor) = expect!(dev.split_once(':'), "device has no ':'");
    Ok((from_str!(u32, major, 16), from_str!(u32, minor, 16)))
}

impl FromStr for MemoryRegion {
    type Err = ProcError;

    fn from_str(line: &str) -> ProcResult<MemoryRegion> {
        let mut s = line.split_whitespace();
        let (start, end) = split_range(expect!(s.next(), "missing address range"))?;
        let permissions = expect!(s.next(), "missing permissions");

        if start >= end {
            return Err(ProcError::Other(format!(
                "empty or inverted range {:#x}-{:#x}",
                start, end
            )));
        }
        if start % MIN_PAGE_SIZE != 0 || end % MIN_PAGE_SIZE != 0 {
            return Err(ProcError::Other(format!("unaligned range {:#x}-{:#x}", start, end)));
        }

        let offset = match s.next() {
            Some(v) => Some(from_str!(u64, v, 16)),
            None => None,
        };
        let dev = s.next().map(split_dev).transpose()?;
        let inode = match s.next() {
            Some(v) => Some(from_str!(u64, v)),
            None => None,
        };
        // the pathname may itself contain spaces
        let pathname = RegionPath::parse(&s.collect::<Vec<_>>().join(" "));

        Ok(MemoryRegion {
            start,
            end,
            permissions: permissions.to_string(),
            raw_line: line.to_string(),
            offset,
            dev,
            inode,
            pathname,
        })
    }
}

/// The ordered list of memory regions of a process.
///
/// Lines that cannot be parsed are skipped, so a single odd line does not hide the rest of
/// the listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MemoryRegions(pub Vec<MemoryRegion>);

impl FromBufRead for MemoryRegions {
    fn from_buf_read<R: BufRead>(mut r: R) -> ProcResult<Self> {
        let mut regions = Vec::new();
        let mut buf = Vec::new();

        // pathnames are raw bytes, so lines are not required to be UTF-8
        loop {
            buf.clear();
            if r.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches('\n');
            if line.trim().is_empty() {
                continue;
            }
            match MemoryRegion::from_str(line) {
                Ok(region) => regions.push(region),
                Err(e) => log::debug!("skipping maps line {:?}: {}", line, e),
            }
        }

        Ok(MemoryRegions(regions))
    }
}

impl MemoryRegions {
    pub fn iter(&self) -> std::slice::Iter<'_, MemoryRegion> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The region containing `address`, if any.
    pub fn find(&self, address: u64) -> Option<&MemoryRegion> {
        self.0.iter().find(|r| r.contains(address))
    }
}

impl IntoIterator for MemoryRegions {
    type Item = MemoryRegion;
    type IntoIter = std::vec::IntoIter<MemoryRegion>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MemoryRegions {
    type Item = &'a MemoryRegion;
    type IntoIter = std::slice::Iter<'a, MemoryRegion>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<MemoryRegions> for Vec<MemoryRegion> {
    fn from(regions: MemoryRegions) -> Self {
        regions.0
    }
}

/// Keeps the regions whose permissions carry the executable flag, in their original order.
///
/// An empty result is normal, e.g. for kernel threads which have no mappings at all.
pub fn select_executable<'a, I>(regions: I) -> Vec<MemoryRegion>
where
    I: IntoIterator<Item = &'a MemoryRegion>,
{
    regions.into_iter().filter(|r| r.is_executable()).cloned().collect()
}

/// The first `r-x` region, which for a regular executable is its text segment.
pub fn first_code_region<'a, I>(regions: I) -> Option<MemoryRegion>
where
    I: IntoIterator<Item = &'a MemoryRegion>,
{
    regions.into_iter().find(|r| r.is_code()).cloned()
}
