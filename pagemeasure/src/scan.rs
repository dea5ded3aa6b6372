use crate::process::{PageMap, PageReader, Process};
use crate::{
    check_page_size, first_code_region, select_executable, MemoryRegion, MemoryRegions, PageDigest,
    PageTranslation, ProcError, ProcResult, RegionPath,
};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// What a process scan looks at and records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(default))]
pub struct ScanOptions {
    /// Page size used to split regions into pages.  `None` means the page size of the
    /// running kernel.
    pub page_size: Option<u64>,
    /// Read and hash the content of every resident page.
    pub digest_pages: bool,
    /// Scan every executable region instead of only the first `r-x` one.
    pub all_executable: bool,
}

impl ScanOptions {
    pub fn new() -> ScanOptions {
        ScanOptions::default()
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn digest_pages(mut self, digest: bool) -> Self {
        self.digest_pages = digest;
        self
    }

    pub fn all_executable(mut self, all: bool) -> Self {
        self.all_executable = all;
        self
    }

    /// Picks the regions a scan will walk.
    ///
    /// `[vsyscall]` is never included: it lies outside the user address space covered by the
    /// pagemap.
    pub fn select(&self, regions: &MemoryRegions) -> Vec<MemoryRegion> {
        if self.all_executable {
            select_executable(regions)
                .into_iter()
                .filter(|r| r.pathname != RegionPath::Vsyscall)
                .collect()
        } else {
            first_code_region(regions).into_iter().collect()
        }
    }
}

/// The result for one page of a scanned region.
#[derive(Debug)]
pub enum PageRecord {
    Resident {
        translation: PageTranslation,
        /// Present when the scan was asked to digest pages
        digest: Option<PageDigest>,
    },
    NotResident {
        virtual_address: u64,
    },
    /// The entry or the content of this page could not be read
    Failed {
        virtual_address: u64,
        error: ProcError,
    },
}

impl PageRecord {
    pub fn virtual_address(&self) -> u64 {
        match self {
            PageRecord::Resident { translation, .. } => translation.virtual_address,
            PageRecord::NotResident { virtual_address }
            | PageRecord::Failed { virtual_address, .. } => *virtual_address,
        }
    }

    pub fn translation(&self) -> Option<&PageTranslation> {
        match self {
            PageRecord::Resident { translation, .. } => Some(translation),
            _ => None,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, PageRecord::Resident { .. })
    }
}

/// All page records of one region, in address order.
#[derive(Debug)]
pub struct RegionScan {
    pub region: MemoryRegion,
    pub pages: Vec<PageRecord>,
}

impl RegionScan {
    pub fn resident(&self) -> impl Iterator<Item = &PageTranslation> + '_ {
        self.pages.iter().filter_map(PageRecord::translation)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PageRecord> + '_ {
        self.pages.iter().filter(|p| matches!(p, PageRecord::Failed { .. }))
    }
}

/// The measurement of one process.
///
/// `regions` is empty when the process has no region matching the [`ScanOptions`].
#[derive(Debug)]
pub struct ProcessScan {
    pub pid: i32,
    pub regions: Vec<RegionScan>,
}

impl ProcessScan {
    /// Total number of resident pages over all scanned regions.
    pub fn resident_pages(&self) -> usize {
        self.regions.iter().map(|r| r.resident().count()).sum()
    }
}

/// Walks `region`, recording one [`PageRecord`] per page from its start to its end inclusive.
///
/// When `mem` is given, the content of each resident page is hashed.  A process-level error
/// (the process is gone, or access is denied) stops the walk and is returned; any other error
/// is recorded against its page and the walk goes on.
pub fn scan_region(
    pagemap: &mut PageMap,
    mem: Option<&PageReader>,
    region: &MemoryRegion,
) -> ProcResult<RegionScan> {
    let pid = pagemap.pid();
    let mut pages = Vec::with_capacity(region.pages(pagemap.page_size()) as usize + 1);

    for result in pagemap.walk(region) {
        let record = match result {
            Ok(translation) if translation.resident => {
                let address = translation.virtual_address;
                match mem.map(|m| m.digest(address)) {
                    None => PageRecord::Resident {
                        translation,
                        digest: None,
                    },
                    Some(Ok(digest)) => PageRecord::Resident {
                        translation,
                        digest: Some(digest),
                    },
                    Some(Err(e)) if e.is_process_level() => return Err(e),
                    Some(Err(error)) => {
                        log::warn!("pid {}: cannot digest {:#x}: {}", pid, address, error);
                        PageRecord::Failed {
                            virtual_address: address,
                            error,
                        }
                    }
                }
            }
            Ok(translation) => PageRecord::NotResident {
                virtual_address: translation.virtual_address,
            },
            Err(e) if e.is_process_level() => return Err(e),
            Err(error) => {
                let virtual_address = error
                    .context()
                    .and_then(|ctx| ctx.virtual_address)
                    .unwrap_or(region.start);
                log::warn!("pid {}: cannot translate {:#x}: {}", pid, virtual_address, error);
                PageRecord::Failed { virtual_address, error }
            }
        };
        pages.push(record);
    }

    Ok(RegionScan {
        region: region.clone(),
        pages,
    })
}

impl Process {
    /// Measures this process: selects its code region(s) and translates every page.
    ///
    /// Errors that concern the whole process abort the scan and carry the pid, plus the
    /// virtual address being resolved when the failure happened.
    pub fn scan(&self, options: &ScanOptions) -> ProcResult<ProcessScan> {
        let page_size = match options.page_size {
            Some(size) => check_page_size(size)?,
            None => crate::page_size(),
        };

        let regions = self.maps()?;
        let selected = options.select(&regions);
        let first = match selected.first() {
            Some(region) => region.start,
            None => {
                log::info!("pid {}: no executable region", self.pid);
                return Ok(ProcessScan {
                    pid: self.pid,
                    regions: Vec::new(),
                });
            }
        };

        let mut pagemap = self
            .pagemap()
            .map_err(|e| e.at_address(first))?
            .with_page_size(page_size)?;
        let mem = if options.digest_pages {
            Some(self.mem().map_err(|e| e.at_address(first))?.with_page_size(page_size)?)
        } else {
            None
        };

        let mut scans = Vec::with_capacity(selected.len());
        for region in &selected {
            scans.push(scan_region(&mut pagemap, mem.as_ref(), region)?);
        }

        let scan = ProcessScan {
            pid: self.pid,
            regions: scans,
        };
        log::info!(
            "pid {}: scanned {} region(s), {} resident page(s)",
            self.pid,
            scan.regions.len(),
            scan.resident_pages()
        );
        Ok(scan)
    }
}

/// Measures process `pid`.  See [`Process::scan()`].
pub fn scan_process(pid: i32, options: &ScanOptions) -> ProcResult<ProcessScan> {
    Process::new(pid)?.scan(options)
}
