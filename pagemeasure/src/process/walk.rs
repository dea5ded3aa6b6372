use crate::{PageTranslation, ProcResult};

use super::PageMap;

/// Iterator over the translations of consecutive pages, from [`PageMap::walk()`].
///
/// Yields one item per page-aligned address from `start` to `end` inclusive, so the page at a
/// region's `end` is translated as well.  A page that is not resident, or whose entry could not
/// be read, does not end the walk: the error is yielded for that page and the next call moves
/// on.  Stop iterating to cancel a long walk.
pub struct RegionWalk<'a> {
    pagemap: &'a mut PageMap,
    next: Option<u64>,
    end: u64,
}

impl<'a> RegionWalk<'a> {
    pub(crate) fn new(pagemap: &'a mut PageMap, start: u64, end: u64) -> Self {
        let page_size = pagemap.page_size();
        RegionWalk {
            pagemap,
            next: Some(start - start % page_size),
            end,
        }
    }

    /// Number of pages left to translate.
    pub fn remaining(&self) -> u64 {
        match self.next {
            Some(next) if next <= self.end => (self.end - next) / self.pagemap.page_size() + 1,
            _ => 0,
        }
    }
}

impl<'a> Iterator for RegionWalk<'a> {
    type Item = ProcResult<PageTranslation>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.next.filter(|a| *a <= self.end)?;
        self.next = address.checked_add(self.pagemap.page_size());

        let result = self.pagemap.translate(address);
        match &result {
            Ok(t) if !t.resident => {
                log::debug!("pid {}: {:#x} not resident", self.pagemap.pid(), address)
            }
            Ok(_) => {}
            Err(e) => log::debug!("pid {}: {:#x} failed: {}", self.pagemap.pid(), address, e),
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining() as usize;
        (n, Some(n))
    }
}
