//! Page-size aware anonymous allocation.
//!
//! This module translates a logical page size into `mmap` flags and requests
//! a zero-initialized anonymous mapping through a [`PageMapper`].

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::memory::{MappedRegion, PageMapper};
use crate::util::{HUGE_PAGE_1G, HUGE_PAGE_2M, MAP_HUGE_1GB, Size};

/// Protection of every benchmark mapping.
pub const PROT: i32 = libc::PROT_READ | libc::PROT_WRITE;

/// Page size classes the allocator knows flags for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageSizeClass {
    /// The system's standard page size
    Standard,
    /// 2 MB huge pages (the default huge page size on x86_64)
    Huge2M,
    /// 1 GB huge pages
    Huge1G,
}

impl PageSizeClass {
    /// Classifies a page size given in bytes.
    ///
    /// Only the exact sizes 1 GB and 2 MB select a huge class; every other
    /// value is treated as a standard page size.
    pub fn from_page_size(page_size: usize) -> Self {
        match page_size {
            HUGE_PAGE_1G => PageSizeClass::Huge1G,
            HUGE_PAGE_2M => PageSizeClass::Huge2M,
            _ => PageSizeClass::Standard,
        }
    }

    /// The `mmap` flags requesting pages of this class.
    pub fn flags(&self) -> i32 {
        let base = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
        match self {
            PageSizeClass::Standard => base,
            PageSizeClass::Huge2M => base | libc::MAP_HUGETLB,
            PageSizeClass::Huge1G => base | libc::MAP_HUGETLB | MAP_HUGE_1GB,
        }
    }

    /// Size of one page of a huge class, `None` for standard pages.
    pub fn huge_page_size(&self) -> Option<usize> {
        match self {
            PageSizeClass::Standard => None,
            PageSizeClass::Huge2M => Some(HUGE_PAGE_2M),
            PageSizeClass::Huge1G => Some(HUGE_PAGE_1G),
        }
    }

    /// Whether this class is backed by huge pages.
    pub fn is_huge(&self) -> bool {
        self.huge_page_size().is_some()
    }
}

impl std::fmt::Display for PageSizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageSizeClass::Standard => write!(f, "standard"),
            PageSizeClass::Huge2M => write!(f, "huge 2 MB"),
            PageSizeClass::Huge1G => write!(f, "huge 1 GB"),
        }
    }
}

/// Errors that can happen while mapping a benchmark region
#[derive(Debug, Error)]
pub enum Error {
    /// A zero-sized region was requested
    #[error("Cannot map a zero-sized region")]
    ZeroSize,
    /// The mapping primitive rejected the request
    #[error("mmap of {size} with {class} pages (flags {flags:#x}) failed: {source}")]
    MapFailed {
        /// Requested region size
        size: Size,
        /// Page size class of the request
        class: PageSizeClass,
        /// Flags passed to the primitive
        flags: i32,
        /// Error reported by the primitive
        source: std::io::Error,
    },
}

/// Allocates anonymous regions backed by a chosen page size.
pub struct PageMappingAllocator<'m> {
    mapper: &'m dyn PageMapper,
}

impl<'m> PageMappingAllocator<'m> {
    /// Creates an allocator on top of `mapper`.
    pub fn new(mapper: &'m dyn PageMapper) -> Self {
        PageMappingAllocator { mapper }
    }

    /// Maps `size` bytes using pages of `page_size` bytes.
    ///
    /// The region is zero-filled by the mapping primitive. Huge page mappings
    /// are rounded up to a whole number of huge pages; the region keeps its
    /// logical size.
    ///
    /// # Errors
    ///
    /// * [`Error::ZeroSize`] if `size` is zero
    /// * [`Error::MapFailed`] if the mapping is rejected, e.g. because not enough
    ///   huge pages are reserved or the page size is not supported
    pub fn allocate(&self, size: usize, page_size: usize) -> Result<MappedRegion<'m>, Error> {
        if size == 0 {
            return Err(Error::ZeroSize);
        }
        let class = PageSizeClass::from_page_size(page_size);
        let flags = class.flags();
        let mapped_len = match class.huge_page_size() {
            Some(hp_size) => size.next_multiple_of(hp_size),
            None => size,
        };
        debug!(
            "Mapping {} ({} mapped) with {} pages, flags {:#x}",
            Size::from_bytes(size),
            Size::from_bytes(mapped_len),
            class,
            flags
        );
        let ptr = self.mapper.map(mapped_len, PROT, flags).map_err(|source| {
            warn!("mmap failed for {} pages: {}", class, source);
            Error::MapFailed {
                size: Size::from_bytes(size),
                class,
                flags,
                source,
            }
        })?;
        Ok(unsafe { MappedRegion::from_raw_parts(ptr, size, mapped_len, flags, self.mapper) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LibcMapper, MapRequest, RecordingMapper};
    use crate::util::PAGE_SIZE;

    const BASE: i32 = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;

    fn flags_for(page_size: usize) -> i32 {
        let mapper = RecordingMapper::new();
        let alloc = PageMappingAllocator::new(&mapper);
        let region = alloc.allocate(10240, page_size).expect("allocation failed");
        assert_eq!(region.len(), 10240);
        drop(region);
        let requests = mapper.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prot, PROT);
        requests[0].flags
    }

    #[test]
    fn test_flags_2m() {
        assert_eq!(flags_for(2 * 1024 * 1024), BASE | libc::MAP_HUGETLB);
    }

    #[test]
    fn test_flags_1g() {
        assert_eq!(
            flags_for(1024 * 1024 * 1024),
            BASE | libc::MAP_HUGETLB | (30 << 26)
        );
    }

    #[test]
    fn test_flags_standard() {
        for page_size in [4096, 16384, 65536, 1 << 21 | 1, 0, 1 << 22] {
            assert_eq!(flags_for(page_size), BASE);
        }
    }

    #[test]
    fn test_huge_mapping_rounded_up() {
        let mapper = RecordingMapper::new();
        let alloc = PageMappingAllocator::new(&mapper);
        let region = alloc.allocate(10240, HUGE_PAGE_2M).expect("allocation failed");
        assert_eq!(region.len(), 10240);
        assert_eq!(region.mapped_len(), HUGE_PAGE_2M);
        assert_eq!(
            mapper.requests()[0],
            MapRequest {
                len: HUGE_PAGE_2M,
                prot: PROT,
                flags: BASE | libc::MAP_HUGETLB,
            }
        );
        drop(region);
        assert_eq!(mapper.live_mappings(), 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mapper = RecordingMapper::new();
        let alloc = PageMappingAllocator::new(&mapper);
        assert!(matches!(alloc.allocate(0, PAGE_SIZE), Err(Error::ZeroSize)));
        assert!(mapper.requests().is_empty());
    }

    #[test]
    fn test_rejected_mapping() {
        let mapper = RecordingMapper::rejecting_hugetlb();
        let alloc = PageMappingAllocator::new(&mapper);
        let err = alloc.allocate(4096, HUGE_PAGE_1G).unwrap_err();
        match err {
            Error::MapFailed { class, flags, .. } => {
                assert_eq!(class, PageSizeClass::Huge1G);
                assert_eq!(flags, PageSizeClass::Huge1G.flags());
            }
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn test_libc_region_zeroed() -> anyhow::Result<()> {
        let mapper = LibcMapper;
        let alloc = PageMappingAllocator::new(&mapper);
        let region = alloc.allocate(16 * PAGE_SIZE, PAGE_SIZE)?;
        assert!(region.as_slice().iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_classification() {
        assert_eq!(PageSizeClass::from_page_size(4096), PageSizeClass::Standard);
        assert_eq!(PageSizeClass::from_page_size(2 << 20), PageSizeClass::Huge2M);
        assert_eq!(PageSizeClass::from_page_size(1 << 30), PageSizeClass::Huge1G);
        assert!(!PageSizeClass::Standard.is_huge());
        assert!(PageSizeClass::Huge2M.is_huge());
    }
}
