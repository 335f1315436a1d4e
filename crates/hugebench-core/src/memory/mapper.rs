use std::alloc::Layout;
use std::cell::RefCell;
use std::ptr::null_mut;
use std::rc::Rc;

use log::trace;

use crate::util::PAGE_SIZE;

/// The operating system's anonymous mapping primitive.
///
/// Mappings are always anonymous: no backing file and offset zero.
pub trait PageMapper {
    /// Maps `len` bytes with the given protection and flags.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping request is rejected.
    fn map(&self, len: usize, prot: i32, flags: i32) -> std::io::Result<*mut u8>;

    /// Releases a mapping previously returned by [`PageMapper::map`].
    ///
    /// # Safety
    ///
    /// * `ptr` must have been returned by `map` on this mapper with the same `len`
    /// * the region must not be accessed afterwards
    unsafe fn unmap(&self, ptr: *mut u8, len: usize) -> std::io::Result<()>;
}

impl<M: PageMapper + ?Sized> PageMapper for Rc<M> {
    fn map(&self, len: usize, prot: i32, flags: i32) -> std::io::Result<*mut u8> {
        (**self).map(len, prot, flags)
    }

    unsafe fn unmap(&self, ptr: *mut u8, len: usize) -> std::io::Result<()> {
        unsafe { (**self).unmap(ptr, len) }
    }
}

/// Maps memory with `libc::mmap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcMapper;

impl PageMapper for LibcMapper {
    fn map(&self, len: usize, prot: i32, flags: i32) -> std::io::Result<*mut u8> {
        let p = unsafe { libc::mmap(null_mut(), len, prot, flags, -1, 0) };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        trace!("mmap({}, {:#x}, {:#x}) = {:p}", len, prot, flags, p);
        Ok(p as *mut u8)
    }

    unsafe fn unmap(&self, ptr: *mut u8, len: usize) -> std::io::Result<()> {
        let r = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
        if r != 0 {
            return Err(std::io::Error::last_os_error());
        }
        trace!("munmap({:p}, {})", ptr, len);
        Ok(())
    }
}

/// A mapping request observed by [`RecordingMapper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    /// Requested length in bytes
    pub len: usize,
    /// Requested protection
    pub prot: i32,
    /// Requested flags
    pub flags: i32,
}

/// Heap-backed mapper recording every request.
///
/// Serves zeroed, page-aligned heap memory instead of OS mappings, so the
/// orchestration can be exercised without huge pages. Optionally rejects
/// requests whose flags contain `MAP_HUGETLB` to mimic a host without
/// reserved huge pages.
#[derive(Debug, Default)]
pub struct RecordingMapper {
    requests: RefCell<Vec<MapRequest>>,
    live: RefCell<usize>,
    reject_hugetlb: bool,
}

impl RecordingMapper {
    /// Creates a mapper that accepts every request.
    pub fn new() -> Self {
        RecordingMapper::default()
    }

    /// Creates a mapper that fails huge page requests with `ENOMEM`.
    pub fn rejecting_hugetlb() -> Self {
        RecordingMapper {
            reject_hugetlb: true,
            ..Default::default()
        }
    }

    /// All requests seen so far, including rejected ones.
    pub fn requests(&self) -> Vec<MapRequest> {
        self.requests.borrow().clone()
    }

    /// Number of mappings handed out and not yet released.
    pub fn live_mappings(&self) -> usize {
        *self.live.borrow()
    }

    fn layout(len: usize) -> std::io::Result<Layout> {
        Layout::from_size_align(len, PAGE_SIZE)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    }
}

impl PageMapper for RecordingMapper {
    fn map(&self, len: usize, prot: i32, flags: i32) -> std::io::Result<*mut u8> {
        self.requests
            .borrow_mut()
            .push(MapRequest { len, prot, flags });
        if self.reject_hugetlb && flags & libc::MAP_HUGETLB != 0 {
            return Err(std::io::Error::from_raw_os_error(libc::ENOMEM));
        }
        if len == 0 {
            return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
        }
        let p = unsafe { std::alloc::alloc_zeroed(Self::layout(len)?) };
        if p.is_null() {
            return Err(std::io::Error::from_raw_os_error(libc::ENOMEM));
        }
        *self.live.borrow_mut() += 1;
        Ok(p)
    }

    unsafe fn unmap(&self, ptr: *mut u8, len: usize) -> std::io::Result<()> {
        let layout = Self::layout(len)?;
        unsafe { std::alloc::dealloc(ptr, layout) };
        *self.live.borrow_mut() -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_libc_map_unmap() -> anyhow::Result<()> {
        let mapper = LibcMapper;
        let len = 4 * PAGE_SIZE;
        let p = mapper.map(
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
        )?;
        assert!(!p.is_null());
        unsafe {
            assert_eq!(*p.add(len - 1), 0);
            *p = 42;
            assert_eq!(*p, 42);
            mapper.unmap(p, len)?;
        }
        Ok(())
    }

    #[test]
    fn test_libc_map_rejects_zero_len() {
        let mapper = LibcMapper;
        let r = mapper.map(
            0,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_recording_mapper() -> anyhow::Result<()> {
        let mapper = RecordingMapper::new();
        let p = mapper.map(8192, libc::PROT_READ, libc::MAP_ANONYMOUS)?;
        assert_eq!(mapper.live_mappings(), 1);
        assert_eq!(p as usize % PAGE_SIZE, 0);
        unsafe { mapper.unmap(p, 8192)? };
        assert_eq!(mapper.live_mappings(), 0);
        assert_eq!(
            mapper.requests(),
            vec![MapRequest {
                len: 8192,
                prot: libc::PROT_READ,
                flags: libc::MAP_ANONYMOUS,
            }]
        );
        Ok(())
    }

    #[test]
    fn test_recording_mapper_rejects_hugetlb() {
        let mapper = RecordingMapper::rejecting_hugetlb();
        let r = mapper.map(4096, libc::PROT_READ, libc::MAP_ANONYMOUS | libc::MAP_HUGETLB);
        assert_eq!(r.unwrap_err().raw_os_error(), Some(libc::ENOMEM));
        assert_eq!(mapper.requests().len(), 1);
        assert_eq!(mapper.live_mappings(), 0);
    }
}
