use log::warn;

use super::PageMapper;

/// An anonymous mapping owned for the duration of one test.
///
/// The mapping is released through the mapper that created it when the
/// region is dropped. The logical length may be shorter than the mapped
/// length, which huge page mappings round up to a whole page.
pub struct MappedRegion<'m> {
    ptr: *mut u8,
    len: usize,
    mapped_len: usize,
    flags: i32,
    mapper: &'m dyn PageMapper,
}

impl<'m> MappedRegion<'m> {
    /// Takes ownership of a mapping returned by `mapper`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live mapping of `mapped_len` readable and
    /// writable bytes created by `mapper`, not owned by anything else, and
    /// `len <= mapped_len`.
    pub unsafe fn from_raw_parts(
        ptr: *mut u8,
        len: usize,
        mapped_len: usize,
        flags: i32,
        mapper: &'m dyn PageMapper,
    ) -> Self {
        debug_assert!(len <= mapped_len);
        MappedRegion {
            ptr,
            len,
            mapped_len,
            flags,
            mapper,
        }
    }

    /// Start of the mapping.
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Logical length of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Length passed to the mapping primitive.
    pub fn mapped_len(&self) -> usize {
        self.mapped_len
    }

    /// Whether the mapping has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flags the mapping was created with.
    pub fn flags(&self) -> i32 {
        self.flags
    }

    /// Views the mapping as bytes.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Views the mapping as mutable bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Writes zeros over the whole mapping.
    pub fn zero_fill(&mut self) {
        unsafe { std::ptr::write_bytes(self.ptr, 0, self.len) };
    }
}

impl std::fmt::Debug for MappedRegion<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &self.len)
            .field("mapped_len", &self.mapped_len)
            .field("flags", &format_args!("{:#x}", self.flags))
            .finish()
    }
}

impl Drop for MappedRegion<'_> {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.mapper.unmap(self.ptr, self.mapped_len) } {
            warn!("Failed to unmap {:?}: {}", self, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingMapper;

    #[test]
    fn test_region_released_on_drop() -> anyhow::Result<()> {
        let mapper = RecordingMapper::new();
        {
            let p = mapper.map(4096, libc::PROT_READ | libc::PROT_WRITE, 0)?;
            let mut region = unsafe { MappedRegion::from_raw_parts(p, 4000, 4096, 0, &mapper) };
            assert_eq!(mapper.live_mappings(), 1);
            assert_eq!(region.len(), 4000);
            assert_eq!(region.mapped_len(), 4096);
            region.as_mut_slice()[17] = 0xAA;
            assert_eq!(region.as_slice()[17], 0xAA);
            region.zero_fill();
            assert!(region.as_slice().iter().all(|&b| b == 0));
        }
        assert_eq!(mapper.live_mappings(), 0);
        Ok(())
    }
}
