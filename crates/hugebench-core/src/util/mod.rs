//! Utility functions and types used throughout hugebench.
//!
//! This module provides:
//! - [`Size`] - Memory size representation
//! - Constants for page sizes and timer calibration ([`PAGE_SIZE`], [`HUGE_PAGE_2M`], ...)
//! - [`system_page_size`] - The standard page size reported by the OS

mod constants;
mod size;

pub use self::constants::*;
pub use self::size::Size;

/// Returns the standard page size of the running system in bytes.
///
/// Queries `sysconf(_SC_PAGESIZE)` and falls back to [`PAGE_SIZE`] if the
/// value is unavailable.
pub fn system_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        log::warn!("sysconf(_SC_PAGESIZE) failed, assuming {} bytes", PAGE_SIZE);
        return PAGE_SIZE;
    }
    size as usize
}

/// Creates a vector by applying a function to each index.
///
/// ```
/// use hugebench_core::util::make_vec;
///
/// let squares = make_vec(5, |i| i * i);
/// assert_eq!(squares, vec![0, 1, 4, 9, 16]);
/// ```
pub fn make_vec<T>(n: usize, f: impl Fn(usize) -> T) -> Vec<T> {
    let mut v = Vec::with_capacity(n);
    for i in 0..n {
        let val = f(i);
        v.push(val);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_page_size() {
        let size = system_page_size();
        assert!(size.is_power_of_two());
        assert!(size >= PAGE_SIZE);
    }

    #[test]
    fn test_huge_flag_encoding() {
        assert_eq!(MAP_HUGE_1GB, 30 << 26);
        assert_eq!(1usize << (MAP_HUGE_1GB >> MAP_HUGE_SHIFT), HUGE_PAGE_1G);
    }
}
