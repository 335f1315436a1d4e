/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Size of a 2 MB huge page in bytes
pub const HUGE_PAGE_2M: usize = 2 << 20;
/// Size of a 1 GB huge page in bytes
pub const HUGE_PAGE_1G: usize = 1 << 30;

/// Shift of the huge page size encoding in the `mmap` flags (`MAP_HUGE_SHIFT`)
pub const MAP_HUGE_SHIFT: i32 = 26;
/// Requests 1 GB huge pages from `mmap` (`MAP_HUGE_1GB`)
pub const MAP_HUGE_1GB: i32 = 30 << MAP_HUGE_SHIFT;

/// Number of rounds for timer calibration
pub const TIMER_ROUNDS: usize = 100_000;

/// Number of `touch` calls in one sweep, one per byte offset inside a 4 KB block
pub const SWEEP_ROUNDS: usize = PAGE_SIZE;
