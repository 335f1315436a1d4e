//! Anonymous memory mappings.
//!
//! The `memory` module provides the following abstractions:
//! - `PageMapper`: the OS mapping primitive (`mmap`/`munmap`).
//! - `LibcMapper`: the `libc` implementation of `PageMapper`.
//! - `RecordingMapper`: a heap-backed `PageMapper` that records every request.
//! - `MappedRegion`: an owned mapping that is released when dropped.
mod mapper;
mod region;

pub use self::mapper::{LibcMapper, MapRequest, PageMapper, RecordingMapper};
pub use self::region::MappedRegion;
