//! # Hugebench Core
//!
//! `hugebench-core` measures how much huge pages speed up a page-strided memory
//! access workload compared to standard pages.
//!
//! ## Architecture Overview
//!
//! Each test maps a fresh anonymous region with a chosen page size, sweeps it
//! with one read per page and reports the elapsed cycles:
//!
//! - [`meminfo::MemInfoProbe`] - Detects huge page availability and size from
//!   `/proc/meminfo` or any other [`meminfo::MemInfoSource`].
//!
//! - [`allocator::PageMappingAllocator`] - Translates a page size into `mmap` flags
//!   and maps the region through a [`memory::PageMapper`].
//!
//! - [`touch`] module - The strided access plan and the touch/sweep loops.
//!
//! - [`timer::CycleClock`] - Cycle counting with calibrated overhead.
//!
//! ## Main Components
//!
//! - [`HugeBench`] - Runs the standard page test and the huge page test and
//!   computes the speedup.
//!
//! ## Platform Support
//!
//! Linux only. The time stamp counter is used on x86_64; other architectures
//! fall back to a nanosecond clock.

#![warn(missing_docs)]

pub mod allocator;
mod bench;
pub mod meminfo;
pub mod memory;
pub mod timer;
pub mod touch;
pub mod util;

pub use bench::{
    BenchConfig, BenchReport, Error, HugeBench, HugeBenchBuilder, Outcome, RegionPreset, Speedup,
    TestKind, TestResult, TimingScope, speedup,
};
