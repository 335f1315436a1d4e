//! # Hugebench
//!
//! Hugebench measures the latency impact of huge-page-backed memory versus
//! standard pages. It maps an anonymous region with a chosen page size, walks
//! it with a stride of one page and counts the elapsed CPU cycles, then reports
//! the ratio between the standard page and the huge page run.
//!
//! ## Quickstart guide
//!
//! ```sh
//! # Reserve some 2 MB huge pages
//! echo 1024 | sudo tee /proc/sys/vm/nr_hugepages
//!
//! # Build and run the benchmark
//! cargo build --release
//! cargo run --release --bin=hugebench
//! ```
//!
//! Use `target/release/hugebench --help` to see available options.
//!
//! ## Modules
//!
//! - `allocator`: Page size classes and the mapping allocator.
//! - `meminfo`: Huge page discovery from `/proc/meminfo`.
//! - `memory`: The mapping primitive and owned mapped regions.
//! - `timer`: Cycle clocks with overhead calibration.
//! - `touch`: Access plans and the strided touch loops.
//! - `util`: Sizes and constants.
//!
//! ## External Crates
//!
//! - `log`: Used for logging throughout the crate.
pub use hugebench_core::*;
