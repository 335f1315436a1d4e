//! Strided page touching.
//!
//! A sweep walks a region with a fixed stride, once per base offset in
//! `0..rounds`. Each `touch` call reads one byte per stride-sized block, so a
//! stride equal to the page size touches every page once per call.

use std::hint::black_box;

use log::{debug, trace};
use serde::Serialize;
use thiserror::Error;

use crate::util::Size;

/// Errors for access plans that cannot be executed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The chunk count is zero
    #[error("Chunk count must be greater than 0")]
    ZeroChunks,
    /// Integer division of region size by chunk count yields a zero stride
    #[error(
        "Stride is zero: region of {region_size} bytes split into {chunk_count} chunks; \
         every touch would hit the same offset"
    )]
    ZeroStride {
        /// Region size in bytes
        region_size: usize,
        /// Number of chunks
        chunk_count: usize,
    },
    /// The stride is larger than the region
    #[error("Stride {stride} exceeds region size {region_size}")]
    StrideExceedsRegion {
        /// Stride in bytes
        stride: usize,
        /// Region size in bytes
        region_size: usize,
    },
}

/// A validated stride walk over a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessPlan {
    region_size: usize,
    chunk_count: usize,
    stride: usize,
}

impl AccessPlan {
    /// Splits `region_size` into `chunk_count` chunks, `stride = region_size / chunk_count`.
    ///
    /// # Errors
    ///
    /// * [`Error::ZeroChunks`] if `chunk_count` is zero
    /// * [`Error::ZeroStride`] if the division yields zero (more chunks than bytes)
    pub fn new(region_size: usize, chunk_count: usize) -> Result<Self, Error> {
        if chunk_count == 0 {
            return Err(Error::ZeroChunks);
        }
        Self::with_stride(region_size, chunk_count, region_size / chunk_count)
    }

    /// Builds a plan with an explicit stride.
    ///
    /// # Errors
    ///
    /// * [`Error::ZeroChunks`] if `chunk_count` is zero
    /// * [`Error::ZeroStride`] if `stride` is zero
    /// * [`Error::StrideExceedsRegion`] if `stride > region_size`
    pub fn with_stride(region_size: usize, chunk_count: usize, stride: usize) -> Result<Self, Error> {
        if chunk_count == 0 {
            return Err(Error::ZeroChunks);
        }
        if stride == 0 {
            return Err(Error::ZeroStride {
                region_size,
                chunk_count,
            });
        }
        if stride > region_size {
            return Err(Error::StrideExceedsRegion {
                stride,
                region_size,
            });
        }
        Ok(AccessPlan {
            region_size,
            chunk_count,
            stride,
        })
    }

    /// Region size in bytes
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// Number of chunks visited per `touch`
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Distance between two reads of one `touch`
    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// Offsets read by one [`touch`] call, in order.
///
/// Yields `i * stride + base_index` for `i in 0..chunk_count`, skipping
/// offsets at or beyond `region_size`.
pub fn cursors(
    stride: usize,
    base_index: usize,
    region_size: usize,
    chunk_count: usize,
) -> impl Iterator<Item = usize> {
    (0..chunk_count)
        .map(move |i| i * stride + base_index)
        .filter(move |&cursor| cursor < region_size)
}

/// Reads one byte per chunk at `i * stride + base_index` and folds them into a checksum.
///
/// Offsets at or beyond `region_size` are skipped. The checksum only exists to
/// keep the reads observable.
///
/// # Panics
///
/// Panics before reading anything if `stride > region_size` or if
/// `region_size` exceeds `region`.
pub fn touch(
    region: &[u8],
    stride: usize,
    base_index: usize,
    region_size: usize,
    chunk_count: usize,
) -> u64 {
    assert!(
        stride <= region_size,
        "stride {} exceeds region size {}",
        stride,
        region_size
    );
    assert!(
        region_size <= region.len(),
        "region size {} exceeds buffer of {} bytes",
        region_size,
        region.len()
    );
    let base = region.as_ptr();
    let mut acc: u64 = 0;
    for cursor in cursors(stride, base_index, region_size, chunk_count) {
        let byte = unsafe { std::ptr::read_volatile(base.add(cursor)) };
        acc = acc.wrapping_add(byte as u64);
    }
    acc
}

/// Runs `rounds` [`touch`] calls with base offsets `0..rounds`.
///
/// Returns the combined checksum of all calls.
pub fn sweep(region: &[u8], plan: &AccessPlan, rounds: usize) -> u64 {
    debug!(
        "Sweeping {} with stride {} over {} chunks, {} rounds",
        Size::from_bytes(plan.region_size),
        plan.stride,
        plan.chunk_count,
        rounds
    );
    let mut acc: u64 = 0;
    for base_index in 0..rounds {
        let sum = touch(
            region,
            plan.stride,
            base_index,
            plan.region_size,
            plan.chunk_count,
        );
        acc = acc.wrapping_add(black_box(sum));
    }
    trace!("sweep checksum {}", acc);
    acc
}
