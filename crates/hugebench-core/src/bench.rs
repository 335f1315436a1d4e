use crate::allocator::{PageMappingAllocator, PageSizeClass};
use crate::memory::{LibcMapper, PageMapper};
use crate::meminfo::{KeyMatch, MemInfoProbe, MemInfoSource, ProcMemInfo};
use crate::timer::{ClockKind, CycleClock, CycleSample, measure};
use crate::touch::{AccessPlan, sweep};
use crate::util::{PAGE_SIZE, SWEEP_ROUNDS, Size, system_page_size};
use crate::{allocator, meminfo, touch};
use log::{info, warn};
use serde::Serialize;
use std::hint::black_box;
use thiserror::Error;

/// Which part of a test is inside the timed interval.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimingScope {
    /// Mapping, optional zero fill and the sweep
    #[default]
    AllocAndSweep,
    /// Only the sweep
    SweepOnly,
}

/// Region sizes with one chunk per 4 KB page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegionPreset {
    /// 2 GB region
    TwoGb,
    /// 4 GB region
    FourGb,
    /// 8 GB region
    EightGb,
}

impl RegionPreset {
    /// Region size of the preset
    pub fn size(&self) -> Size {
        match self {
            RegionPreset::TwoGb => Size::GB(2),
            RegionPreset::FourGb => Size::GB(4),
            RegionPreset::EightGb => Size::GB(8),
        }
    }

    /// Chunk count of the preset (one per 4 KB page)
    pub fn chunk_count(&self) -> usize {
        self.size().bytes() / PAGE_SIZE
    }
}

/// Configuration parameters for a benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchConfig {
    /// Size of the region mapped for each test, in bytes
    pub region_size: usize,
    /// Chunks visited by one touch call; the stride is `region_size / chunk_count`
    pub chunk_count: usize,
    /// Touch calls per test, with base offsets `0..sweep_rounds`
    pub sweep_rounds: usize,
    /// What the timed interval covers
    pub timing_scope: TimingScope,
    /// Explicitly zero the region before sweeping
    pub zero_fill: bool,
    /// Use this huge page size instead of the one reported by the system
    pub huge_page_size: Option<usize>,
    /// Run the huge page test before the standard test
    pub huge_first: bool,
}

impl BenchConfig {
    /// Configuration for a preset region size.
    pub fn from_preset(preset: RegionPreset) -> Self {
        BenchConfig {
            region_size: preset.size().bytes(),
            chunk_count: preset.chunk_count(),
            ..Default::default()
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            region_size: RegionPreset::TwoGb.size().bytes(),
            chunk_count: RegionPreset::TwoGb.chunk_count(),
            sweep_rounds: SWEEP_ROUNDS,
            timing_scope: TimingScope::default(),
            zero_fill: false,
            huge_page_size: None,
            huge_first: false,
        }
    }
}

/// The two tests of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestKind {
    /// Standard page size test
    Standard,
    /// Huge page test
    HugePage,
}

/// Terminal state of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Net cycles of the timed interval
    Measured(CycleSample),
    /// Huge pages are not available; nothing was measured
    Unsupported,
}

impl Outcome {
    /// The cycle count, or `-1` for [`Outcome::Unsupported`].
    pub fn as_legacy_cycles(&self) -> i64 {
        match self {
            Outcome::Measured(sample) => sample.cycles(),
            Outcome::Unsupported => -1,
        }
    }

    /// The sample, if one was taken
    pub fn sample(&self) -> Option<CycleSample> {
        match self {
            Outcome::Measured(sample) => Some(*sample),
            Outcome::Unsupported => None,
        }
    }
}

/// Result of one test.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Which test produced this result
    pub test: TestKind,
    /// Page size used, if the test ran
    pub page_size: Option<usize>,
    /// Page size class derived from `page_size`
    pub class: Option<PageSizeClass>,
    /// Measurement outcome
    pub outcome: Outcome,
}

impl TestResult {
    fn measured(test: TestKind, page_size: usize, sample: CycleSample) -> Self {
        TestResult {
            test,
            page_size: Some(page_size),
            class: Some(PageSizeClass::from_page_size(page_size)),
            outcome: Outcome::Measured(sample),
        }
    }

    fn unsupported(test: TestKind) -> Self {
        TestResult {
            test,
            page_size: None,
            class: None,
            outcome: Outcome::Unsupported,
        }
    }
}

/// Ratio of standard page cycles to huge page cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Speedup {
    /// `standard / huge`
    Ratio(f64),
    /// One of the tests has no usable sample
    NotApplicable,
}

impl std::fmt::Display for Speedup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speedup::Ratio(ratio) => write!(f, "{:.6}", ratio),
            Speedup::NotApplicable => write!(f, "n/a"),
        }
    }
}

/// Computes the speedup of `huge` over `standard`.
///
/// Returns [`Speedup::NotApplicable`] unless both tests were measured and the
/// huge page sample is non-zero.
pub fn speedup(standard: &TestResult, huge: &TestResult) -> Speedup {
    match (standard.outcome, huge.outcome) {
        (Outcome::Measured(standard), Outcome::Measured(huge)) if huge.cycles() != 0 => {
            Speedup::Ratio(standard.cycles() as f64 / huge.cycles() as f64)
        }
        _ => Speedup::NotApplicable,
    }
}

/// Results of a complete run.
#[derive(Debug, Serialize)]
pub struct BenchReport {
    /// ISO 8601 timestamp of when the run finished
    pub date: String,
    /// Clock used for timing
    pub clock: &'static str,
    /// Calibrated clock overhead subtracted from every sample
    pub clock_overhead: u64,
    /// Access plan used by both tests
    pub plan: AccessPlan,
    /// Standard page test
    pub standard: TestResult,
    /// Huge page test
    pub huge: TestResult,
    /// Standard over huge cycles
    pub speedup: Speedup,
}

impl std::fmt::Display for BenchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for result in [&self.standard, &self.huge] {
            let name = match result.test {
                TestKind::Standard => "default",
                TestKind::HugePage => "huge page",
            };
            match (result.page_size, result.outcome) {
                (Some(page_size), Outcome::Measured(sample)) => writeln!(
                    f,
                    "{} test: page size {} ({}), {} cycles",
                    name,
                    page_size,
                    Size::from_bytes(page_size),
                    sample
                )?,
                _ => writeln!(
                    f,
                    "{} test: unsupported ({})",
                    name,
                    result.outcome.as_legacy_cycles()
                )?,
            }
        }
        write!(f, "Huge Page Data Speedup = {}", self.speedup)
    }
}

/// Benchmark errors. All of them abort the run.
#[derive(Debug, Error)]
pub enum Error {
    /// The memory info source cannot be read
    #[error(transparent)]
    Environment(#[from] meminfo::Error),
    /// A region could not be mapped
    #[error(transparent)]
    Allocation(#[from] allocator::Error),
    /// Region size and chunk count do not form a usable plan
    #[error(transparent)]
    InvalidPlan(#[from] touch::Error),
    /// Other configuration problems
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Runs the standard page and huge page tests and compares them.
///
/// Every test maps a fresh region, sweeps it and releases it again; nothing
/// is shared between tests except the calibrated clock.
///
/// Use [`HugeBench::builder()`] to construct an instance.
pub struct HugeBench {
    probe: MemInfoProbe,
    mapper: Box<dyn PageMapper>,
    clock: Box<dyn CycleClock>,
    config: BenchConfig,
    plan: AccessPlan,
}

impl HugeBench {
    /// Creates a new builder.
    pub fn builder() -> HugeBenchBuilder {
        HugeBenchBuilder::default()
    }

    /// The validated access plan
    pub fn plan(&self) -> &AccessPlan {
        &self.plan
    }

    /// The run configuration
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Maps a region with `page_size` pages, sweeps it and returns the net cycles.
    fn run_test(&self, page_size: usize) -> Result<CycleSample, Error> {
        let allocator = PageMappingAllocator::new(self.mapper.as_ref());
        let clock = self.clock.as_ref();
        let size = self.config.region_size;
        let rounds = self.config.sweep_rounds;
        let (sample, checksum) = match self.config.timing_scope {
            TimingScope::AllocAndSweep => {
                let (sample, swept) = measure(clock, || -> Result<_, Error> {
                    let mut region = allocator.allocate(size, page_size)?;
                    if self.config.zero_fill {
                        region.zero_fill();
                    }
                    let checksum = sweep(region.as_slice(), &self.plan, rounds);
                    Ok((checksum, region))
                });
                let (checksum, region) = swept?;
                drop(region);
                (sample, checksum)
            }
            TimingScope::SweepOnly => {
                let mut region = allocator.allocate(size, page_size)?;
                if self.config.zero_fill {
                    region.zero_fill();
                }
                measure(clock, || sweep(region.as_slice(), &self.plan, rounds))
            }
        };
        black_box(checksum);
        info!("Cycles for {} = {}", page_size, sample);
        Ok(sample)
    }

    /// Measures the system's standard page size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the region cannot be mapped.
    pub fn run_standard_test(&self) -> Result<TestResult, Error> {
        let page_size = system_page_size();
        info!("default test default pagesize {}", page_size);
        let sample = self.run_test(page_size)?;
        Ok(TestResult::measured(TestKind::Standard, page_size, sample))
    }

    /// Measures huge pages, or reports [`Outcome::Unsupported`] if the system
    /// has none reserved or does not report their size.
    ///
    /// # Errors
    ///
    /// * [`Error::Environment`] if the memory info source cannot be read
    /// * [`Error::Allocation`] if the region cannot be mapped
    pub fn run_huge_page_test(&self) -> Result<TestResult, Error> {
        if !self.probe.huge_pages_enabled()? {
            info!("Huge pages are not enabled, skipping huge page test");
            return Ok(TestResult::unsupported(TestKind::HugePage));
        }
        let page_size = match self.config.huge_page_size {
            Some(page_size) => page_size,
            None => {
                let reported = self.probe.huge_page_size_bytes()?;
                if reported <= 0 {
                    warn!("Huge pages are enabled, but their size is not reported");
                    return Ok(TestResult::unsupported(TestKind::HugePage));
                }
                reported as usize
            }
        };
        info!("huge page test pagesize {}", page_size);
        let sample = self.run_test(page_size)?;
        Ok(TestResult::measured(TestKind::HugePage, page_size, sample))
    }

    /// Runs both tests and computes the speedup.
    ///
    /// # Errors
    ///
    /// Any error of the two tests aborts the run.
    pub fn run(&self) -> Result<BenchReport, Error> {
        info!(
            "Region {} with stride {} over {} chunks, {} rounds",
            Size::from_bytes(self.plan.region_size()),
            self.plan.stride(),
            self.plan.chunk_count(),
            self.config.sweep_rounds
        );
        let (standard, huge) = if self.config.huge_first {
            let huge = self.run_huge_page_test()?;
            (self.run_standard_test()?, huge)
        } else {
            let standard = self.run_standard_test()?;
            (standard, self.run_huge_page_test()?)
        };
        info!("default test time gap is {}", standard.outcome.as_legacy_cycles());
        info!("HPT test time gap is {}", huge.outcome.as_legacy_cycles());
        let speedup = speedup(&standard, &huge);
        info!("Huge Page Data Speedup = {}", speedup);
        Ok(BenchReport {
            date: chrono::Local::now().to_rfc3339(),
            clock: self.clock.name(),
            clock_overhead: self.clock.overhead(),
            plan: self.plan,
            standard,
            huge,
            speedup,
        })
    }
}

/// Builder for [`HugeBench`].
///
/// Unset components default to `/proc/meminfo`, `libc::mmap` and the
/// platform's cycle clock.
#[derive(Default)]
pub struct HugeBenchBuilder {
    meminfo: Option<Box<dyn MemInfoSource>>,
    key_match: KeyMatch,
    mapper: Option<Box<dyn PageMapper>>,
    clock: Option<Box<dyn CycleClock>>,
    clock_kind: ClockKind,
    config: BenchConfig,
}

impl HugeBenchBuilder {
    /// Memory info source used to detect huge pages.
    pub fn meminfo(mut self, source: impl MemInfoSource + 'static) -> Self {
        self.meminfo = Some(Box::new(source));
        self
    }

    /// Key comparison mode of the memory info lookups.
    pub fn key_match(mut self, key_match: KeyMatch) -> Self {
        self.key_match = key_match;
        self
    }

    /// Mapping primitive.
    pub fn mapper(mut self, mapper: impl PageMapper + 'static) -> Self {
        self.mapper = Some(Box::new(mapper));
        self
    }

    /// Calibrated clock; takes precedence over [`HugeBenchBuilder::clock_kind`].
    pub fn clock(mut self, clock: impl CycleClock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Clock to construct if none is given.
    pub fn clock_kind(mut self, clock_kind: ClockKind) -> Self {
        self.clock_kind = clock_kind;
        self
    }

    /// Run configuration.
    pub fn config(mut self, config: BenchConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and constructs the benchmark.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidPlan`] if region size and chunk count give no usable stride
    /// * [`Error::InvalidConfig`] for zero sweep rounds or a zero huge page size
    pub fn build(self) -> Result<HugeBench, Error> {
        if self.config.sweep_rounds == 0 {
            return Err(Error::InvalidConfig("sweep_rounds must be greater than 0".into()));
        }
        if self.config.huge_page_size == Some(0) {
            return Err(Error::InvalidConfig("huge_page_size must be greater than 0".into()));
        }
        let plan = AccessPlan::new(self.config.region_size, self.config.chunk_count)?;
        let source = self
            .meminfo
            .unwrap_or_else(|| Box::new(ProcMemInfo::default()));
        Ok(HugeBench {
            probe: MemInfoProbe::from_boxed(source).with_key_match(self.key_match),
            mapper: self.mapper.unwrap_or_else(|| Box::new(LibcMapper)),
            clock: self.clock.unwrap_or_else(|| self.clock_kind.build()),
            config: self.config,
            plan,
        })
    }
}
