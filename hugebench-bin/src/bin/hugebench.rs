use std::{
    fs::File,
    io::{BufWriter, Write},
};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use hugebench_core::meminfo::{KeyMatch, MEMINFO_PATH, ProcMemInfo};
use hugebench_core::timer::ClockKind;
use hugebench_core::util::{PAGE_SIZE, Size};
use hugebench_core::{BenchConfig, BenchReport, HugeBench, RegionPreset, TimingScope};
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
enum Preset {
    #[value(name = "2g")]
    TwoGb,
    #[value(name = "4g")]
    FourGb,
    #[value(name = "8g")]
    EightGb,
}

impl From<Preset> for RegionPreset {
    fn from(value: Preset) -> Self {
        match value {
            Preset::TwoGb => RegionPreset::TwoGb,
            Preset::FourGb => RegionPreset::FourGb,
            Preset::EightGb => RegionPreset::EightGb,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
enum Clock {
    /// Time stamp counter where available
    Auto,
    /// std::time::Instant (nanoseconds)
    Instant,
}

/// CLI arguments for the `hugebench` binary.
///
/// Compares a strided sweep over standard pages with the same sweep over huge pages.
#[derive(Debug, Parser, Serialize, Clone)]
#[command(version, about)]
struct CliArgs {
    /// Region size preset. One chunk per 4 KB page.
    #[clap(long = "preset", value_enum, default_value = "2g")]
    preset: Preset,
    /// Region size in MB, overrides the preset.
    #[clap(long = "size")]
    size_mb: Option<usize>,
    /// Chunks per touch call. Defaults to the region size divided by 4096.
    #[clap(long = "chunks")]
    chunks: Option<usize>,
    /// Touch calls per test.
    #[clap(long = "rounds", default_value = "4096")]
    rounds: usize,
    /// Zero the region explicitly before sweeping.
    #[clap(long = "zero-fill")]
    zero_fill: bool,
    /// Only time the sweep, not the mapping.
    #[clap(long = "sweep-only")]
    sweep_only: bool,
    /// Huge page size in bytes, instead of the size reported by the system.
    #[clap(long = "huge-page-size")]
    huge_page_size: Option<usize>,
    /// Run the huge page test first.
    #[clap(long = "huge-first")]
    huge_first: bool,
    /// Match meminfo keys exactly instead of by substring.
    #[clap(long = "exact-keys")]
    exact_keys: bool,
    /// Memory info source.
    #[clap(long = "meminfo", default_value = MEMINFO_PATH)]
    meminfo: String,
    /// Cycle clock.
    #[clap(long = "clock", value_enum, default_value = "auto")]
    clock: Clock,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
}

impl CliArgs {
    fn bench_config(&self) -> BenchConfig {
        let mut config = BenchConfig::from_preset(self.preset.into());
        if let Some(size_mb) = self.size_mb {
            config.region_size = Size::MB(size_mb).bytes();
            config.chunk_count = config.region_size / PAGE_SIZE;
        }
        if let Some(chunks) = self.chunks {
            config.chunk_count = chunks;
        }
        config.sweep_rounds = self.rounds;
        config.zero_fill = self.zero_fill;
        config.timing_scope = if self.sweep_only {
            TimingScope::SweepOnly
        } else {
            TimingScope::AllocAndSweep
        };
        config.huge_page_size = self.huge_page_size;
        config.huge_first = self.huge_first;
        config
    }
}

#[derive(Serialize)]
struct Results<'a> {
    args: &'a CliArgs,
    report: &'a BenchReport,
}

impl Results<'_> {
    fn save_to_file(&self, filename: &str) -> Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Results saved to {}", filename);
        Ok(())
    }
}

fn main() -> Result<()> {
    hugebench_bin::init_logging()?;

    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    let bench = HugeBench::builder()
        .meminfo(ProcMemInfo::new(&args.meminfo))
        .key_match(if args.exact_keys {
            KeyMatch::Exact
        } else {
            KeyMatch::Substring
        })
        .clock_kind(match args.clock {
            Clock::Auto => ClockKind::Auto,
            Clock::Instant => ClockKind::Instant,
        })
        .config(args.bench_config())
        .build()?;

    let report = bench.run()?;
    println!("{}", report);

    if let Some(output_file) = &args.output {
        Results {
            args: &args,
            report: &report,
        }
        .save_to_file(output_file)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = CliArgs::parse_from(["hugebench"]);
        let config = args.bench_config();
        assert_eq!(config.region_size, 2 << 30);
        assert_eq!(config.chunk_count, (2 << 30) / 4096);
        assert_eq!(config.sweep_rounds, 4096);
        assert_eq!(config.timing_scope, TimingScope::AllocAndSweep);
    }

    #[test]
    fn test_size_override() {
        let args = CliArgs::parse_from([
            "hugebench",
            "--size",
            "64",
            "--rounds",
            "16",
            "--sweep-only",
            "--huge-page-size",
            "1073741824",
        ]);
        let config = args.bench_config();
        assert_eq!(config.region_size, 64 << 20);
        assert_eq!(config.chunk_count, (64 << 20) / 4096);
        assert_eq!(config.sweep_rounds, 16);
        assert_eq!(config.timing_scope, TimingScope::SweepOnly);
        assert_eq!(config.huge_page_size, Some(1 << 30));
    }

    #[test]
    fn test_preset_and_chunks() {
        let args = CliArgs::parse_from(["hugebench", "--preset", "8g", "--chunks", "10"]);
        let config = args.bench_config();
        assert_eq!(config.region_size, 8 << 30);
        assert_eq!(config.chunk_count, 10);
    }
}
