//! Huge page discovery through the kernel's memory statistics.
//!
//! The output of `cat /proc/meminfo` includes lines like:
//!
//! ```text
//! HugePages_Total: uuu
//! HugePages_Free:  vvv
//! HugePages_Rsvd:  www
//! HugePages_Surp:  xxx
//! Hugepagesize:    yyy kB
//! Hugetlb:         zzz kB
//! ```
//!
//! See <https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt>.

use log::{debug, trace};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the memory statistics
pub const MEMINFO_PATH: &str = "/proc/meminfo";
/// Key holding the number of reserved huge pages
pub const HUGEPAGES_TOTAL: &str = "HugePages_Total:";
/// Key holding the default huge page size in kB
pub const HUGEPAGE_SIZE: &str = "Hugepagesize:";

/// Value returned when a key is missing or its value is not an integer.
pub const NOT_FOUND: i64 = -1;

/// Errors reading the memory statistics source.
#[derive(Debug, Error)]
pub enum Error {
    /// The source could not be opened or read
    #[error("failed to read memory info from {path}: {source}")]
    Io {
        /// Path of the source
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// A line-oriented key/value text source of memory statistics.
pub trait MemInfoSource {
    /// Reads the full contents of the source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the source cannot be opened or read.
    fn read(&self) -> Result<String, Error>;
}

/// Reads memory statistics from a procfs-style file.
#[derive(Debug, Clone)]
pub struct ProcMemInfo {
    path: PathBuf,
}

impl ProcMemInfo {
    /// Creates a source reading from `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        ProcMemInfo {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for ProcMemInfo {
    fn default() -> Self {
        ProcMemInfo::new(MEMINFO_PATH)
    }
}

impl MemInfoSource for ProcMemInfo {
    fn read(&self) -> Result<String, Error> {
        trace!("reading {}", self.path.display());
        std::fs::read_to_string(&self.path).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory memory statistics, e.g. a captured `/proc/meminfo`.
#[derive(Debug, Clone, Default)]
pub struct StaticMemInfo(String);

impl StaticMemInfo {
    /// Creates a source returning `contents` on every read.
    pub fn new(contents: impl Into<String>) -> Self {
        StaticMemInfo(contents.into())
    }
}

impl MemInfoSource for StaticMemInfo {
    fn read(&self) -> Result<String, Error> {
        Ok(self.0.clone())
    }
}

/// How a lookup key is compared against a line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyMatch {
    /// The line contains the key anywhere.
    ///
    /// A key may match an unrelated longer key that contains it.
    #[default]
    Substring,
    /// The first field of the line equals the key.
    Exact,
}

impl KeyMatch {
    fn matches(&self, line: &str, key: &str) -> bool {
        match self {
            KeyMatch::Substring => line.contains(key),
            KeyMatch::Exact => line.split_whitespace().next() == Some(key),
        }
    }
}

/// Extracts the integer value of the first line matching `key`.
///
/// The value is the second whitespace-separated field. Returns [`NOT_FOUND`]
/// if no line matches, or if the first matching line has no valid integer value.
pub fn parse_value(contents: &str, key: &str, key_match: KeyMatch) -> i64 {
    for line in contents.lines() {
        if !key_match.matches(line, key) {
            continue;
        }
        return line
            .split_whitespace()
            .nth(1)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(NOT_FOUND);
    }
    NOT_FOUND
}

/// Queries huge page availability and size from a [`MemInfoSource`].
pub struct MemInfoProbe {
    source: Box<dyn MemInfoSource>,
    key_match: KeyMatch,
}

impl MemInfoProbe {
    /// Creates a probe using substring key matching.
    pub fn new(source: impl MemInfoSource + 'static) -> Self {
        MemInfoProbe {
            source: Box::new(source),
            key_match: KeyMatch::default(),
        }
    }

    /// Creates a probe from an already boxed source.
    pub fn from_boxed(source: Box<dyn MemInfoSource>) -> Self {
        MemInfoProbe {
            source,
            key_match: KeyMatch::default(),
        }
    }

    /// Sets the key comparison mode.
    pub fn with_key_match(mut self, key_match: KeyMatch) -> Self {
        self.key_match = key_match;
        self
    }

    /// Returns the integer value stored under `key`, or [`NOT_FOUND`].
    ///
    /// # Errors
    ///
    /// Fails only if the underlying source cannot be read.
    pub fn lookup(&self, key: &str) -> Result<i64, Error> {
        let contents = self.source.read()?;
        let value = parse_value(&contents, key, self.key_match);
        debug!("meminfo lookup {:?} -> {}", key, value);
        Ok(value)
    }

    /// Whether any huge pages are reserved on the system.
    pub fn huge_pages_enabled(&self) -> Result<bool, Error> {
        Ok(self.lookup(HUGEPAGES_TOTAL)? > 0)
    }

    /// Default huge page size in bytes, or [`NOT_FOUND`] if not reported.
    ///
    /// The source reports the size in kB.
    pub fn huge_page_size_bytes(&self) -> Result<i64, Error> {
        let kb = self.lookup(HUGEPAGE_SIZE)?;
        if kb > 0 { Ok(kb * 1024) } else { Ok(NOT_FOUND) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "MemTotal:       32657812 kB\n\
                           HugePages_Total:    64\n\
                           HugePages_Free:     64\n\
                           Hugepagesize:      2048 kB\n\
                           Hugetlb:          131072 kB\n";

    const NO_HUGEPAGES: &str = "MemTotal:       32657812 kB\n\
                                MemFree:        1234 kB\n";

    #[test]
    fn test_lookup_fixture() -> anyhow::Result<()> {
        let probe = MemInfoProbe::new(StaticMemInfo::new(FIXTURE));
        assert_eq!(probe.lookup(HUGEPAGES_TOTAL)?, 64);
        assert_eq!(probe.lookup(HUGEPAGE_SIZE)?, 2048);
        assert!(probe.huge_pages_enabled()?);
        assert_eq!(probe.huge_page_size_bytes()?, 2048 * 1024);
        Ok(())
    }

    #[test]
    fn test_lookup_missing_keys() -> anyhow::Result<()> {
        let probe = MemInfoProbe::new(StaticMemInfo::new(NO_HUGEPAGES));
        assert_eq!(probe.lookup(HUGEPAGES_TOTAL)?, NOT_FOUND);
        assert_eq!(probe.lookup(HUGEPAGE_SIZE)?, NOT_FOUND);
        assert!(!probe.huge_pages_enabled()?);
        assert_eq!(probe.huge_page_size_bytes()?, NOT_FOUND);
        Ok(())
    }

    #[test]
    fn test_zero_hugepages_disabled() -> anyhow::Result<()> {
        let probe = MemInfoProbe::new(StaticMemInfo::new(
            "HugePages_Total:       0\nHugepagesize:       2048 kB\n",
        ));
        assert!(!probe.huge_pages_enabled()?);
        assert_eq!(probe.huge_page_size_bytes()?, 2 << 20);
        Ok(())
    }

    #[test]
    fn test_parse_invalid_values() {
        // wrong.
        assert_eq!(parse_value("Hugepagesize:2048kB", HUGEPAGE_SIZE, KeyMatch::Substring), -1);
        assert_eq!(parse_value("Hugepagesize: 2kB", HUGEPAGE_SIZE, KeyMatch::Substring), -1);
        assert_eq!(parse_value("Hugepagesize:", HUGEPAGE_SIZE, KeyMatch::Substring), -1);

        // first match decides.
        assert_eq!(
            parse_value(
                "Hugepagesize: abc\nHugepagesize: 2048 kB",
                HUGEPAGE_SIZE,
                KeyMatch::Substring
            ),
            -1
        );
    }

    #[test]
    fn test_substring_vs_exact() {
        let contents = "ShmemHugePages:        0 kB\nHugePages_Total:    8\n";
        // substring matching picks up the longer key first
        assert_eq!(parse_value(contents, "HugePages", KeyMatch::Substring), 0);
        assert_eq!(parse_value(contents, "HugePages", KeyMatch::Exact), -1);
        assert_eq!(parse_value(contents, HUGEPAGES_TOTAL, KeyMatch::Exact), 8);

        let contents = "AnonHugePages:    1024 kB\nHugePages:    3\n";
        assert_eq!(parse_value(contents, "HugePages:", KeyMatch::Substring), 1024);
        assert_eq!(parse_value(contents, "HugePages:", KeyMatch::Exact), 3);
    }

    #[test]
    fn test_unreadable_source() {
        let probe = MemInfoProbe::new(ProcMemInfo::new("/nonexistent/hugebench/meminfo"));
        let err = probe.lookup(HUGEPAGES_TOTAL).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_meminfo_readable() -> anyhow::Result<()> {
        let probe = MemInfoProbe::new(ProcMemInfo::default()).with_key_match(KeyMatch::Exact);
        assert!(probe.lookup("MemTotal:")? > 0);
        Ok(())
    }
}
