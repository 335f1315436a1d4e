use serde::{Serialize, Serializer};

/// Memory size representation supporting common units.
///
/// All units use binary (base-2) multipliers (1 KB = 1024 bytes).
///
/// # Examples
///
/// ```
/// use hugebench_core::util::Size;
///
/// let size = Size::MB(2);
/// assert_eq!(size.bytes(), 2 * 1024 * 1024);
///
/// let large = Size::GB(1);
/// assert_eq!(large.bytes(), 1 << 30);
/// ```
#[derive(Clone, Copy, Debug)]
pub enum Size {
    /// Size in bytes
    B(usize),
    /// Size in kilobytes (1 KB = 1024 bytes)
    KB(usize),
    /// Size in megabytes (1 MB = 1024 KB)
    MB(usize),
    /// Size in gigabytes (1 GB = 1024 MB)
    GB(usize),
}

impl Size {
    /// Converts this size to bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            Size::B(bytes) => *bytes,
            Size::KB(kb) => *kb * (1 << 10),
            Size::MB(mb) => *mb * (1 << 20),
            Size::GB(gb) => *gb * (1 << 30),
        }
    }

    /// Picks the largest unit that represents `bytes` without a remainder.
    ///
    /// ```
    /// use hugebench_core::util::Size;
    ///
    /// assert_eq!(Size::from_bytes(2 << 20).to_string(), "2 MB");
    /// assert_eq!(Size::from_bytes(10240).to_string(), "10 KB");
    /// assert_eq!(Size::from_bytes(1000).to_string(), "1000 B");
    /// ```
    pub const fn from_bytes(bytes: usize) -> Size {
        if bytes == 0 {
            Size::B(0)
        } else if bytes.is_multiple_of(1 << 30) {
            Size::GB(bytes >> 30)
        } else if bytes.is_multiple_of(1 << 20) {
            Size::MB(bytes >> 20)
        } else if bytes.is_multiple_of(1 << 10) {
            Size::KB(bytes >> 10)
        } else {
            Size::B(bytes)
        }
    }
}

impl PartialEq for Size {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Size {}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::B(bytes) => write!(f, "{} B", bytes),
            Size::KB(kb) => write!(f, "{} KB", kb),
            Size::MB(mb) => write!(f, "{} MB", mb),
            Size::GB(gb) => write!(f, "{} GB", gb),
        }
    }
}

impl Serialize for Size {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bytes() as u64)
    }
}
