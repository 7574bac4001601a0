//! CPU bitmask encoding.
//!
//! Affinity control files (`smp_affinity`, `rps_cpus`) hold a hexadecimal
//! bitmask where bit `i` selects CPU `i`. This module converts between CPU
//! index sets and that representation, and renders masks as CPU lists for
//! display.

use std::fmt;

/// Widest mask handled, in bits (and therefore CPUs).
pub const MAX_CPUS: usize = 64;

/// Marker stored when a previous mask could not be read.
pub const NOT_AVAILABLE: &str = "?";

/// Display value for a mask with no CPU set.
pub const NO_CPUS: &str = "na";

/// A set of CPUs encoded as a 64-bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CpuMask(u64);

impl CpuMask {
    /// An empty mask.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mask with a single CPU set.
    pub fn single(cpu: usize) -> Self {
        let mut mask = Self::empty();
        mask.set(cpu);
        mask
    }

    /// Mask with CPUs `0..count` set.
    pub fn first(count: usize) -> Self {
        (0..count).collect()
    }

    /// Set a CPU. CPUs beyond [`MAX_CPUS`] are ignored.
    #[inline]
    pub fn set(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.0 |= 1u64 << cpu;
        }
    }

    #[inline]
    pub fn contains(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.0 & (1u64 << cpu) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Iterate over the set CPUs in ascending order.
    pub fn cpus(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CPUS).filter(move |cpu| self.contains(*cpu))
    }

    /// Parse a hexadecimal mask as found in procfs/sysfs.
    ///
    /// Accepts an optional `0x` prefix and the kernel's comma-grouped form
    /// (`00000000,0000000f`). Only the low 64 bits are kept.
    pub fn parse_hex(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        let digits: String = text.chars().filter(|c| *c != ',').collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let low = &digits[digits.len().saturating_sub(16)..];
        u64::from_str_radix(low, 16).ok().map(Self)
    }
}

impl FromIterator<usize> for CpuMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for cpu in iter {
            mask.set(cpu);
        }
        mask
    }
}

impl fmt::LowerHex for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Encode a set of CPU indices as a bare hexadecimal mask.
///
/// The empty set encodes as `"0"`.
pub fn encode<I: IntoIterator<Item = usize>>(cpus: I) -> String {
    cpus.into_iter().collect::<CpuMask>().to_string()
}

/// Render a hexadecimal mask as a comma separated CPU list.
///
/// Returns [`NOT_AVAILABLE`] for the not-available marker (or text that is not
/// a mask at all) and [`NO_CPUS`] when no bit is set.
pub fn decode(text: &str) -> String {
    if text.starts_with(NOT_AVAILABLE) {
        return NOT_AVAILABLE.to_string();
    }
    let Some(mask) = CpuMask::parse_hex(text) else {
        return NOT_AVAILABLE.to_string();
    };
    if mask.is_empty() {
        return NO_CPUS.to_string();
    }
    mask.cpus()
        .map(|cpu| cpu.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
