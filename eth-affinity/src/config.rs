//! Run configuration and the derived CPU budget.

use std::path::{Path, PathBuf};

use crate::Error;

/// Default sysfs root.
pub const DEFAULT_SYSDIR: &str = "/sys";

/// Default interrupt tree root.
pub const DEFAULT_IRQDIR: &str = "/proc/irq";

/// Configuration for one eth-affinity run.
///
/// Built once at startup and passed by reference into discovery, scanning,
/// heuristics and assignment.
///
/// # Example
/// ```
/// use eth_affinity::Config;
///
/// let config = Config::new()
///     .reserved_cpus(1)
///     .max_cpus(Some(4))
///     .exclude(["lo"])
///     .dry_run(true);
/// assert!(config.is_dry_run());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) quiet: bool,
    pub(crate) silent: bool,
    pub(crate) verbose: u8,
    pub(crate) dry_run: bool,
    pub(crate) list: bool,
    pub(crate) reset: bool,
    pub(crate) heuristics: bool,
    pub(crate) max_cpus: Option<usize>,
    pub(crate) reserved_cpus: usize,
    pub(crate) reserve_multiqueue: bool,
    pub(crate) include: Vec<String>,
    pub(crate) exclude: Vec<String>,
    pub(crate) sysdir: PathBuf,
    pub(crate) irqdir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            quiet: false,
            silent: false,
            verbose: 0,
            dry_run: false,
            list: false,
            reset: false,
            heuristics: true,
            max_cpus: None,
            reserved_cpus: 0,
            reserve_multiqueue: true,
            include: Vec::new(),
            exclude: Vec::new(),
            sysdir: PathBuf::from(DEFAULT_SYSDIR),
            irqdir: PathBuf::from(DEFAULT_IRQDIR),
        }
    }

    /// Turn off report output.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Turn off report output and error messages. Implies quiet.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        if silent {
            self.quiet = true;
        }
        self
    }

    /// Set the verbosity level (0 = condensed report lines).
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    /// Compute and report, but write nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Only list the current affinity.
    pub fn list(mut self, list: bool) -> Self {
        self.list = list;
        self
    }

    /// Reset affinity to all CPUs. Disables heuristics.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        if reset {
            self.heuristics = false;
        }
        self
    }

    /// Enable or disable the heuristics engine.
    pub fn heuristics(mut self, enabled: bool) -> Self {
        self.heuristics = enabled;
        self
    }

    /// Maximum number of CPUs to use, excluding reserved CPUs.
    pub fn max_cpus(mut self, max: Option<usize>) -> Self {
        self.max_cpus = max;
        self
    }

    /// Number of low CPUs (0..n) to keep free of queue interrupts.
    pub fn reserved_cpus(mut self, n: usize) -> Self {
        self.reserved_cpus = n;
        self
    }

    /// Whether reserved CPUs also apply to true multiqueue devices.
    pub fn reserve_multiqueue(mut self, reserve: bool) -> Self {
        self.reserve_multiqueue = reserve;
        self
    }

    /// Only configure these devices.
    pub fn include<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Never configure these devices.
    pub fn exclude<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Set the sysfs root.
    pub fn sysdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sysdir = dir.into();
        self
    }

    /// Set the interrupt tree root.
    pub fn irqdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.irqdir = dir.into();
        self
    }

    /// Check option values that cannot be expressed by the types alone.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_cpus == Some(0) {
            return Err(Error::Options("--maxcpu must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Verbosity used for report lines; always 0 when quiet.
    pub fn verbosity(&self) -> u8 {
        if self.quiet { 0 } else { self.verbose }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn is_list(&self) -> bool {
        self.list
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    pub fn heuristics_enabled(&self) -> bool {
        self.heuristics
    }

    pub fn sysdir_path(&self) -> &Path {
        &self.sysdir
    }

    pub fn irqdir_path(&self) -> &Path {
        &self.irqdir
    }

    /// Whether a device passes the exclude and include lists.
    ///
    /// The exclude list is checked first; a non-empty include list drops every
    /// device not named in it.
    pub fn accepts_device(&self, name: &str) -> bool {
        if self.exclude.iter().any(|d| d == name) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|d| d == name)
    }
}

/// The window of CPUs queues are spread over: `offset..offset + usable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBudget {
    /// Total online CPUs.
    pub total: usize,
    /// Number of CPUs in the window.
    pub usable: usize,
    /// First CPU of the window.
    pub offset: usize,
}

impl CpuBudget {
    /// Derive the window from the online CPU count and the reservation options.
    ///
    /// The window is shrunk until it fits below `total`. A reservation that
    /// leaves no CPU keeps the last one, so `offset + usable <= total` and
    /// `usable >= 1` always hold.
    pub fn new(total: usize, max_cpus: Option<usize>, reserved: usize) -> Self {
        let total = total.max(1);
        let mut usable = max_cpus
            .filter(|max| *max > 0)
            .map_or(total, |max| total.min(max));

        let mut offset = 0;
        if reserved > 0 {
            offset = reserved.min(total - 1);
            usable = usable.min(total - offset).max(1);
        }

        Self {
            total,
            usable,
            offset,
        }
    }

    pub fn from_config(total: usize, config: &Config) -> Self {
        Self::new(total, config.max_cpus, config.reserved_cpus)
    }

    /// The full window `0..total`, ignoring reservation.
    pub fn full(&self) -> Self {
        Self {
            total: self.total,
            usable: self.total,
            offset: 0,
        }
    }

    /// CPU for the `position`-th queue of the linear per-device stripe.
    ///
    /// The stripe starts at `usable - offset`, so with no reservation the
    /// first queue lands on CPU 0.
    pub fn linear_cpu(&self, position: usize) -> usize {
        let start = self.usable - self.offset % self.usable;
        (start + position % self.usable) % self.usable + self.offset
    }

    /// CPU for a round-robin cursor value.
    pub fn cursor_cpu(&self, cursor: usize) -> usize {
        cursor % self.usable + self.offset
    }
}

/// Round-robin cursors shared across all devices of one assignment pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobin {
    /// Cursor for single-queue devices.
    pub single: usize,
    /// Cursor for under-provisioned multiqueue devices.
    pub multi: usize,
}

impl RoundRobin {
    pub fn new(budget: &CpuBudget) -> Self {
        Self {
            single: 0,
            multi: budget.total - budget.offset,
        }
    }

    /// Return the current single-queue cursor and advance it.
    pub fn next_single(&mut self) -> usize {
        let cursor = self.single;
        self.single += 1;
        cursor
    }

    /// Return the current multiqueue cursor and advance it.
    pub fn next_multi(&mut self) -> usize {
        let cursor = self.multi;
        self.multi += 1;
        cursor
    }
}
