//! One complete pass: discovery, scan, heuristics, then assign or reset.

use std::io::Write;

use tracing::{debug, info};

use crate::Result;
use crate::assign::{self, PassSummary};
use crate::config::{Config, CpuBudget};
use crate::device::DeviceSet;
use crate::heuristics::{self, DeviceStats};
use crate::report;
use crate::scan;
use crate::sysfs::InterfaceResolver;
use crate::topology::{self, CpuTopology};

/// What a pass found and did.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub topology: CpuTopology,
    pub budget: CpuBudget,
    pub devices: DeviceSet,
    /// `None` in list mode or when heuristics are off.
    pub stats: Option<DeviceStats>,
    /// Empty in list mode.
    pub summary: PassSummary,
}

/// Run one pass with `config`, writing report lines to `out`.
///
/// Setup failures (unreadable online CPU list, unreadable interrupt tree,
/// bad options) are returned as errors. Per-device write failures are
/// counted in [`RunOutcome::summary`] instead.
pub fn run<R, W>(config: &Config, resolver: &R, out: &mut W) -> Result<RunOutcome>
where
    R: InterfaceResolver + ?Sized,
    W: Write,
{
    config.validate()?;

    let topology = topology::build_topology(config)?;
    let budget = CpuBudget::from_config(topology.total_cpus(), config);
    debug!(
        total = budget.total,
        usable = budget.usable,
        offset = budget.offset,
        multinode = topology.is_multinode(),
        "CPU budget"
    );

    let mut devices = scan::scan_devices(config, resolver)?;
    if devices.is_empty() {
        info!("No network device interrupts found");
    }

    if config.is_list() {
        report::list_current(&devices, config.verbosity() > 0, out)?;
        return Ok(RunOutcome {
            topology,
            budget,
            devices,
            stats: None,
            summary: PassSummary::default(),
        });
    }

    let stats = config
        .heuristics_enabled()
        .then(|| heuristics::apply_heuristics(&mut devices, budget.usable));

    let summary = if config.is_reset() {
        assign::reset_all(&devices, &topology, config, out)
    } else {
        assign::assign_all(&mut devices, &topology, &budget, config, out)
    };
    info!(devices = summary.devices, failed = summary.failed, "Pass complete");

    Ok(RunOutcome {
        topology,
        budget,
        devices,
        stats,
        summary,
    })
}
