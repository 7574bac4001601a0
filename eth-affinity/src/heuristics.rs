//! Per-device policy decisions.
//!
//! Looks at the whole device set at once and decides, for each device,
//! whether to use round-robin placement and receive packet steering.

use tracing::info;

use crate::device::DeviceSet;

/// Aggregates over the scanned device set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub exists_multi_queue: bool,
    pub exists_single_queue: bool,
    pub multi_queue_devices: usize,
    pub max_receive: usize,
    /// Raised to `max_combined` when smaller: combined queues use the
    /// transmit budget.
    pub max_transmit: usize,
    pub max_combined: usize,
    pub devices: usize,
}

impl DeviceStats {
    pub fn collect(devices: &DeviceSet) -> Self {
        let mut stats = Self {
            devices: devices.len(),
            ..Self::default()
        };
        for dev in devices.values() {
            if dev.counts.is_multiqueue() {
                stats.exists_multi_queue = true;
                stats.multi_queue_devices += 1;
                stats.max_receive = stats.max_receive.max(dev.counts.receive);
                stats.max_transmit = stats.max_transmit.max(dev.counts.transmit);
                stats.max_combined = stats.max_combined.max(dev.counts.combined);
            }
            if dev.is_single_queue {
                stats.exists_single_queue = true;
            }
        }
        stats.max_transmit = stats.max_transmit.max(stats.max_combined);
        stats
    }
}

/// Set the per-device flags.
///
/// Running it twice over the same input gives the same flags.
pub fn apply_heuristics(devices: &mut DeviceSet, usable_cpus: usize) -> DeviceStats {
    let stats = DeviceStats::collect(devices);

    // RPS only helps devices that cannot spread receive work in hardware
    let steering = stats.exists_multi_queue || stats.devices == 1;
    for dev in devices.values_mut() {
        dev.flags.packet_steering =
            steering && !dev.rps_queues.is_empty() && dev.counts.receive == 1;
        if dev.flags.packet_steering {
            info!(device = %dev.name, "Heuristic: RPS enabled");
        }
    }

    let round_robin_single = stats.exists_multi_queue || (usable_cpus > 1 && stats.devices > 2);
    if round_robin_single {
        if stats.exists_single_queue {
            info!("Heuristic: round-robin affinity enabled for all single-queue devices");
        }
    } else {
        info!("Heuristic: first usable CPU for all single-queue devices");
    }

    for dev in devices.values_mut() {
        dev.flags.round_robin_single = round_robin_single;
        dev.flags.round_robin_multi = false;
        if dev.is_single_queue || stats.multi_queue_devices <= 1 {
            continue;
        }

        let c = dev.counts;
        let sparse_rx = c.combined <= 1 && c.receive < usable_cpus && c.receive < stats.max_transmit;
        let sparse_combined =
            c.combined > 1 && c.combined < usable_cpus && c.combined < stats.max_transmit;
        if sparse_rx || sparse_combined {
            info!(device = %dev.name, "Heuristic: round-robin affinity enabled for multi-queue device");
            dev.flags.round_robin_multi = true;
        }
    }

    stats
}
