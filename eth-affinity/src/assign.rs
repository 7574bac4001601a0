//! CPU assignment and the reset pass.
//!
//! Planning and applying are separate steps: [`plan_device`] decides the CPU
//! of every queue and returns the writes it implies, [`apply`] reports and
//! performs them. Dry-run only skips the write itself, so a dry run reports
//! exactly what a real run would write.

use std::io::Write;
use std::path::PathBuf;

use tracing::{error, warn};

use crate::config::{Config, CpuBudget, RoundRobin};
use crate::device::{Device, DeviceSet, Queue};
use crate::mask::CpuMask;
use crate::report::{Kind, Line};
use crate::sysfs;
use crate::topology::CpuTopology;
use crate::{Error, Result};

/// Value written to `rps_cpus` to switch steering off.
pub const RPS_DISABLED: &str = "00";

/// One control file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: Kind,
    /// Queue or device name, for the report.
    pub name: String,
    pub path: PathBuf,
    /// Hexadecimal mask to write.
    pub mask: String,
}

impl Action {
    fn irq(name: &str, path: PathBuf, mask: CpuMask) -> Self {
        Self {
            kind: Kind::Irq,
            name: name.to_string(),
            path,
            mask: mask.to_string(),
        }
    }

    fn rps(queue: &Queue, mask: &str) -> Self {
        Self {
            kind: Kind::Rps,
            name: queue.name.clone(),
            path: queue.control_path.clone(),
            mask: mask.to_string(),
        }
    }

    pub fn line(&self, node: Option<i32>) -> Line<'_> {
        Line {
            kind: self.kind,
            mask: &self.mask,
            name: &self.name,
            node,
            path: Some(&self.path),
        }
    }
}

/// Outcome of a pass over all devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub devices: usize,
    pub failed: usize,
}

impl PassSummary {
    /// True when there was at least one device and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        self.devices > 0 && self.failed == self.devices
    }
}

/// Decide the CPU of every queue of `dev` and return the writes.
///
/// Records `assigned_cpu` on queues (and on the device when it is
/// single-queue) and advances the round-robin cursors in `rr`.
pub fn plan_device(
    dev: &mut Device,
    topology: &CpuTopology,
    budget: &CpuBudget,
    reserve_multiqueue: bool,
    rr: &mut RoundRobin,
) -> Vec<Action> {
    if dev.is_single_queue {
        plan_single_queue(dev, topology, budget, rr)
    } else {
        plan_multi_queue(dev, topology, budget, reserve_multiqueue, rr)
    }
}

fn plan_single_queue(
    dev: &mut Device,
    topology: &CpuTopology,
    budget: &CpuBudget,
    rr: &mut RoundRobin,
) -> Vec<Action> {
    let cpu = if dev.flags.round_robin_single {
        budget.cursor_cpu(rr.next_single())
    } else {
        budget.offset
    };
    dev.assigned_cpu = Some(cpu);

    let mut actions = Vec::new();
    match &dev.control_path {
        Some(path) => actions.push(Action::irq(&dev.name, path.clone(), CpuMask::single(cpu))),
        None => warn!(device = %dev.name, "No irq control file for single-queue device"),
    }
    if dev.flags.packet_steering {
        actions.extend(plan_steering(dev, topology, budget, cpu));
    }
    actions
}

fn plan_multi_queue(
    dev: &mut Device,
    topology: &CpuTopology,
    budget: &CpuBudget,
    reserve_multiqueue: bool,
    rr: &mut RoundRobin,
) -> Vec<Action> {
    // true multiqueue devices may use the reserved CPUs as well
    let window = if !reserve_multiqueue && dev.rx_capable_queues() > 1 {
        budget.full()
    } else {
        *budget
    };
    let flags = dev.flags;
    let colocate_tx = dev.counts.receive == 1 && dev.counts.transmit == 1;
    let mut actions = Vec::new();
    let mut steering_cpu = None;

    let next_rx_cpu = |pos: usize, rr: &mut RoundRobin| {
        if flags.round_robin_multi {
            window.cursor_cpu(rr.next_multi())
        } else {
            window.linear_cpu(pos)
        }
    };

    for (pos, q) in dev.rx_queues.iter_mut().enumerate() {
        let cpu = next_rx_cpu(pos, rr);
        q.assigned_cpu = Some(cpu);
        steering_cpu = Some(cpu);
        actions.push(Action::irq(&q.name, q.control_path.clone(), CpuMask::single(cpu)));
    }

    for (pos, q) in dev.tx_queues.iter_mut().enumerate() {
        let cpu = match steering_cpu {
            Some(rx_cpu) if colocate_tx => rx_cpu,
            _ => window.linear_cpu(pos),
        };
        q.assigned_cpu = Some(cpu);
        actions.push(Action::irq(&q.name, q.control_path.clone(), CpuMask::single(cpu)));
    }

    // combined queues always stripe linearly, only receive queues share the cursor
    for (pos, q) in dev.combined_queues.iter_mut().enumerate() {
        let cpu = window.linear_cpu(pos);
        q.assigned_cpu = Some(cpu);
        steering_cpu = Some(cpu);
        actions.push(Action::irq(&q.name, q.control_path.clone(), CpuMask::single(cpu)));
    }

    if flags.packet_steering {
        match steering_cpu {
            Some(cpu) => actions.extend(plan_steering(dev, topology, budget, cpu)),
            None => warn!(device = %dev.name, "No receive queue to steer from"),
        }
    }
    actions
}

/// RPS writes spreading receive work over the NUMA node of `cpu`.
fn plan_steering(
    dev: &Device,
    topology: &CpuTopology,
    budget: &CpuBudget,
    cpu: usize,
) -> Vec<Action> {
    let Some(mask) = topology.node_mask(cpu, budget.offset) else {
        warn!(device = %dev.name, cpu, "CPU belongs to no NUMA node, skipping RPS");
        return Vec::new();
    };
    let mask = mask.to_string();
    dev.rps_queues
        .iter()
        .map(|q| Action::rps(q, &mask))
        .collect()
}

/// Writes that give every queue of `dev` all online CPUs and turn RPS off.
pub fn plan_reset(dev: &Device, total_cpus: usize) -> Vec<Action> {
    let all = CpuMask::first(total_cpus);
    let mut actions = Vec::new();
    if dev.is_single_queue {
        if let Some(path) = &dev.control_path {
            actions.push(Action::irq(&dev.name, path.clone(), all));
        }
    } else {
        for q in dev
            .rx_queues
            .iter()
            .chain(&dev.tx_queues)
            .chain(&dev.combined_queues)
        {
            actions.push(Action::irq(&q.name, q.control_path.clone(), all));
        }
    }
    actions.extend(dev.rps_queues.iter().map(|q| Action::rps(q, RPS_DISABLED)));
    actions
}

fn report<W: Write>(action: &Action, node: Option<i32>, config: &Config, out: &mut W) -> Result<()> {
    if !config.is_quiet() {
        writeln!(out, "{}", action.line(node).render(config.verbosity() > 0))?;
    }
    Ok(())
}

fn write_action(action: &Action, config: &Config) -> Result<()> {
    if config.is_dry_run() {
        return Ok(());
    }
    sysfs::write_file(&action.path, &action.mask).map_err(|source| Error::Write {
        path: action.path.clone(),
        source,
    })
}

/// Report and perform `actions` in order, stopping at the first failed write.
pub fn apply<W: Write>(
    actions: &[Action],
    node: Option<i32>,
    config: &Config,
    out: &mut W,
) -> Result<()> {
    for action in actions {
        report(action, node, config, out)?;
        write_action(action, config)?;
    }
    Ok(())
}

/// Report and perform every action, continuing past failures.
///
/// Returns the first failure, if any.
pub fn apply_best_effort<W: Write>(actions: &[Action], config: &Config, out: &mut W) -> Result<()> {
    let mut first_error = None;
    for action in actions {
        report(action, None, config, out)?;
        if let Err(e) = write_action(action, config) {
            warn!(error = %e, "Reset failed");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Assign and apply CPUs for every device, in name order.
///
/// A failing device is logged and counted; the remaining devices are still
/// processed.
pub fn assign_all<W: Write>(
    devices: &mut DeviceSet,
    topology: &CpuTopology,
    budget: &CpuBudget,
    config: &Config,
    out: &mut W,
) -> PassSummary {
    let mut rr = RoundRobin::new(budget);
    let mut summary = PassSummary::default();
    for dev in devices.values_mut() {
        summary.devices += 1;
        let actions = plan_device(dev, topology, budget, config.reserve_multiqueue, &mut rr);
        if let Err(e) = apply(&actions, Some(dev.numa_node), config, out) {
            error!(device = %dev.name, error = %e, "Failed to set affinity");
            summary.failed += 1;
        }
    }
    summary
}

/// Reset every device to all online CPUs with RPS off.
pub fn reset_all<W: Write>(
    devices: &DeviceSet,
    topology: &CpuTopology,
    config: &Config,
    out: &mut W,
) -> PassSummary {
    let mut summary = PassSummary::default();
    for dev in devices.values() {
        summary.devices += 1;
        let actions = plan_reset(dev, topology.total_cpus());
        if let Err(e) = apply_best_effort(&actions, config, out) {
            error!(device = %dev.name, error = %e, "Failed to reset affinity");
            summary.failed += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::QueueRole;
    use std::collections::{BTreeMap, BTreeSet};

    fn multi(name: &str, rx: usize, tx: usize, combined: usize) -> Device {
        let mut dev = Device::new(name, 0);
        let mut irq = 40;
        let mut add = |dev: &mut Device, role: QueueRole, label: &str, n: usize| {
            irq += 1;
            let path = PathBuf::from(format!("/proc/irq/{irq}/smp_affinity"));
            dev.add_queue(role, Queue::new(format!("{name}-{label}-{n}"), n, path));
        };
        for n in 0..rx {
            add(&mut dev, QueueRole::Receive(n), "rx", n);
        }
        for n in 0..tx {
            add(&mut dev, QueueRole::Transmit(n), "tx", n);
        }
        for n in 0..combined {
            add(&mut dev, QueueRole::Combined(n), "TxRx", n);
        }
        dev
    }

    fn single(name: &str, irq: u32) -> Device {
        let mut dev = Device::new(name, 0);
        dev.is_single_queue = true;
        dev.counts.receive = 1;
        dev.counts.transmit = 1;
        dev.control_path = Some(PathBuf::from(format!("/proc/irq/{irq}/smp_affinity")));
        dev
    }

    fn cpus(list: &[Queue]) -> Vec<Option<usize>> {
        list.iter().map(|q| q.assigned_cpu).collect()
    }

    #[test]
    fn test_multi_queue_linear() {
        let topology = CpuTopology::single_node(4);
        let budget = CpuBudget::new(4, None, 0);
        let mut rr = RoundRobin::new(&budget);
        let mut dev = multi("eth0", 2, 2, 0);

        let actions = plan_device(&mut dev, &topology, &budget, true, &mut rr);
        assert_eq!(cpus(&dev.rx_queues), vec![Some(0), Some(1)]);
        assert_eq!(cpus(&dev.tx_queues), vec![Some(0), Some(1)]);
        let masks: Vec<_> = actions.iter().map(|a| a.mask.as_str()).collect();
        assert_eq!(masks, vec!["1", "2", "1", "2"]);
        // the shared cursor is untouched
        assert_eq!(rr, RoundRobin::new(&budget));
    }

    #[test]
    fn test_single_rx_tx_colocated() {
        let topology = CpuTopology::single_node(4);
        let budget = CpuBudget::new(4, None, 0);
        let mut rr = RoundRobin::new(&budget);
        let mut dev = multi("eth0", 1, 1, 0);
        dev.flags.round_robin_multi = true;
        rr.multi = 6;

        plan_device(&mut dev, &topology, &budget, true, &mut rr);
        assert_eq!(cpus(&dev.rx_queues), vec![Some(2)]);
        assert_eq!(cpus(&dev.tx_queues), vec![Some(2)]);
    }

    #[test]
    fn test_round_robin_multi_spans_devices() {
        let topology = CpuTopology::single_node(4);
        let budget = CpuBudget::new(4, None, 0);
        let mut rr = RoundRobin::new(&budget);
        let mut a = multi("eth0", 2, 0, 0);
        let mut b = multi("eth1", 2, 0, 0);
        a.flags.round_robin_multi = true;
        b.flags.round_robin_multi = true;

        plan_device(&mut a, &topology, &budget, true, &mut rr);
        plan_device(&mut b, &topology, &budget, true, &mut rr);
        assert_eq!(cpus(&a.rx_queues), vec![Some(0), Some(1)]);
        assert_eq!(cpus(&b.rx_queues), vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_combined_queues_stay_linear() {
        let topology = CpuTopology::single_node(8);
        let budget = CpuBudget::new(8, None, 0);
        let mut devices: DeviceSet = [
            multi("eth0", 0, 0, 2),
            multi("eth1", 0, 0, 2),
            multi("eth2", 0, 0, 4),
        ]
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect();
        crate::heuristics::apply_heuristics(&mut devices, budget.usable);
        assert!(devices["eth0"].flags.round_robin_multi);
        assert!(devices["eth1"].flags.round_robin_multi);

        let mut rr = RoundRobin::new(&budget);
        for dev in devices.values_mut() {
            plan_device(dev, &topology, &budget, true, &mut rr);
        }
        assert_eq!(cpus(&devices["eth0"].combined_queues), vec![Some(0), Some(1)]);
        assert_eq!(cpus(&devices["eth1"].combined_queues), vec![Some(0), Some(1)]);
        assert_eq!(
            cpus(&devices["eth2"].combined_queues),
            vec![Some(0), Some(1), Some(2), Some(3)]
        );
        // the receive cursor is not advanced by combined queues
        assert_eq!(rr, RoundRobin::new(&budget));
    }

    #[test]
    fn test_single_queue_round_robin() {
        let topology = CpuTopology::single_node(4);
        let budget = CpuBudget::new(4, None, 0);
        let mut rr = RoundRobin::new(&budget);
        let mut assigned = Vec::new();
        for i in 0..6 {
            let mut dev = single(&format!("eth{i}"), 30 + i);
            dev.flags.round_robin_single = true;
            plan_device(&mut dev, &topology, &budget, true, &mut rr);
            assigned.push(dev.assigned_cpu.unwrap());
        }
        assert_eq!(assigned, vec![0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_single_queue_pinned_to_offset() {
        let topology = CpuTopology::single_node(4);
        let budget = CpuBudget::new(4, None, 1);
        let mut rr = RoundRobin::new(&budget);
        for i in 0..3 {
            let mut dev = single(&format!("eth{i}"), 30 + i);
            let actions = plan_device(&mut dev, &topology, &budget, true, &mut rr);
            assert_eq!(dev.assigned_cpu, Some(1));
            assert_eq!(actions[0].mask, "2");
        }
    }

    #[test]
    fn test_unreserved_multiqueue_widens_window() {
        let topology = CpuTopology::single_node(4);
        let budget = CpuBudget::new(4, None, 2);
        let mut rr = RoundRobin::new(&budget);

        let mut dev = multi("eth0", 4, 0, 0);
        plan_device(&mut dev, &topology, &budget, false, &mut rr);
        assert_eq!(cpus(&dev.rx_queues), vec![Some(0), Some(1), Some(2), Some(3)]);

        let mut dev = multi("eth0", 4, 0, 0);
        plan_device(&mut dev, &topology, &budget, true, &mut rr);
        assert!(
            dev.rx_queues
                .iter()
                .all(|q| q.assigned_cpu.unwrap() >= budget.offset)
        );
    }

    #[test]
    fn test_steering_uses_node_of_last_rx_cpu() {
        let mut nodes = BTreeMap::new();
        nodes.insert(0, (0..4).collect::<BTreeSet<_>>());
        nodes.insert(1, (4..8).collect::<BTreeSet<_>>());
        let topology = CpuTopology::from_nodes(8, nodes);
        let budget = CpuBudget::new(8, None, 0);
        let mut rr = RoundRobin::new(&budget);

        let mut dev = multi("eth0", 1, 4, 0);
        dev.flags.round_robin_multi = true;
        dev.flags.packet_steering = true;
        rr.multi = 5;
        dev.add_rps_queue(Queue::new("eth0", 0, PathBuf::from("/sys/rps_cpus")));

        let actions = plan_device(&mut dev, &topology, &budget, true, &mut rr);
        let rps: Vec<_> = actions.iter().filter(|a| a.kind == Kind::Rps).collect();
        assert_eq!(rps.len(), 1);
        assert_eq!(rps[0].mask, "f0");
    }

    #[test]
    fn test_steering_skipped_without_node() {
        let mut nodes = BTreeMap::new();
        nodes.insert(0, (0..2).collect::<BTreeSet<_>>());
        let topology = CpuTopology::from_nodes(4, nodes);
        let budget = CpuBudget::new(4, None, 0);
        let mut rr = RoundRobin::new(&budget);

        let mut dev = single("eth0", 30);
        dev.flags.packet_steering = true;
        dev.flags.round_robin_single = true;
        rr.single = 3;
        dev.add_rps_queue(Queue::new("eth0", 0, PathBuf::from("/sys/rps_cpus")));

        let actions = plan_device(&mut dev, &topology, &budget, true, &mut rr);
        assert_eq!(dev.assigned_cpu, Some(3));
        assert!(actions.iter().all(|a| a.kind == Kind::Irq));
    }

    #[test]
    fn test_plan_reset() {
        let mut dev = multi("eth0", 2, 1, 0);
        dev.add_rps_queue(Queue::new("eth0", 0, PathBuf::from("/sys/rps_cpus")));
        let actions = plan_reset(&dev, 6);
        assert_eq!(actions.len(), 4);
        assert!(actions[..3].iter().all(|a| a.mask == "3f"));
        assert_eq!(actions[3].mask, RPS_DISABLED);
    }

    #[test]
    fn test_summary() {
        assert!(!PassSummary::default().all_failed());
        assert!(PassSummary { devices: 2, failed: 2 }.all_failed());
        assert!(!PassSummary { devices: 2, failed: 1 }.all_failed());
    }
}
