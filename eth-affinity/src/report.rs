//! Text rendering of current and computed assignments.
//!
//! Condensed lines look like `irq 3 -> eth0-rx-1` and `rps 0,1,2,3 -> eth0`.
//! Verbose lines add the raw mask, the device's NUMA node and the control
//! file: `irq: cpu 3 [mask 0x8] -> eth0-rx-1@0 /proc/irq/42/smp_affinity`.

use std::fmt;
use std::io::Write;
use std::path::Path;

use crate::Result;
use crate::device::{Device, DeviceSet, Queue};
use crate::mask;

/// Which kind of control file a line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Irq,
    Rps,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Irq => f.write_str("irq"),
            Kind::Rps => f.write_str("rps"),
        }
    }
}

/// One report line.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    pub kind: Kind,
    /// Hexadecimal mask, or the not-available marker.
    pub mask: &'a str,
    pub name: &'a str,
    pub node: Option<i32>,
    pub path: Option<&'a Path>,
}

impl Line<'_> {
    pub fn render(&self, verbose: bool) -> String {
        let cpus = mask::decode(self.mask);
        if !verbose {
            return format!("{} {} -> {}", self.kind, cpus, self.name);
        }
        let mut line = format!(
            "{}: cpu {} [mask 0x{}] -> {}",
            self.kind, cpus, self.mask, self.name
        );
        if let Some(node) = self.node {
            line.push_str(&format!("@{node}"));
        }
        if let Some(path) = self.path {
            line.push_str(&format!(" {}", path.display()));
        }
        line
    }
}

fn previous<'a>(kind: Kind, queue: &'a Queue, node: i32) -> Line<'a> {
    Line {
        kind,
        mask: &queue.previous_mask,
        name: &queue.name,
        node: Some(node),
        path: None,
    }
}

/// Lines describing the affinity found at scan time for one device.
pub fn current_lines(dev: &Device) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    if dev.is_single_queue {
        lines.push(Line {
            kind: Kind::Irq,
            mask: &dev.previous_mask,
            name: &dev.name,
            node: Some(dev.numa_node),
            path: None,
        });
        lines.extend(dev.rps_queues.iter().map(|q| previous(Kind::Rps, q, dev.numa_node)));
        return lines;
    }

    for q in dev
        .rx_queues
        .iter()
        .chain(&dev.tx_queues)
        .chain(&dev.combined_queues)
    {
        lines.push(previous(Kind::Irq, q, dev.numa_node));
    }
    if dev.counts.receive == 1 {
        lines.extend(dev.rps_queues.iter().map(|q| previous(Kind::Rps, q, dev.numa_node)));
    }
    lines
}

/// Write the current affinity of every device, in name order.
pub fn list_current<W: Write>(devices: &DeviceSet, verbose: bool, out: &mut W) -> Result<()> {
    for dev in devices.values() {
        for line in current_lines(dev) {
            writeln!(out, "{}", line.render(verbose))?;
        }
    }
    Ok(())
}
