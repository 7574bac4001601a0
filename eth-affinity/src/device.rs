//! Network devices and their interrupt queues.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::mask::NOT_AVAILABLE;

/// Role of an interrupt entry, as encoded in its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    /// `<dev>-rx-N`
    Receive(usize),
    /// `<dev>-tx-N`
    Transmit(usize),
    /// `<dev>-txrx-N`, `<dev>-rxtx-N` or `<dev>-TxRx-N`
    Combined(usize),
    /// The device's own irq, not a queue.
    None,
}

const RECEIVE_MARKERS: &[&str] = &["-rx-"];
const TRANSMIT_MARKERS: &[&str] = &["-tx-"];
const COMBINED_MARKERS: &[&str] = &["-txrx-", "-rxtx-", "-TxRx-"];

/// Classify an interrupt entry name.
///
/// Receive, transmit and combined markers are tried in that order; the first
/// marker followed by a queue number wins.
pub fn classify(name: &str) -> QueueRole {
    if let Some(n) = queue_number(name, RECEIVE_MARKERS) {
        return QueueRole::Receive(n);
    }
    if let Some(n) = queue_number(name, TRANSMIT_MARKERS) {
        return QueueRole::Transmit(n);
    }
    if let Some(n) = queue_number(name, COMBINED_MARKERS) {
        return QueueRole::Combined(n);
    }
    QueueRole::None
}

fn queue_number(name: &str, markers: &[&str]) -> Option<usize> {
    let marker = markers.iter().find(|m| name.contains(**m))?;
    let (_, rest) = name.split_once(*marker)?;
    let digits: &str = &rest[..rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len())];
    digits.parse().ok()
}

/// Device name an interrupt entry belongs to.
///
/// The name ends at the first `-` or `:` and is cut to the kernel's
/// interface name limit.
pub fn base_name(entry: &str) -> &str {
    let mut end = entry.len().min(crate::sysfs::MAX_IFNAME_LEN);
    while !entry.is_char_boundary(end) {
        end -= 1;
    }
    let name = &entry[..end];
    let cut = name.find(['-', ':']).unwrap_or(name.len());
    &name[..cut]
}

/// One interrupt queue (or an RPS receive queue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    /// Entry name as found in the interrupt tree.
    pub name: String,
    /// Affinity control file.
    pub control_path: PathBuf,
    /// Mask read at scan time, or [`NOT_AVAILABLE`].
    pub previous_mask: String,
    /// Queue number parsed from the name.
    pub sequence_index: usize,
    /// CPU chosen by the assignment pass.
    pub assigned_cpu: Option<usize>,
}

impl Queue {
    pub fn new(name: impl Into<String>, sequence_index: usize, control_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            control_path,
            previous_mask: NOT_AVAILABLE.to_string(),
            sequence_index,
            assigned_cpu: None,
        }
    }
}

/// Queue counts per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleCounts {
    pub receive: usize,
    pub transmit: usize,
    pub combined: usize,
}

impl RoleCounts {
    pub fn total(&self) -> usize {
        self.receive + self.transmit + self.combined
    }

    /// More than one queue in any role.
    pub fn is_multiqueue(&self) -> bool {
        self.receive > 1 || self.transmit > 1 || self.combined > 1
    }
}

/// Per-device decisions made by the heuristics engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFlags {
    pub round_robin_single: bool,
    pub round_robin_multi: bool,
    pub packet_steering: bool,
}

/// A network device and every interrupt queue found for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub numa_node: i32,
    pub counts: RoleCounts,
    pub is_single_queue: bool,
    pub flags: DeviceFlags,
    /// Affinity control file of the plain device irq, if one exists.
    pub control_path: Option<PathBuf>,
    pub previous_mask: String,
    pub assigned_cpu: Option<usize>,
    pub rx_queues: Vec<Queue>,
    pub tx_queues: Vec<Queue>,
    pub combined_queues: Vec<Queue>,
    pub rps_queues: Vec<Queue>,
}

impl Device {
    pub fn new(name: impl Into<String>, numa_node: i32) -> Self {
        Self {
            name: name.into(),
            numa_node,
            counts: RoleCounts::default(),
            is_single_queue: false,
            flags: DeviceFlags::default(),
            control_path: None,
            previous_mask: NOT_AVAILABLE.to_string(),
            assigned_cpu: None,
            rx_queues: Vec::new(),
            tx_queues: Vec::new(),
            combined_queues: Vec::new(),
            rps_queues: Vec::new(),
        }
    }

    /// Record a classified queue, keeping each sequence sorted by index.
    ///
    /// Returns the stored queue, or `None` for [`QueueRole::None`].
    pub fn add_queue(&mut self, role: QueueRole, queue: Queue) -> Option<&mut Queue> {
        let list = match role {
            QueueRole::Receive(_) => {
                self.counts.receive += 1;
                &mut self.rx_queues
            }
            QueueRole::Transmit(_) => {
                self.counts.transmit += 1;
                &mut self.tx_queues
            }
            QueueRole::Combined(_) => {
                self.counts.combined += 1;
                &mut self.combined_queues
            }
            QueueRole::None => return None,
        };
        let pos = insert_sorted(list, queue);
        list.get_mut(pos)
    }

    /// Record an RPS receive queue.
    pub fn add_rps_queue(&mut self, queue: Queue) {
        insert_sorted(&mut self.rps_queues, queue);
    }

    /// Number of receive plus combined queues.
    pub fn rx_capable_queues(&self) -> usize {
        self.counts.receive + self.counts.combined
    }
}

fn insert_sorted(list: &mut Vec<Queue>, queue: Queue) -> usize {
    let pos = list.partition_point(|q| q.sequence_index <= queue.sequence_index);
    list.insert(pos, queue);
    pos
}

/// Devices keyed and ordered by name.
pub type DeviceSet = BTreeMap<String, Device>;
