//! CPU and NUMA topology discovery.
//!
//! Reads the online CPU range from `devices/system/cpu/online` and the
//! node membership from `devices/system/node/node<N>/cpulist`. Single-node
//! systems do not expose the node directory at all; they get one synthetic
//! node 0 holding every CPU.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{trace, warn};

use crate::config::Config;
use crate::mask::{CpuMask, MAX_CPUS};
use crate::sysfs::{self, SysPaths};
use crate::{Error, Result};

/// NUMA node id.
pub type NodeId = u32;

/// CPU to NUMA node layout of the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    total_cpus: usize,
    nodes: BTreeMap<NodeId, BTreeSet<usize>>,
    multinode: bool,
}

impl CpuTopology {
    /// Topology with a single node 0 holding CPUs `0..total_cpus`.
    pub fn single_node(total_cpus: usize) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(0, (0..total_cpus).collect());
        Self {
            total_cpus,
            nodes,
            multinode: false,
        }
    }

    /// Topology from explicit node membership.
    ///
    /// Falls back to [`CpuTopology::single_node`] when `nodes` is empty.
    pub fn from_nodes(total_cpus: usize, nodes: BTreeMap<NodeId, BTreeSet<usize>>) -> Self {
        if nodes.is_empty() {
            return Self::single_node(total_cpus);
        }
        Self {
            total_cpus,
            nodes,
            multinode: true,
        }
    }

    /// Highest online CPU index + 1.
    pub fn total_cpus(&self) -> usize {
        self.total_cpus
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, BTreeSet<usize>> {
        &self.nodes
    }

    /// Whether node membership came from the NUMA tree.
    pub fn is_multinode(&self) -> bool {
        self.multinode
    }

    /// The node owning `cpu`, if any.
    pub fn node_of(&self, cpu: usize) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, cpus)| cpus.contains(&cpu))
            .map(|(id, _)| *id)
    }

    /// Mask of every CPU on the same node as `cpu`, skipping CPUs below
    /// `min_cpu`.
    ///
    /// Returns `None` when no node owns `cpu`.
    pub fn node_mask(&self, cpu: usize, min_cpu: usize) -> Option<CpuMask> {
        let node = self.node_of(cpu)?;
        let cpus = self.nodes.get(&node)?;
        Some(cpus.range(min_cpu..).copied().collect())
    }
}

/// Parse the online CPU range into a CPU count.
///
/// `"0"` (a bare number) is a single CPU system; `"low-high"` gives
/// `high + 1`. A list of ranges gives the highest listed CPU + 1.
pub fn parse_online_cpus(text: &str) -> Result<usize> {
    let text = text.trim();
    if !text.contains('-') && !text.contains(',') {
        parse_cpu(text)?;
        return Ok(1);
    }
    let cpus = parse_node_cpulist(text)?;
    cpus.last()
        .map(|max| max + 1)
        .ok_or_else(|| Error::CpuList(text.to_string()))
}

/// Parse a cpulist such as `"0-3,8-11"` into the set of CPUs it covers.
pub fn parse_node_cpulist(text: &str) -> Result<BTreeSet<usize>> {
    let mut cpus = BTreeSet::new();
    let text = text.trim();
    if text.is_empty() {
        return Ok(cpus);
    }

    for term in text.split(',') {
        let term = term.trim();
        match term.split_once('-') {
            Some((low, high)) => {
                let low = parse_cpu(low)?;
                let high = parse_cpu(high)?;
                if low > high {
                    return Err(Error::CpuList(term.to_string()));
                }
                cpus.extend(low..=high);
            }
            None => {
                cpus.insert(parse_cpu(term)?);
            }
        }
    }
    Ok(cpus)
}

fn parse_cpu(text: &str) -> Result<usize> {
    text.trim()
        .parse()
        .map_err(|_| Error::CpuList(text.to_string()))
}

/// Read the online CPU count. Any failure here is fatal for the run.
///
/// Masks are 64 bits wide, so larger systems are limited to their first
/// [`MAX_CPUS`] CPUs.
pub fn read_online_cpus(paths: &SysPaths) -> Result<usize> {
    let path = paths.cpu_online();
    let text = sysfs::read_file(&path).map_err(|source| Error::OnlineCpus {
        path: path.clone(),
        source,
    })?;
    let total = parse_online_cpus(&text)?;
    if total > MAX_CPUS {
        warn!(online = total, max = MAX_CPUS, "Only the first CPUs are used");
        return Ok(MAX_CPUS);
    }
    Ok(total)
}

/// Discover the CPU topology below the configured sysfs root.
pub fn build_topology(config: &Config) -> Result<CpuTopology> {
    let paths = SysPaths::new(config.sysdir_path());
    let total_cpus = read_online_cpus(&paths)?;

    let node_dir = paths.node_dir();
    if !node_dir.exists() {
        return Ok(CpuTopology::single_node(total_cpus));
    }

    let entries = match sysfs::list_dir(&node_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %node_dir.display(), error = %e, "Failed to list NUMA nodes");
            return Ok(CpuTopology::single_node(total_cpus));
        }
    };

    let mut nodes = BTreeMap::new();
    for entry in entries {
        let Some(id) = entry
            .strip_prefix("node")
            .and_then(|n| n.parse::<NodeId>().ok())
        else {
            continue;
        };

        let cpulist = node_dir.join(&entry).join("cpulist");
        let text = match sysfs::read_file(&cpulist) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %cpulist.display(), error = %e, "Failed to read node cpulist");
                continue;
            }
        };
        match parse_node_cpulist(&text) {
            Ok(cpus) => {
                nodes.insert(id, cpus);
            }
            Err(e) => warn!(path = %cpulist.display(), error = %e, "Skipping node"),
        }
    }

    let topology = CpuTopology::from_nodes(total_cpus, nodes);
    for (id, cpus) in topology.nodes() {
        trace!(node = id, cpus = ?cpus, "NUMA node");
    }
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_online_cpus() {
        assert_eq!(parse_online_cpus("0-7").unwrap(), 8);
        assert_eq!(parse_online_cpus("0-7\n").unwrap(), 8);
        assert_eq!(parse_online_cpus("0").unwrap(), 1);
        assert_eq!(parse_online_cpus("0-3,6-7").unwrap(), 8);
        assert!(parse_online_cpus("").is_err());
        assert!(parse_online_cpus("x-3").is_err());
    }

    #[test]
    fn test_parse_node_cpulist() {
        let cpus = parse_node_cpulist("0-3,8-11").unwrap();
        assert_eq!(
            cpus.into_iter().collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 8, 9, 10, 11]
        );

        let cpus = parse_node_cpulist("0,4,8\n").unwrap();
        assert_eq!(cpus.into_iter().collect::<Vec<_>>(), vec![0, 4, 8]);

        assert!(parse_node_cpulist("").unwrap().is_empty());
        assert!(parse_node_cpulist("3-1").is_err());
    }

    #[test]
    fn test_single_node() {
        let topology = CpuTopology::single_node(4);
        assert!(!topology.is_multinode());
        assert_eq!(topology.nodes().len(), 1);
        assert_eq!(
            topology.nodes()[&0].iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(topology.node_of(3), Some(0));
        assert_eq!(topology.node_of(4), None);
    }

    #[test]
    fn test_node_mask() {
        let mut nodes = BTreeMap::new();
        nodes.insert(0, parse_node_cpulist("0-3").unwrap());
        nodes.insert(1, parse_node_cpulist("4-7").unwrap());
        let topology = CpuTopology::from_nodes(8, nodes);

        assert!(topology.is_multinode());
        assert_eq!(topology.node_mask(5, 0).unwrap().bits(), 0xf0);
        assert_eq!(topology.node_mask(2, 0).unwrap().bits(), 0x0f);
        // reserved CPUs are left out of the mask
        assert_eq!(topology.node_mask(2, 1).unwrap().bits(), 0x0e);
        assert_eq!(topology.node_mask(9, 0), None);
    }

    #[test]
    fn test_empty_nodes_fallback() {
        let topology = CpuTopology::from_nodes(2, BTreeMap::new());
        assert!(!topology.is_multinode());
        assert_eq!(topology.node_of(1), Some(0));
    }
}
