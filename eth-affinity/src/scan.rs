//! Device and queue discovery.
//!
//! Walks the interrupt tree (`/proc/irq/<n>/<entry>`), keeps the entries that
//! belong to a network interface, and groups them into devices with per-role
//! queue lists. The RPS probe then looks for
//! `class/net/<dev>/queues/rx-<i>/rps_cpus` for every device found.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::Config;
use crate::device::{Device, DeviceSet, Queue, QueueRole, base_name, classify};
use crate::sysfs::{self, InterfaceResolver, SMP_AFFINITY, SysPaths};
use crate::{Error, Result};

/// Builds the device set from the interrupt tree.
pub struct Scanner<'a, R: InterfaceResolver + ?Sized> {
    config: &'a Config,
    resolver: &'a R,
    paths: SysPaths,
    devices: DeviceSet,
}

impl<'a, R: InterfaceResolver + ?Sized> Scanner<'a, R> {
    pub fn new(config: &'a Config, resolver: &'a R) -> Self {
        Self {
            config,
            resolver,
            paths: SysPaths::new(config.sysdir_path()),
            devices: DeviceSet::new(),
        }
    }

    /// Walk every irq directory below the interrupt root.
    ///
    /// Failing to list the root is fatal. Problems with a single irq are
    /// logged and the walk continues.
    pub fn scan(&mut self) -> Result<()> {
        let config = self.config;
        let root = config.irqdir_path();
        let entries = sysfs::list_dir(root).map_err(|source| Error::IrqDir {
            path: root.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let irq_dir = root.join(&entry);
            if !irq_dir.is_dir() {
                continue;
            }
            if let Err(e) = self.scan_irq_dir(&irq_dir) {
                warn!(irq = %entry, error = %e, "Failed to scan irq");
            }
        }
        Ok(())
    }

    /// Scan one `/proc/irq/<n>` directory.
    ///
    /// The irq's current affinity is stored on the plain device entries if the
    /// directory has any, otherwise on the queue created last. An unreadable
    /// affinity is an error only for plain device entries.
    pub fn scan_irq_dir(&mut self, irq_dir: &Path) -> Result<()> {
        let Ok(entries) = sysfs::list_dir(irq_dir) else {
            return Ok(());
        };
        let affinity_path = irq_dir.join(SMP_AFFINITY);

        let mut plain_devices: Vec<String> = Vec::new();
        let mut last_queue: Option<(String, QueueRole)> = None;

        for entry in entries {
            let name = base_name(&entry);
            if !self.resolver.is_interface(name) || !self.config.accepts_device(name) {
                continue;
            }
            let name = name.to_string();
            let role = classify(&entry);
            let dev = self.device_mut(&name);
            match role {
                QueueRole::Receive(n) | QueueRole::Transmit(n) | QueueRole::Combined(n) => {
                    dev.add_queue(role, Queue::new(entry, n, affinity_path.clone()));
                    last_queue = Some((name, role));
                }
                QueueRole::None => {
                    dev.control_path = Some(affinity_path.clone());
                    plain_devices.push(name);
                }
            }
        }

        if plain_devices.is_empty() && last_queue.is_none() {
            return Ok(());
        }

        let previous = sysfs::read_file(&affinity_path)
            .map(|text| text.trim().to_string())
            .map(|text| (!text.is_empty()).then_some(text));

        if !plain_devices.is_empty() {
            match previous {
                Ok(Some(mask)) => {
                    for name in &plain_devices {
                        self.device_mut(name).previous_mask = mask.clone();
                    }
                }
                Ok(None) => {}
                Err(source) => {
                    return Err(Error::PriorAffinity {
                        path: affinity_path,
                        source,
                    });
                }
            }
        } else if let Some((name, role)) = last_queue {
            match previous {
                Ok(Some(mask)) => {
                    if let Some(queue) = find_queue(self.device_mut(&name), role) {
                        queue.previous_mask = mask;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %affinity_path.display(), error = %e, "Failed to read queue affinity");
                }
            }
        }
        Ok(())
    }

    /// Get a device by name, creating it (and looking up its NUMA node) on
    /// first sight.
    fn device_mut(&mut self, name: &str) -> &mut Device {
        let paths = &self.paths;
        self.devices
            .entry(name.to_string())
            .or_insert_with(|| Device::new(name, read_numa_node(paths, name)))
    }

    pub fn into_devices(self) -> DeviceSet {
        self.devices
    }
}

fn find_queue(dev: &mut Device, role: QueueRole) -> Option<&mut Queue> {
    let (list, n) = match role {
        QueueRole::Receive(n) => (&mut dev.rx_queues, n),
        QueueRole::Transmit(n) => (&mut dev.tx_queues, n),
        QueueRole::Combined(n) => (&mut dev.combined_queues, n),
        QueueRole::None => return None,
    };
    list.iter_mut().rev().find(|q| q.sequence_index == n)
}

/// NUMA node of a device, 0 when the kernel does not say.
pub fn read_numa_node(paths: &SysPaths, dev: &str) -> i32 {
    sysfs::read_file(&paths.numa_node(dev))
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0)
}

/// Mark devices without any classified queue as single-queue.
///
/// Such a device is served by one legacy irq in both directions, so its
/// receive and transmit counts become 1. Must run after the walk and before
/// the RPS probe and heuristics.
pub fn detect_single_queue_fixup(devices: &mut DeviceSet) {
    for dev in devices.values_mut() {
        if dev.counts.total() == 0 {
            dev.is_single_queue = true;
            dev.counts.receive = 1;
            dev.counts.transmit = 1;
        }
    }
}

/// Record every readable `rps_cpus` file of each device.
///
/// Receive queues `0..max(1, max(receive, combined))` are probed.
pub fn probe_packet_steering(devices: &mut DeviceSet, paths: &SysPaths) {
    for dev in devices.values_mut() {
        let probes = dev.counts.receive.max(dev.counts.combined).max(1);
        for i in 0..probes {
            let path = paths.rps_cpus(&dev.name, i);
            let Ok(text) = sysfs::read_file(&path) else {
                continue;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let mut queue = Queue::new(dev.name.clone(), i, path);
            queue.previous_mask = text.to_string();
            dev.add_rps_queue(queue);
        }
    }
}

/// Walk the interrupt tree, apply the single-queue fixup and probe RPS files.
pub fn scan_devices<R: InterfaceResolver + ?Sized>(
    config: &Config,
    resolver: &R,
) -> Result<DeviceSet> {
    let mut scanner = Scanner::new(config, resolver);
    scanner.scan()?;
    let mut devices = scanner.into_devices();

    detect_single_queue_fixup(&mut devices);
    probe_packet_steering(&mut devices, &SysPaths::new(config.sysdir_path()));

    for dev in devices.values() {
        debug!(
            device = %dev.name,
            rx = dev.counts.receive,
            tx = dev.counts.transmit,
            txrx = dev.counts.combined,
            rps = dev.rps_queues.len(),
            "Device queues"
        );
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_queue_fixup() {
        let mut devices = DeviceSet::new();
        devices.insert("eth0".into(), Device::new("eth0", 0));
        let mut multi = Device::new("eth1", 0);
        multi.counts.receive = 2;
        devices.insert("eth1".into(), multi);

        detect_single_queue_fixup(&mut devices);
        let eth0 = &devices["eth0"];
        assert!(eth0.is_single_queue);
        assert_eq!((eth0.counts.receive, eth0.counts.transmit), (1, 1));
        assert_eq!(eth0.counts.combined, 0);
        assert!(!devices["eth1"].is_single_queue);

        // a second run leaves everything as it was
        let before = devices.clone();
        detect_single_queue_fixup(&mut devices);
        assert_eq!(before, devices);
    }

    #[test]
    fn test_find_queue_by_role() {
        let mut dev = Device::new("eth0", 0);
        let path = std::path::PathBuf::from("/proc/irq/30/smp_affinity");
        dev.add_queue(QueueRole::Transmit(1), Queue::new("eth0-tx-1", 1, path.clone()));
        assert!(find_queue(&mut dev, QueueRole::Transmit(1)).is_some());
        assert!(find_queue(&mut dev, QueueRole::Receive(1)).is_none());
        assert!(find_queue(&mut dev, QueueRole::None).is_none());
    }
}
