//! Filesystem access for procfs/sysfs control files.
//!
//! Every read and write opens the file, performs one operation and closes it
//! again; nothing is kept open between calls.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the per-irq affinity control file.
pub const SMP_AFFINITY: &str = "smp_affinity";

/// Longest interface name accepted by the kernel (IFNAMSIZ - 1).
pub const MAX_IFNAME_LEN: usize = 15;

/// Read a whole control file as text.
pub fn read_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path)
}

/// Write `text` to an existing control file.
///
/// The file is never created: writing to a path the kernel does not expose
/// is an error.
pub fn write_file(path: &Path, text: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(text.as_bytes())
}

/// List the entry names of a directory, sorted, hidden entries skipped.
pub fn list_dir(path: &Path) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(path)?
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    Ok(names)
}

/// Well-known locations below the sysfs root.
#[derive(Debug, Clone)]
pub struct SysPaths {
    root: PathBuf,
}

impl SysPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `devices/system/cpu/online`
    pub fn cpu_online(&self) -> PathBuf {
        self.root.join("devices/system/cpu/online")
    }

    /// `devices/system/node`
    pub fn node_dir(&self) -> PathBuf {
        self.root.join("devices/system/node")
    }

    /// `class/net/<dev>`
    pub fn net_dev(&self, dev: &str) -> PathBuf {
        self.root.join("class/net").join(dev)
    }

    /// `class/net/<dev>/device/numa_node`
    pub fn numa_node(&self, dev: &str) -> PathBuf {
        self.net_dev(dev).join("device/numa_node")
    }

    /// `class/net/<dev>/queues/rx-<queue>/rps_cpus`
    pub fn rps_cpus(&self, dev: &str, queue: usize) -> PathBuf {
        self.net_dev(dev)
            .join("queues")
            .join(format!("rx-{queue}"))
            .join("rps_cpus")
    }
}

/// Decides whether a name refers to an existing network interface.
pub trait InterfaceResolver {
    fn is_interface(&self, name: &str) -> bool;
}

/// Resolves names against the running kernel with `if_nametoindex(3)`.
///
/// Works inside network namespaces too, since the lookup is done by the
/// kernel for the namespace of the calling process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceResolver for SystemInterfaces {
    fn is_interface(&self, name: &str) -> bool {
        match nix::net::if_::if_nametoindex(name) {
            Ok(index) => index != 0,
            Err(_) => false,
        }
    }
}

/// Resolves names by looking for `class/net/<name>` below a sysfs root.
///
/// Used when the tool runs against a captured or alternate sysfs tree, where
/// the kernel's own interface table does not describe the devices.
#[derive(Debug, Clone)]
pub struct SysfsInterfaces {
    paths: SysPaths,
}

impl SysfsInterfaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: SysPaths::new(root),
        }
    }
}

impl InterfaceResolver for SysfsInterfaces {
    fn is_interface(&self, name: &str) -> bool {
        !name.is_empty() && !name.contains('/') && self.paths.net_dev(name).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let paths = SysPaths::new("/sys");
        assert_eq!(
            paths.cpu_online(),
            PathBuf::from("/sys/devices/system/cpu/online")
        );
        assert_eq!(
            paths.numa_node("eth0"),
            PathBuf::from("/sys/class/net/eth0/device/numa_node")
        );
        assert_eq!(
            paths.rps_cpus("eth1", 3),
            PathBuf::from("/sys/class/net/eth1/queues/rx-3/rps_cpus")
        );
    }

    #[test]
    fn test_loopback_resolves() {
        // every Linux network namespace has a loopback device
        assert!(SystemInterfaces.is_interface("lo"));
        assert!(!SystemInterfaces.is_interface("no-such-if0"));
    }

    #[test]
    fn test_sysfs_resolver_rejects_paths() {
        let resolver = SysfsInterfaces::new("/");
        assert!(!resolver.is_interface(""));
        assert!(!resolver.is_interface("../etc"));
    }
}
