//! Fake `/sys` and `/proc/irq` trees for driving eth-affinity in tests.
//!
//! A [`FakeSystem`] lives in a temporary directory and is removed when
//! dropped. It holds just enough of both trees for discovery and scanning:
//!
//! ```text
//! sys/devices/system/cpu/online
//! sys/devices/system/node/node<N>/cpulist
//! sys/class/net/<dev>/device/numa_node
//! sys/class/net/<dev>/queues/rx-<i>/rps_cpus
//! proc/irq/<n>/<entry>/
//! proc/irq/<n>/smp_affinity
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use eth_affinity::{Config, RunOutcome, SysfsInterfaces};
use tempfile::TempDir;

pub mod util {
    /// Install a test log subscriber. Safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }
}

pub struct FakeSystem {
    dir: TempDir,
}

impl FakeSystem {
    /// New tree with the given online CPU range, e.g. `"0-3"`.
    pub fn new(online: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let fake = Self { dir };
        fake.write(&fake.sysdir().join("devices/system/cpu/online"), &format!("{online}\n"));
        // the real tree has plain files next to the irq directories
        fake.write(&fake.irqdir().join("default_smp_affinity"), "f\n");
        fake
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn sysdir(&self) -> PathBuf {
        self.root().join("sys")
    }

    pub fn irqdir(&self) -> PathBuf {
        self.root().join("proc/irq")
    }

    /// Add NUMA node `id` owning `cpulist`, e.g. `"4-7"`.
    pub fn node(&self, id: u32, cpulist: &str) -> &Self {
        let path = self
            .sysdir()
            .join(format!("devices/system/node/node{id}/cpulist"));
        self.write(&path, &format!("{cpulist}\n"));
        self
    }

    /// Add a network interface on NUMA node `numa_node`.
    pub fn netdev(&self, name: &str, numa_node: i32) -> &Self {
        let path = self
            .sysdir()
            .join(format!("class/net/{name}/device/numa_node"));
        self.write(&path, &format!("{numa_node}\n"));
        self
    }

    /// Add an RPS control file for receive queue `queue` of `dev`.
    pub fn rps(&self, dev: &str, queue: usize, mask: &str) -> &Self {
        self.write(&self.rps_path(dev, queue), &format!("{mask}\n"));
        self
    }

    /// Add irq `n` with the given action entries and current mask.
    pub fn irq(&self, n: u32, entries: &[&str], mask: &str) -> &Self {
        let dir = self.irqdir().join(n.to_string());
        for entry in entries {
            fs::create_dir_all(dir.join(entry)).expect("create irq entry");
        }
        self.write(&dir.join("smp_affinity"), &format!("{mask}\n"));
        self
    }

    /// Remove the affinity file of irq `n`, so reads and writes fail.
    pub fn remove_affinity(&self, n: u32) -> &Self {
        fs::remove_file(self.affinity_path(n)).expect("remove smp_affinity");
        self
    }

    pub fn affinity_path(&self, n: u32) -> PathBuf {
        self.irqdir().join(n.to_string()).join("smp_affinity")
    }

    pub fn rps_path(&self, dev: &str, queue: usize) -> PathBuf {
        self.sysdir()
            .join(format!("class/net/{dev}/queues/rx-{queue}/rps_cpus"))
    }

    /// Current content of the affinity file of irq `n`, trimmed.
    pub fn affinity(&self, n: u32) -> String {
        read_trimmed(&self.affinity_path(n))
    }

    /// Current content of an RPS control file, trimmed.
    pub fn rps_mask(&self, dev: &str, queue: usize) -> String {
        read_trimmed(&self.rps_path(dev, queue))
    }

    /// Default configuration pointed at this tree.
    pub fn config(&self) -> Config {
        Config::new().sysdir(self.sysdir()).irqdir(self.irqdir())
    }

    pub fn resolver(&self) -> SysfsInterfaces {
        SysfsInterfaces::new(self.sysdir())
    }

    fn write(&self, path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, text).expect("write fake file");
    }
}

fn read_trimmed(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

/// Run one pass against `fake` and return the report output.
pub fn run_pass(fake: &FakeSystem, config: &Config) -> eth_affinity::Result<(RunOutcome, String)> {
    let mut out = Vec::new();
    let outcome = eth_affinity::run(config, &fake.resolver(), &mut out)?;
    Ok((outcome, String::from_utf8_lossy(&out).into_owned()))
}
