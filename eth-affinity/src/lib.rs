//! CPU affinity for ethernet device interrupt queues.
//!
//! Discovers the interrupt queues of every network device from the interrupt
//! tree (`/proc/irq`) and sysfs, decides which CPU serves each queue and
//! writes the resulting masks into `smp_affinity` and `rps_cpus`.
//!
//! # Quick start
//!
//! ```no_run
//! use eth_affinity::{Config, SystemInterfaces};
//!
//! let config = Config::new().reserved_cpus(1).dry_run(true);
//! let outcome = eth_affinity::run(&config, &SystemInterfaces, &mut std::io::stdout())?;
//! println!("{} devices", outcome.summary.devices);
//! # Ok::<(), eth_affinity::Error>(())
//! ```
//!
//! The pass is single threaded and runs in a fixed order: devices by name,
//! queues by queue number.

pub mod assign;
pub mod config;
pub mod device;
pub mod error;
pub mod heuristics;
pub mod mask;
pub mod report;
pub mod run;
pub mod scan;
pub mod sysfs;
pub mod topology;

pub use assign::{Action, PassSummary};
pub use config::{Config, CpuBudget, RoundRobin};
pub use device::{Device, DeviceSet, Queue, QueueRole};
pub use error::{Error, Result};
pub use heuristics::DeviceStats;
pub use mask::CpuMask;
pub use run::{RunOutcome, run};
pub use sysfs::{InterfaceResolver, SysfsInterfaces, SystemInterfaces};
pub use topology::CpuTopology;
