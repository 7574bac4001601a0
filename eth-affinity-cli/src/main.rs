//! eth-affinity - CPU affinity for ethernet devices
//!
//! Pins every interrupt queue of every network device to a CPU and, where the
//! hardware cannot spread receive work itself, enables receive packet
//! steering on the device's NUMA node.
//!
//! # Usage
//!
//! ```bash
//! # Show the current affinity of every device
//! eth-affinity --list
//!
//! # Show what would be written, keeping CPU 0 free
//! eth-affinity --test --reserve 1 -v
//!
//! # Apply, only for eth0 and eth1
//! sudo eth-affinity --devices eth0,eth1
//!
//! # Give every queue all CPUs again and switch RPS off
//! sudo eth-affinity --reset
//!
//! # Run against a captured tree
//! eth-affinity --test --sysdir ./sys --irqdir ./proc/irq
//! ```
//!
//! Logging goes to stderr and follows the verbosity flags unless `RUST_LOG`
//! is set.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use eth_affinity::config::{DEFAULT_IRQDIR, DEFAULT_SYSDIR};
use eth_affinity::{Config, Error, InterfaceResolver, SysfsInterfaces, SystemInterfaces};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eth-affinity", version)]
#[command(about = "Set CPU affinity for ethernet device interrupts and packet steering")]
struct Args {
    /// More output; repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// No report output
    #[arg(short, long)]
    quiet: bool,

    /// No output at all, not even errors
    #[arg(short, long)]
    silent: bool,

    /// Dry run: report the assignment without writing it
    #[arg(short = 't', long = "test")]
    dry_run: bool,

    /// List the current affinity and exit
    #[arg(short, long)]
    list: bool,

    /// Use at most N CPUs
    #[arg(short = 'm', long = "maxcpu", value_name = "N")]
    max_cpus: Option<usize>,

    /// Keep the first N CPUs free of device interrupts
    #[arg(short = 'r', long = "reserve", value_name = "N", default_value_t = 0)]
    reserve: usize,

    /// Let multiqueue devices use the reserved CPUs too
    #[arg(short = 'R', long = "no-reserve-mq")]
    no_reserve_mq: bool,

    /// Disable the heuristics (round-robin and RPS)
    #[arg(short = 'H', long = "noheur")]
    no_heuristics: bool,

    /// Give every queue all online CPUs and turn RPS off
    #[arg(long)]
    reset: bool,

    /// Only handle these devices
    #[arg(long, value_name = "DEV,...", value_delimiter = ',')]
    devices: Vec<String>,

    /// Skip these devices
    #[arg(long, value_name = "DEV,...", value_delimiter = ',')]
    exclude: Vec<String>,

    /// sysfs root
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SYSDIR)]
    sysdir: PathBuf,

    /// Interrupt tree root
    #[arg(long, value_name = "DIR", default_value = DEFAULT_IRQDIR)]
    irqdir: PathBuf,
}

impl Args {
    fn to_config(&self) -> Config {
        Config::new()
            .verbose(self.verbose)
            .quiet(self.quiet)
            .silent(self.silent)
            .dry_run(self.dry_run)
            .list(self.list)
            .max_cpus(self.max_cpus)
            .reserved_cpus(self.reserve)
            .reserve_multiqueue(!self.no_reserve_mq)
            .heuristics(!self.no_heuristics)
            .reset(self.reset)
            .include(&self.devices)
            .exclude(&self.exclude)
            .sysdir(&self.sysdir)
            .irqdir(&self.irqdir)
    }

    /// Log filter: `RUST_LOG` when set, else the level picked by the flags.
    /// Silent turns logging off whatever `RUST_LOG` says.
    fn env_filter(&self) -> EnvFilter {
        if self.silent {
            return EnvFilter::new("off");
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_filter()))
    }

    /// Default log filter when `RUST_LOG` is not set.
    fn log_filter(&self) -> &'static str {
        if self.silent {
            return "off";
        }
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Name lookups go to the kernel unless the tool runs on another sysfs tree.
fn resolver_for(sysdir: &Path) -> Box<dyn InterfaceResolver> {
    if sysdir == Path::new(DEFAULT_SYSDIR) {
        Box::new(SystemInterfaces)
    } else {
        Box::new(SysfsInterfaces::new(sysdir))
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let silent = std::env::args().any(|a| a == "-s" || a == "--silent");
            return if e.use_stderr() {
                if !silent {
                    let _ = e.print();
                }
                ExitCode::FAILURE
            } else {
                // --help and --version
                let _ = e.print();
                ExitCode::SUCCESS
            };
        }
    };

    // Logs go to stderr so report lines on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(args.env_filter())
        .with_ansi(false)
        .with_writer(io::stderr)
        .init();

    let config = args.to_config();
    debug!(?config, "Starting");

    let resolver = resolver_for(&args.sysdir);
    let mut stdout = io::stdout().lock();
    match eth_affinity::run(&config, resolver.as_ref(), &mut stdout) {
        Ok(outcome) if outcome.summary.all_failed() => {
            error!(devices = outcome.summary.devices, "Failed to set affinity for every device");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e @ Error::Options(_)) => {
            if !config.is_silent() {
                eprintln!("eth-affinity: {e}");
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Giving up");
            ExitCode::FAILURE
        }
    }
}
