//! Runs the eth-affinity binary against a fake tree.

use std::process::{Command, Output};

use eth_affinity_test::FakeSystem;

fn eth_affinity(fake: &FakeSystem, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_eth-affinity"))
        .arg("--sysdir")
        .arg(fake.sysdir())
        .arg("--irqdir")
        .arg(fake.irqdir())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run eth-affinity")
}

fn fixture() -> FakeSystem {
    let fake = FakeSystem::new("0-3");
    fake.netdev("eth0", 0)
        .netdev("eth1", 0)
        .netdev("eth2", 0)
        .irq(30, &["eth0"], "f")
        .irq(31, &["eth1"], "f")
        .irq(32, &["eth2"], "f");
    fake
}

#[test]
fn test_dry_run() {
    let fake = fixture();
    let output = eth_affinity(&fake, &["-t"]);
    assert!(output.status.success());
    // three single-queue devices on four CPUs: round-robin
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "irq 0 -> eth0\nirq 1 -> eth1\nirq 2 -> eth2\n"
    );
    assert_eq!(fake.affinity(31), "f");
}

#[test]
fn test_apply_with_exclude() {
    let fake = fixture();
    let output = eth_affinity(&fake, &["-q", "--exclude", "eth0,eth2"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert_eq!(fake.affinity(30), "f");
    assert_eq!(fake.affinity(31), "1");
    assert_eq!(fake.affinity(32), "f");
}

#[test]
fn test_list() {
    let fake = fixture();
    let output = eth_affinity(&fake, &["--list", "--devices", "eth1"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "irq 0,1,2,3 -> eth1\n");
}

#[test]
fn test_option_errors() {
    let fake = fixture();
    let output = eth_affinity(&fake, &["-m", "0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());

    let output = eth_affinity(&fake, &["-s", "-m", "0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stderr.is_empty());

    let output = eth_affinity(&fake, &["--bogus"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_help_and_version() {
    let fake = fixture();
    let output = eth_affinity(&fake, &["--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--noheur"));

    let output = eth_affinity(&fake, &["-V"]);
    assert!(output.status.success());
}

#[test]
fn test_fatal_setup() {
    let fake = fixture();
    let output = Command::new(env!("CARGO_BIN_EXE_eth-affinity"))
        .arg("--sysdir")
        .arg(fake.root().join("nowhere"))
        .arg("--irqdir")
        .arg(fake.irqdir())
        .env_remove("RUST_LOG")
        .output()
        .expect("run eth-affinity");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("online"));
}

#[test]
fn test_silent_overrides_rust_log() {
    let fake = fixture();
    let output = Command::new(env!("CARGO_BIN_EXE_eth-affinity"))
        .arg("-s")
        .arg("--sysdir")
        .arg(fake.root().join("nowhere"))
        .arg("--irqdir")
        .arg(fake.irqdir())
        .env("RUST_LOG", "trace")
        .output()
        .expect("run eth-affinity");
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stderr.is_empty(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_every_device_failed() {
    let fake = FakeSystem::new("0-1");
    fake.netdev("eth0", 0).irq(30, &["eth0"], "3").remove_affinity(30);
    let output = eth_affinity(&fake, &[]);
    assert_eq!(output.status.code(), Some(1));
}
