//! Coordinator and worker lifecycle, and behavior around the ledger lock.

use std::fs;
use std::time::{Duration, Instant};

use choke_lib::lock::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL};
use choke_lib::{
    CapacityPolicy, ChokeConfig, Decision, DestinationId, ErrorKind, GateBuilder, GateSettings,
    LedgerIdentity, LedgerLock, Registry,
};
use pretty_assertions::assert_eq;
use test_utils::{identity, ledger_dir, policy, registry};

#[test]
fn test_worker_cannot_attach_before_coordinator() {
    let dir = ledger_dir!();
    let err = GateBuilder::builder()
        .registry(registry! { "a" => policy!(1) })
        .identity(identity!(dir))
        .build()
        .attach()
        .unwrap_err();
    assert!(matches!(err, ErrorKind::Attach { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_worker_with_different_registry_is_refused() {
    let dir = ledger_dir!();
    let identity = identity!(dir);
    let _coordinator = GateBuilder::builder()
        .registry(registry! { "a" => policy!(1), "b" => policy!(1) })
        .identity(identity.clone())
        .build()
        .create()
        .unwrap();

    let err = GateBuilder::builder()
        .registry(registry! { "a" => policy!(1) })
        .identity(identity)
        .build()
        .attach()
        .unwrap_err();
    assert!(matches!(err, ErrorKind::RegionSizeMismatch { .. }));
}

#[test]
fn test_empty_registry_cannot_create() {
    let dir = ledger_dir!();
    let err = GateBuilder::builder()
        .registry(Registry::new())
        .identity(identity!(dir))
        .build()
        .create()
        .unwrap_err();
    assert!(matches!(err, ErrorKind::Allocation { .. }));
}

#[test]
fn test_stale_region_from_previous_run_is_replaced() {
    let dir = ledger_dir!();
    let identity = identity!(dir);
    fs::write(&identity.region_path, [0xff; 7]).unwrap();

    let gate = GateBuilder::builder()
        .registry(registry! { "a" => policy!(1) })
        .identity(identity)
        .build()
        .create()
        .unwrap();
    let id = DestinationId::from(0);
    assert_eq!(gate.snapshot(id).unwrap().in_use_slots, 0);
    assert_eq!(gate.try_admit(id).unwrap(), Decision::Admit);
}

#[test]
fn test_held_lock_times_out_after_configured_timeout() {
    let dir = ledger_dir!();
    let identity = identity!(dir);
    let gate = GateBuilder::builder()
        .registry(registry! { "a" => policy!(5) })
        .identity(identity.clone())
        .build()
        .create()
        .unwrap();
    let id = DestinationId::from(0);

    let holder = LedgerLock::attach(&identity.lock_path).unwrap();
    let held = holder
        .acquire(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
        .unwrap();

    let start = Instant::now();
    let err = gate.try_admit(id).unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_lock_timeout(), "unexpected error: {err}");
    assert!(elapsed >= DEFAULT_LOCK_TIMEOUT, "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");

    // Once the holder lets go, admission works again
    drop(held);
    assert_eq!(gate.try_admit(id).unwrap(), Decision::Admit);
    assert_eq!(gate.stats(id).unwrap().lock_failures, 1);
}

#[test]
fn test_gate_from_config() {
    let dir = ledger_dir!();
    let config = ChokeConfig::from_toml_str(&format!(
        r#"
        ledger_dir = '{}'

        [settings]
        lock_timeout = "50ms"

        [[destinations]]
        name = "www.example.com"
        slot_limit = 1
        burst_percent = 0
        "#,
        dir.path().display()
    ))
    .unwrap();

    let gate = GateBuilder::builder()
        .registry(config.registry().unwrap())
        .identity(config.identity(std::process::id()))
        .settings(config.settings.clone())
        .build()
        .create()
        .unwrap();

    assert!(gate.identity().region_path.starts_with(dir.path()));
    assert_eq!(gate.settings().lock_timeout, Duration::from_millis(50));

    let id = gate.registry().lookup("www.example.com").unwrap();
    let permit = gate.admit(id).unwrap();
    assert!(permit.is_some());
    assert!(gate.admit(id).unwrap().is_none());
}

#[test]
fn test_coordinator_drop_tears_down() {
    let dir = ledger_dir!();
    let identity = identity!(dir);
    let gate = GateBuilder::builder()
        .registry(registry! { "a" => policy!(1) })
        .identity(identity.clone())
        .settings(GateSettings::default())
        .build()
        .create()
        .unwrap();
    assert!(identity.region_path.exists());
    assert!(identity.lock_path.exists());

    drop(gate);
    assert!(!identity.region_path.exists());
    assert!(!identity.lock_path.exists());
}
