//! Handing the ledger identity from coordinator to worker through the
//! process environment.
//!
//! This file holds a single test on purpose: it is the only code in its
//! process that touches the environment.

use std::env;

use choke_lib::ledger::{LOCK_PATH_ENV, REGION_PATH_ENV};
use choke_lib::{CapacityPolicy, Decision, DestinationId, GateBuilder, LedgerIdentity, Registry};
use pretty_assertions::assert_eq;
use test_utils::{identity, ledger_dir, policy, registry};

#[test]
fn test_worker_attaches_with_identity_from_environment() {
    let dir = ledger_dir!();
    let identity = identity!(dir);
    let coordinator = GateBuilder::builder()
        .registry(registry! { "a" => policy!(1) })
        .identity(identity.clone())
        .build()
        .create()
        .unwrap();

    assert_eq!(LedgerIdentity::from_env(), None);

    // What the coordinator exports before spawning a worker
    for (name, value) in identity.env_vars() {
        // SAFETY: no other thread of this test process reads or writes the
        // environment.
        unsafe { env::set_var(name, value) };
    }
    assert_eq!(env::var_os(REGION_PATH_ENV), Some(identity.region_path.clone().into()));
    assert_eq!(env::var_os(LOCK_PATH_ENV), Some(identity.lock_path.clone().into()));

    let from_env = LedgerIdentity::from_env().unwrap();
    assert_eq!(from_env, identity);

    let worker = GateBuilder::builder()
        .registry(registry! { "a" => policy!(1) })
        .identity(from_env)
        .build()
        .attach()
        .unwrap();
    let id = DestinationId::from(0);
    assert_eq!(worker.try_admit(id).unwrap(), Decision::Admit);
    assert_eq!(coordinator.snapshot(id).unwrap().in_use_slots, 1);
    assert_eq!(coordinator.try_admit(id).unwrap(), Decision::Reject);

    // A worker without both variables has nothing to attach to
    // SAFETY: as above.
    unsafe { env::remove_var(LOCK_PATH_ENV) };
    assert_eq!(LedgerIdentity::from_env(), None);
}
