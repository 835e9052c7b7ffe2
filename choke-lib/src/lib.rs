//! `choke` is an admission-control gate for virtual hosts.
//!
//! It limits how many requests a destination may have in flight at once,
//! with a bounded, time-decaying allowance for bursts above the steady-state
//! limit. Every worker process or thread shares one slot ledger (a
//! memory-mapped region) guarded by one cross-process lock file.
//!
//! The coordinating process registers destinations and creates the ledger;
//! every worker attaches to it:
//!
//! ```
//! use choke_lib::{CapacityPolicy, Decision, GateBuilder, LedgerIdentity, Registry};
//!
//! # fn main() -> choke_lib::Result<()> {
//! # let dir = tempfile::tempdir().unwrap();
//! let mut registry = Registry::new();
//! let id = registry.register("www.example.com", CapacityPolicy::new(10, 15, 10, 1800)?);
//!
//! let identity = LedgerIdentity::in_dir(dir.path(), std::process::id());
//! let gate = GateBuilder::builder()
//!     .registry(registry)
//!     .identity(identity)
//!     .build()
//!     .create()?;
//!
//! if gate.try_admit(id)? == Decision::Admit {
//!     // ... serve the request ...
//!     gate.release(id)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Prefer [`AdmissionGate::admit`] in request handlers: the returned
//! [`SlotPermit`] hands the slot back when it goes out of scope, on every
//! exit path.
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod clock;
mod decision;
mod gate;
mod policy;
mod registry;
mod stats;
mod types;

pub mod config;
pub mod ledger;
pub mod lock;

pub use crate::{
    clock::{Clock, ManualClock, SystemClock, Timestamp},
    config::{ChokeConfig, DestinationConfig, GateSettings, LockFailurePolicy, RejectionSettings},
    decision::{Decision, GraceMode, decide, release_slot},
    gate::{AdmissionGate, GateBuilder, SlotPermit},
    ledger::{LedgerIdentity, LedgerRecord, SlotLedger},
    lock::{LedgerLock, LockError},
    policy::{
        CapacityPolicy, DEFAULT_BURST_FLAP_PERIOD, DEFAULT_BURST_PERCENT, DEFAULT_GRACE_PERIOD,
        DEFAULT_SLOT_LIMIT, MAX_SLOT_LIMIT,
    },
    registry::{Destination, DestinationId, Registry},
    stats::DestinationStats,
    types::{ErrorKind, Result},
};

/// Product name reported in the `X-Throttled-By` header value
pub const PRODUCT_NAME: &str = "choke";

/// Name of the response header hosts attach to throttled responses
pub const THROTTLED_BY_HEADER: &str = "X-Throttled-By";

/// Value of the [`THROTTLED_BY_HEADER`], e.g. `choke/0.1.0`
pub const THROTTLED_BY: &str = concat!("choke/", env!("CARGO_PKG_VERSION"));
