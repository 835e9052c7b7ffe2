use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, VariantNames};

use crate::{CapacityPolicy, LedgerRecord, Timestamp};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Decision {
    /// The request may proceed and must be released exactly once
    Admit,
    /// The destination is at capacity; the request must not be released
    Reject,
}

impl Decision {
    /// Returns `true` for [`Decision::Admit`]
    #[must_use]
    pub const fn is_admit(self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Whether a burst admission writes its grace window back to the ledger.
#[non_exhaustive]
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum GraceMode {
    /// Store the effective expiry on every burst admission.
    ///
    /// An open window is not extended by later requests, and once it closes
    /// no new window opens until the flap period has passed.
    #[default]
    Persistent,
    /// Never store the expiry, so every over-limit request sees a fresh
    /// window: bursting is allowed whenever there is headroom and the grace
    /// period is non-zero.
    AlwaysFresh,
}

/// Decide whether one more request fits, and how the record changes if so.
///
/// Must run while the ledger lock is held; the returned record is meant to be
/// stored back in place of `record`. A rejection never changes the record.
#[must_use]
pub fn decide(
    policy: &CapacityPolicy,
    record: &LedgerRecord,
    now: Timestamp,
    mode: GraceMode,
) -> (Decision, LedgerRecord) {
    if policy.is_unlimited() {
        return (Decision::Admit, *record);
    }

    let limit = u64::from(policy.slot_limit());
    if record.in_use_slots < limit {
        return (Decision::Admit, admitted(record, record.grace_expires_at));
    }

    // Signed, so that usage beyond the burst band also counts as "full"
    let free_slots = i128::from(policy.hard_limit()) - i128::from(record.in_use_slots);
    if free_slots <= 0 {
        return (Decision::Reject, *record);
    }

    let candidate = now.saturating_add(policy.grace_period());
    let expiry = match record.grace_expires_at {
        Some(stored) if stored > now => stored,
        Some(stored) if stored.saturating_add(policy.flap_period()) > now => stored,
        _ => candidate,
    };

    if expiry <= now {
        return (Decision::Reject, *record);
    }

    let grace_expires_at = match mode {
        GraceMode::Persistent => Some(expiry),
        GraceMode::AlwaysFresh => record.grace_expires_at,
    };
    (Decision::Admit, admitted(record, grace_expires_at))
}

/// Return one slot, never going below zero.
#[must_use]
pub const fn release_slot(record: &LedgerRecord) -> LedgerRecord {
    LedgerRecord {
        in_use_slots: record.in_use_slots.saturating_sub(1),
        grace_expires_at: record.grace_expires_at,
    }
}

const fn admitted(record: &LedgerRecord, grace_expires_at: Option<Timestamp>) -> LedgerRecord {
    LedgerRecord {
        in_use_slots: record.in_use_slots.saturating_add(1),
        grace_expires_at,
    }
}
