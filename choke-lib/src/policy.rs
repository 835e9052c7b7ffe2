use std::time::Duration;

use serde::Serialize;

use crate::{ErrorKind, Result};

/// Largest accepted slot limit
pub const MAX_SLOT_LIMIT: u16 = 32767;

/// Default slot limit; `0` means "no limit"
pub const DEFAULT_SLOT_LIMIT: u16 = 0;

/// Default burst allowance, as a percentage of the slot limit
pub const DEFAULT_BURST_PERCENT: u16 = 30;

/// Default grace period for bursting, in seconds
pub const DEFAULT_GRACE_PERIOD: u16 = 10;

/// Default flap damping period, in seconds
pub const DEFAULT_BURST_FLAP_PERIOD: u16 = 1800;

/// Capacity policy of a single destination.
///
/// Built once during startup registration and never mutated afterwards, so
/// it can be read from any thread without synchronization.
///
/// # Examples
///
/// With a slot limit of 10 and a burst percentage of 15, two extra requests
/// (the ceiling of 1.5) are admitted for the length of the grace period:
///
/// ```
/// use choke_lib::CapacityPolicy;
///
/// let policy = CapacityPolicy::new(10, 15, 10, 1800).unwrap();
/// assert_eq!(policy.burst_slots(), 2);
/// assert_eq!(policy.hard_limit(), 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CapacityPolicy {
    slot_limit: u16,
    burst_percent: u16,
    grace_period_secs: u16,
    flap_period_secs: u16,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            slot_limit: DEFAULT_SLOT_LIMIT,
            burst_percent: DEFAULT_BURST_PERCENT,
            grace_period_secs: DEFAULT_GRACE_PERIOD,
            flap_period_secs: DEFAULT_BURST_FLAP_PERIOD,
        }
    }
}

impl CapacityPolicy {
    /// Create a policy.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPolicy`] if `slot_limit` exceeds
    /// [`MAX_SLOT_LIMIT`].
    pub fn new(
        slot_limit: u16,
        burst_percent: u16,
        grace_period_secs: u16,
        flap_period_secs: u16,
    ) -> Result<Self> {
        if slot_limit > MAX_SLOT_LIMIT {
            return Err(ErrorKind::InvalidPolicy {
                field: "slot_limit",
                value: u64::from(slot_limit),
                max: u64::from(MAX_SLOT_LIMIT),
            });
        }

        Ok(Self {
            slot_limit,
            burst_percent,
            grace_period_secs,
            flap_period_secs,
        })
    }

    /// A policy that bypasses admission control entirely
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Maximum concurrent requests outside a grace window; `0` is unlimited
    #[must_use]
    pub const fn slot_limit(&self) -> u16 {
        self.slot_limit
    }

    /// Burst allowance as a percentage of the slot limit
    #[must_use]
    pub const fn burst_percent(&self) -> u16 {
        self.burst_percent
    }

    /// How long a burst window stays open once triggered
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs as u64)
    }

    /// How long a closed window is still honored before a fresh one may open
    #[must_use]
    pub const fn flap_period(&self) -> Duration {
        Duration::from_secs(self.flap_period_secs as u64)
    }

    /// Returns `true` if admission control is disabled for the destination
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.slot_limit == 0
    }

    /// Returns `true` if requests may ever be admitted above the slot limit
    #[must_use]
    pub const fn can_burst(&self) -> bool {
        self.grace_period_secs > 0 && self.burst_slots() > 0
    }

    /// Extra slots granted inside a grace window.
    ///
    /// Rounds up, so any nonzero percentage grants at least one slot.
    #[must_use]
    pub const fn burst_slots(&self) -> u64 {
        (self.slot_limit as u64 * self.burst_percent as u64).div_ceil(100)
    }

    /// Slot limit plus burst slots: the in-use count is never above this
    #[must_use]
    pub const fn hard_limit(&self) -> u64 {
        self.slot_limit as u64 + self.burst_slots()
    }
}
