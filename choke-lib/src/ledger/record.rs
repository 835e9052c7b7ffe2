use std::mem;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use crate::Timestamp;

/// Size in bytes of one record in the shared region
pub const RECORD_LEN: usize = mem::size_of::<SharedRecord>();

/// Sentinel stored in the region for "no grace window yet".
///
/// The region is zero-filled at creation, so every record starts unset.
const UNSET: i64 = 0;

/// A copy of one destination's ledger record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerRecord {
    /// Admitted requests that have not been released yet
    pub in_use_slots: u64,
    /// End of the current burst grace window, if one was ever opened
    pub grace_expires_at: Option<Timestamp>,
}

/// In-memory layout of a record inside the shared region.
///
/// # Warning
///
/// Every process mapping the region must agree on this layout. Do not
/// reorder, add or remove fields.
#[repr(C)]
#[derive(Debug)]
pub struct SharedRecord {
    grace_expires_at: AtomicI64,
    in_use_slots: AtomicU64,
}

impl SharedRecord {
    /// Copy the record out of shared memory.
    ///
    /// Only consistent while the ledger lock is held.
    pub fn load(&self) -> LedgerRecord {
        let grace = self.grace_expires_at.load(Ordering::Acquire);
        LedgerRecord {
            in_use_slots: self.in_use_slots.load(Ordering::Acquire),
            grace_expires_at: (grace != UNSET).then_some(Timestamp::from_micros(grace)),
        }
    }

    /// Write a record back into shared memory.
    ///
    /// Must only be called while the ledger lock is held.
    pub fn store(&self, record: &LedgerRecord) {
        let grace = record.grace_expires_at.map_or(UNSET, Timestamp::as_micros);
        self.grace_expires_at.store(grace, Ordering::Release);
        self.in_use_slots.store(record.in_use_slots, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(RECORD_LEN, 16);
        assert_eq!(mem::align_of::<SharedRecord>(), 8);
    }

    #[test]
    fn test_zeroed_record_is_unset() {
        let shared = SharedRecord {
            grace_expires_at: AtomicI64::new(0),
            in_use_slots: AtomicU64::new(0),
        };
        assert_eq!(shared.load(), LedgerRecord::default());
    }

    #[test]
    fn test_store_then_load() {
        let shared = SharedRecord {
            grace_expires_at: AtomicI64::new(0),
            in_use_slots: AtomicU64::new(0),
        };
        let record = LedgerRecord {
            in_use_slots: 7,
            grace_expires_at: Some(Timestamp::from_secs(1_700_000_000)),
        };
        shared.store(&record);
        assert_eq!(shared.load(), record);

        shared.store(&LedgerRecord {
            in_use_slots: 3,
            grace_expires_at: None,
        });
        assert_eq!(shared.load().grace_expires_at, None);
    }
}
