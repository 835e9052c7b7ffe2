//! The shared slot ledger.
//!
//! One fixed-size record per destination, stored in a memory-mapped file so
//! that every worker process sees the same counters. The ledger performs no
//! synchronization of its own; every read-modify-write of a record must
//! happen while the [`LedgerLock`](crate::LedgerLock) is held.
//!
//! # Architecture
//!
//! - [`LedgerIdentity`]: where the region and its lock file live; the
//!   coordinator passes it to every worker
//! - [`SlotLedger`]: the mapped region, created by the coordinator and
//!   attached by workers
//! - [`SharedRecord`]: the in-memory layout of one destination's record
//! - [`LedgerRecord`]: a plain copy of a record, used by the decision logic

mod record;
mod region;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use record::{LedgerRecord, RECORD_LEN, SharedRecord};
pub use region::SlotLedger;

use crate::PRODUCT_NAME;

/// Environment variable carrying the region path from coordinator to workers
pub const REGION_PATH_ENV: &str = "CHOKE_LEDGER_REGION";

/// Environment variable carrying the lock file path from coordinator to workers
pub const LOCK_PATH_ENV: &str = "CHOKE_LEDGER_LOCK";

/// Location of a ledger region and its lock file.
///
/// Created once by the coordinating process and handed to every worker,
/// either directly, serialized, or through [`REGION_PATH_ENV`] and
/// [`LOCK_PATH_ENV`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerIdentity {
    /// Backing file of the shared region
    pub region_path: PathBuf,
    /// Lock file guarding the region
    pub lock_path: PathBuf,
}

impl LedgerIdentity {
    /// Identity from explicit paths
    #[must_use]
    pub fn new<R: Into<PathBuf>, L: Into<PathBuf>>(region_path: R, lock_path: L) -> Self {
        Self {
            region_path: region_path.into(),
            lock_path: lock_path.into(),
        }
    }

    /// Identity for a coordinator process: hidden files named after the
    /// coordinator pid inside `dir`
    #[must_use]
    pub fn in_dir(dir: &Path, pid: u32) -> Self {
        Self {
            region_path: dir.join(format!(".{PRODUCT_NAME}-gshm.{pid}")),
            lock_path: dir.join(format!(".{PRODUCT_NAME}-lock.{pid}")),
        }
    }

    /// [`LedgerIdentity::in_dir`] using the system temporary directory
    #[must_use]
    pub fn in_temp_dir(pid: u32) -> Self {
        Self::in_dir(&std::env::temp_dir(), pid)
    }

    /// Read an identity from [`REGION_PATH_ENV`] and [`LOCK_PATH_ENV`]
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let region = std::env::var_os(REGION_PATH_ENV)?;
        let lock = std::env::var_os(LOCK_PATH_ENV)?;
        Some(Self::new(region, lock))
    }

    /// Environment variables that let a worker rebuild this identity
    #[must_use]
    pub fn env_vars(&self) -> [(&'static str, &Path); 2] {
        [
            (REGION_PATH_ENV, self.region_path.as_path()),
            (LOCK_PATH_ENV, self.lock_path.as_path()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_in_dir() {
        let identity = LedgerIdentity::in_dir(Path::new("/var/run"), 4242);
        assert_eq!(
            identity.region_path,
            PathBuf::from("/var/run/.choke-gshm.4242")
        );
        assert_eq!(identity.lock_path, PathBuf::from("/var/run/.choke-lock.4242"));
    }

    #[test]
    fn test_env_vars_names() {
        let identity = LedgerIdentity::new("/a", "/b");
        let vars = identity.env_vars();
        assert_eq!(vars[0], (REGION_PATH_ENV, Path::new("/a")));
        assert_eq!(vars[1], (LOCK_PATH_ENV, Path::new("/b")));
    }
}
