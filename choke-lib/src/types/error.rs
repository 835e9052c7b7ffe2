use std::path::PathBuf;
use thiserror::Error;

use crate::{DestinationId, LockError};

/// Possible errors when interacting with `choke_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The destination id was never handed out by the registry.
    ///
    /// This is a registration bug in the host, not a runtime condition.
    #[error("Destination id {id} is not registered ({registered} destinations known)")]
    InvalidDestination {
        /// The offending id
        id: DestinationId,
        /// Number of registered destinations
        registered: usize,
    },

    /// The shared slot ledger could not be created, sized or mapped
    #[error("Failed to allocate slot ledger at `{}`: {source}", path.display())]
    Allocation {
        /// Backing file of the region
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A worker could not map an existing slot ledger (or lock file)
    #[error("Failed to attach to slot ledger at `{}`: {source}", path.display())]
    Attach {
        /// Backing file of the region
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The mapped region does not have the size the registry requires
    #[error("Slot ledger at `{}` has {actual} bytes, expected {expected}", path.display())]
    RegionSizeMismatch {
        /// Backing file of the region
        path: PathBuf,
        /// `destinations * size_of::<LedgerRecord>()`
        expected: usize,
        /// Length found on disk
        actual: usize,
    },

    /// The ledger lock could not be acquired in time, or the lock
    /// primitive failed
    #[error("Ledger lock unavailable: {0}")]
    LockUnavailable(#[from] LockError),

    /// Releasing the ledger lock failed.
    ///
    /// Never returned from the admission path; it is logged instead.
    #[error("Failed to release ledger lock: {0}")]
    LockRelease(#[source] std::io::Error),

    /// A capacity policy value is outside its allowed range
    #[error("Invalid value {value} for `{field}` (maximum is {max})")]
    InvalidPolicy {
        /// Name of the policy field
        field: &'static str,
        /// Rejected value
        value: u64,
        /// Largest accepted value
        max: u64,
    },

    /// The configuration file could not be read or parsed
    #[error("Cannot load configuration `{}`: {reason}", path.display())]
    Config {
        /// Path of the configuration file
        path: PathBuf,
        /// Why loading failed
        reason: String,
    },
}

impl ErrorKind {
    /// Returns `true` if this error is a lock acquisition timeout
    #[must_use]
    pub const fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockUnavailable(LockError::TimedOut { .. }))
    }

    /// Returns `true` if this error is fatal to the process that hit it.
    ///
    /// A process that cannot create or attach the ledger cannot take part
    /// in admission control and must not serve traffic.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. } | Self::Attach { .. } | Self::RegionSizeMismatch { .. }
        )
    }
}
