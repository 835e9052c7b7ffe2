//! Configuration of the admission gate and its destinations.
//!
//! Everything here is plain data, deserialized from TOML by the host (or by
//! the `choke` command-line tool) and handed to the gate at construction:
//!
//! ```toml
//! ledger_dir = "/run/choke"
//!
//! [settings]
//! lock_timeout = "100ms"
//! lock_failure = "reject"
//!
//! [[destinations]]
//! name = "www.example.com"
//! slot_limit = 10
//! burst_percent = 15
//! ```
//!
//! Nothing in here is process-wide mutable state; two gates in one process
//! may run with different settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, VariantNames};

use crate::lock::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::{
    CapacityPolicy, DEFAULT_BURST_FLAP_PERIOD, DEFAULT_BURST_PERCENT, DEFAULT_GRACE_PERIOD,
    DEFAULT_SLOT_LIMIT, ErrorKind, GraceMode, LedgerIdentity, MAX_SLOT_LIMIT, Registry, Result,
};

/// Default status code hosts send for a throttled request
pub const DEFAULT_REJECTION_STATUS: u16 = 429;

/// Default body hosts send for a throttled request
pub const DEFAULT_REJECTION_MESSAGE: &str = "VirtualHost choked. Try again later.";

/// Longest accepted rejection message, in characters
pub const MAX_REJECTION_MESSAGE_LEN: usize = 140;

/// Largest accepted burst percentage, grace period and flap period
const MAX_U16_SETTING: u64 = u16::MAX as u64;

/// What the gate does when the ledger lock cannot be taken in time.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LockFailurePolicy {
    /// Surface [`ErrorKind::LockUnavailable`] and let the caller decide
    #[default]
    Error,
    /// Fail open: admit the request without metering it.
    ///
    /// Only [`AdmissionGate::admit`](crate::AdmissionGate::admit) can fail
    /// open; [`AdmissionGate::try_admit`](crate::AdmissionGate::try_admit)
    /// surfaces [`ErrorKind::LockUnavailable`] instead.
    Admit,
    /// Fail closed: reject the request
    Reject,
}

/// How a host should signal a throttled request to its client.
///
/// The gate never produces a response itself; these values are only handed
/// through to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectionSettings {
    /// Status code of the rejection
    #[serde(default = "default_status_code")]
    pub status_code: u16,

    /// Body of the rejection
    #[serde(default = "default_message")]
    pub message: String,
}

impl Default for RejectionSettings {
    fn default() -> Self {
        Self {
            status_code: default_status_code(),
            message: default_message(),
        }
    }
}

impl RejectionSettings {
    fn validate(&self) -> Result<()> {
        let len = self.message.chars().count();
        if len > MAX_REJECTION_MESSAGE_LEN {
            return Err(ErrorKind::InvalidPolicy {
                field: "rejection.message",
                value: len as u64,
                max: MAX_REJECTION_MESSAGE_LEN as u64,
            });
        }
        Ok(())
    }
}

const fn default_status_code() -> u16 {
    DEFAULT_REJECTION_STATUS
}

fn default_message() -> String {
    DEFAULT_REJECTION_MESSAGE.to_string()
}

/// Settings of one admission gate, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSettings {
    /// Upper bound on waiting for the ledger lock
    #[serde(default = "default_lock_timeout", with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Pause between two lock attempts
    #[serde(default = "default_lock_poll_interval", with = "humantime_serde")]
    pub lock_poll_interval: Duration,

    /// What to do when the lock is unavailable
    #[serde(default)]
    pub lock_failure: LockFailurePolicy,

    /// Whether burst admissions persist their grace window
    #[serde(default)]
    pub grace_mode: GraceMode,

    /// Values hosts use to format a rejection
    #[serde(default)]
    pub rejection: RejectionSettings,

    /// Log every decision at debug instead of trace level
    #[serde(default)]
    pub debug: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
            lock_poll_interval: default_lock_poll_interval(),
            lock_failure: LockFailurePolicy::default(),
            grace_mode: GraceMode::default(),
            rejection: RejectionSettings::default(),
            debug: false,
        }
    }
}

impl GateSettings {
    /// Log level used for per-decision traces
    #[must_use]
    pub const fn decision_log_level(&self) -> log::Level {
        if self.debug {
            log::Level::Debug
        } else {
            log::Level::Trace
        }
    }
}

const fn default_lock_timeout() -> Duration {
    DEFAULT_LOCK_TIMEOUT
}

const fn default_lock_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

/// One destination as written in the configuration file.
///
/// Values are kept wide so that out-of-range input is reported instead of
/// being silently truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    /// Name of the destination, e.g. a virtual host
    pub name: String,

    /// Concurrent request limit, `0` for unlimited
    #[serde(default = "default_slot_limit")]
    pub slot_limit: u64,

    /// Burst allowance in percent of the slot limit
    #[serde(default = "default_burst_percent")]
    pub burst_percent: u64,

    /// Grace period in seconds, `0` disables bursting
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,

    /// Flap damping period in seconds
    #[serde(default = "default_flap_period")]
    pub flap_period: u64,
}

impl DestinationConfig {
    /// Destination with default policy values
    #[must_use]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            slot_limit: default_slot_limit(),
            burst_percent: default_burst_percent(),
            grace_period: default_grace_period(),
            flap_period: default_flap_period(),
        }
    }

    /// Validate the values and build the capacity policy.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPolicy`] for the first out-of-range value.
    pub fn policy(&self) -> Result<CapacityPolicy> {
        CapacityPolicy::new(
            bounded("slot_limit", self.slot_limit, u64::from(MAX_SLOT_LIMIT))?,
            bounded("burst_percent", self.burst_percent, MAX_U16_SETTING)?,
            bounded("grace_period", self.grace_period, MAX_U16_SETTING)?,
            bounded("flap_period", self.flap_period, MAX_U16_SETTING)?,
        )
    }
}

fn bounded(field: &'static str, value: u64, max: u64) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|v| u64::from(*v) <= max)
        .ok_or(ErrorKind::InvalidPolicy { field, value, max })
}

const fn default_slot_limit() -> u64 {
    DEFAULT_SLOT_LIMIT as u64
}

const fn default_burst_percent() -> u64 {
    DEFAULT_BURST_PERCENT as u64
}

const fn default_grace_period() -> u64 {
    DEFAULT_GRACE_PERIOD as u64
}

const fn default_flap_period() -> u64 {
    DEFAULT_BURST_FLAP_PERIOD as u64
}

/// A complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChokeConfig {
    /// Gate settings
    #[serde(default)]
    pub settings: GateSettings,

    /// Directory for the ledger region and lock file; the system
    /// temporary directory if unset
    #[serde(default)]
    pub ledger_dir: Option<PathBuf>,

    /// Destinations, registered in file order
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

impl ChokeConfig {
    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Config`] if the file cannot be read or parsed and
    /// [`ErrorKind::InvalidPolicy`] if a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| ErrorKind::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&contents, path)
    }

    /// Parse and validate a TOML configuration held in memory.
    ///
    /// # Errors
    ///
    /// See [`ChokeConfig::load_from_file`].
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Self::parse(contents, Path::new("<inline>"))
    }

    fn parse(contents: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| ErrorKind::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value without registering anything.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPolicy`] for the first out-of-range value.
    pub fn validate(&self) -> Result<()> {
        self.settings.rejection.validate()?;
        for destination in &self.destinations {
            destination.policy()?;
        }
        Ok(())
    }

    /// Register every destination in file order.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPolicy`] for the first out-of-range value.
    pub fn registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        for destination in &self.destinations {
            registry.register(destination.name.clone(), destination.policy()?);
        }
        Ok(registry)
    }

    /// Ledger identity for a coordinator with the given pid
    #[must_use]
    pub fn identity(&self, pid: u32) -> LedgerIdentity {
        match &self.ledger_dir {
            Some(dir) => LedgerIdentity::in_dir(dir, pid),
            None => LedgerIdentity::in_temp_dir(pid),
        }
    }
}
