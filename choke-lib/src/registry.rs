use std::fmt;

use serde::Serialize;

use crate::{CapacityPolicy, ErrorKind, Result};

/// Dense, 0-based identity of a registered destination.
///
/// Ids are handed out sequentially by [`Registry::register`] and index
/// directly into the slot ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DestinationId(usize);

impl DestinationId {
    /// The id as a ledger index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for DestinationId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered destination: a name for logs plus its capacity policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    /// Display name, e.g. a virtual host name
    pub name: String,
    /// Capacity policy, immutable after registration
    pub policy: CapacityPolicy,
}

/// Startup registry of destinations and their policies.
///
/// The registry does not deduplicate by name: registering the same name
/// twice yields two distinct ids. Once handed to an
/// [`AdmissionGate`](crate::AdmissionGate) it is shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    destinations: Vec<Destination>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            destinations: Vec::new(),
        }
    }

    /// Register a destination and return its fresh id
    pub fn register<S: Into<String>>(&mut self, name: S, policy: CapacityPolicy) -> DestinationId {
        let id = DestinationId(self.destinations.len());
        let name = name.into();
        log::debug!(
            "Registered destination {name} as #{id} (slot limit {}, burst {}%)",
            policy.slot_limit(),
            policy.burst_percent()
        );
        self.destinations.push(Destination { name, policy });
        id
    }

    /// Look up a destination.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidDestination`] if `id` was not handed out
    /// by this registry.
    pub fn get(&self, id: DestinationId) -> Result<&Destination> {
        self.destinations
            .get(id.index())
            .ok_or(ErrorKind::InvalidDestination {
                id,
                registered: self.destinations.len(),
            })
    }

    /// Id of the first destination registered under `name`
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<DestinationId> {
        self.destinations
            .iter()
            .position(|d| d.name == name)
            .map(DestinationId)
    }

    /// Number of registered destinations
    #[must_use]
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// Returns `true` if nothing has been registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Iterate over all destinations in id order
    pub fn iter(&self) -> impl Iterator<Item = (DestinationId, &Destination)> {
        self.destinations
            .iter()
            .enumerate()
            .map(|(index, d)| (DestinationId(index), d))
    }
}
