use std::sync::{Arc, Mutex, PoisonError};

use typed_builder::TypedBuilder;

use crate::config::RejectionSettings;
use crate::ledger::{SharedRecord, SlotLedger};
use crate::lock::{LedgerLock, LedgerLockGuard, LockError};
use crate::{
    Clock, Decision, Destination, DestinationId, DestinationStats, ErrorKind, GateSettings,
    LedgerIdentity, LedgerRecord, LockFailurePolicy, Registry, Result, SystemClock, decide,
    release_slot,
};

/// Builder for [`AdmissionGate`].
///
/// The coordinating process finishes with [`GateBuilder::create`], every
/// worker with [`GateBuilder::attach`].
#[derive(TypedBuilder, Debug)]
#[builder(field_defaults(setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `GateBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `GateBuilder`.
"))]
pub struct GateBuilder {
    /// Registered destinations; ids handed out by this registry are the
    /// only valid input to the gate
    registry: Registry,
    /// Where the ledger region and its lock file live
    identity: LedgerIdentity,
    /// Lock timeout, failure policy, grace mode and rejection values
    #[builder(default)]
    settings: GateSettings,
    /// Time source for grace windows
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
}

impl GateBuilder {
    /// Allocate the ledger and its lock file, as the coordinating process.
    ///
    /// Call once, after every destination is registered and before any
    /// worker starts. The returned gate removes both files when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Allocation`] or [`ErrorKind::RegionSizeMismatch`]
    /// if the ledger or lock file cannot be set up.
    pub fn create(self) -> Result<AdmissionGate> {
        let ledger = SlotLedger::create(&self.identity.region_path, self.registry.len())?;
        let lock = LedgerLock::create(&self.identity.lock_path)?;
        Ok(self.into_gate(ledger, lock))
    }

    /// Attach to the ledger created by the coordinating process, as a
    /// worker.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Attach`] or [`ErrorKind::RegionSizeMismatch`].
    /// Both are fatal: a worker that cannot attach must not serve traffic.
    pub fn attach(self) -> Result<AdmissionGate> {
        let ledger = SlotLedger::attach(&self.identity.region_path, self.registry.len())?;
        let lock = LedgerLock::attach(&self.identity.lock_path)?;
        Ok(self.into_gate(ledger, lock))
    }

    fn into_gate(self, ledger: SlotLedger, lock: LedgerLock) -> AdmissionGate {
        let stats = (0..self.registry.len())
            .map(|_| Mutex::new(DestinationStats::default()))
            .collect();
        log::debug!(
            "Admission gate ready for {} destinations ({})",
            self.registry.len(),
            if ledger.is_owner() {
                "coordinator"
            } else {
                "worker"
            }
        );
        AdmissionGate {
            registry: self.registry,
            identity: self.identity,
            settings: self.settings,
            clock: self.clock,
            ledger,
            lock,
            stats,
        }
    }
}

/// Outcome of one admission check, before it is reduced to a [`Decision`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Admitted and counted in the ledger; must be released
    Metered,
    /// Admitted without touching the ledger; must not be released
    Unmetered,
    Rejected,
}

/// The admission gate: decides whether a request to a destination may
/// proceed, and takes the slot back once it is done.
///
/// Share one gate between all threads of a process (e.g. in an [`Arc`]);
/// every process attaches its own gate to the same ledger.
#[derive(Debug)]
pub struct AdmissionGate {
    registry: Registry,
    identity: LedgerIdentity,
    settings: GateSettings,
    clock: Arc<dyn Clock>,
    ledger: SlotLedger,
    lock: LedgerLock,
    stats: Vec<Mutex<DestinationStats>>,
}

impl AdmissionGate {
    /// Check whether one more request to `id` fits.
    ///
    /// On [`Decision::Admit`] the caller must call
    /// [`AdmissionGate::release`] exactly once when the request finishes; on
    /// [`Decision::Reject`] it must not.
    ///
    /// If the ledger lock cannot be taken in time the configured
    /// [`LockFailurePolicy`] applies, except that this method never fails
    /// open: an uncounted admission followed by the matching release would
    /// take back a slot held by another request. Use
    /// [`AdmissionGate::admit`] for fail-open admission.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidDestination`] for an unregistered id and
    /// [`ErrorKind::LockUnavailable`] if the lock cannot be taken and the
    /// failure policy is [`LockFailurePolicy::Error`] or
    /// [`LockFailurePolicy::Admit`].
    pub fn try_admit(&self, id: DestinationId) -> Result<Decision> {
        Ok(match self.check(id, false)? {
            Admission::Metered | Admission::Unmetered => Decision::Admit,
            Admission::Rejected => Decision::Reject,
        })
    }

    /// Check whether one more request to `id` fits and return a guard that
    /// releases its slot when dropped.
    ///
    /// Returns `None` if the request was rejected. With
    /// [`LockFailurePolicy::Admit`] a lock failure yields an unmetered permit
    /// that releases nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidDestination`] for an unregistered id and
    /// [`ErrorKind::LockUnavailable`] if the lock cannot be taken and the
    /// failure policy is [`LockFailurePolicy::Error`].
    pub fn admit(&self, id: DestinationId) -> Result<Option<SlotPermit<'_>>> {
        let metered = match self.check(id, true)? {
            Admission::Metered => true,
            Admission::Unmetered => false,
            Admission::Rejected => return Ok(None),
        };
        Ok(Some(SlotPermit {
            gate: self,
            id,
            metered,
            released: false,
        }))
    }

    /// Return the slot of a finished request to `id`.
    ///
    /// The gate does not detect double releases; the in-use count is only
    /// kept from going below zero.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidDestination`] for an unregistered id and
    /// [`ErrorKind::LockUnavailable`] if the lock cannot be taken. The
    /// failure policy does not apply here: the slot is still taken.
    pub fn release(&self, id: DestinationId) -> Result<()> {
        let destination = self.registry.get(id)?;
        if destination.policy.is_unlimited() {
            return Ok(());
        }

        let guard = self.acquire(id)?;
        let record = self.record(id)?;
        let updated = release_slot(&record.load());
        record.store(&updated);
        release_lock(guard);

        self.update_stats(id, DestinationStats::record_release);
        log::log!(
            self.settings.decision_log_level(),
            "{}: released, {}/{} in use",
            destination.name,
            updated.in_use_slots,
            destination.policy.slot_limit()
        );
        Ok(())
    }

    /// Read the current ledger record of `id` under the lock.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidDestination`] for an unregistered id and
    /// [`ErrorKind::LockUnavailable`] if the lock cannot be taken.
    pub fn snapshot(&self, id: DestinationId) -> Result<LedgerRecord> {
        self.registry.get(id)?;
        let guard = self.acquire(id)?;
        let record = self.record(id)?.load();
        release_lock(guard);
        Ok(record)
    }

    /// Statistics of `id` collected by this process
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidDestination`] for an unregistered id.
    pub fn stats(&self, id: DestinationId) -> Result<DestinationStats> {
        self.registry.get(id)?;
        Ok(self
            .stats
            .get(id.index())
            .map(|stats| stats.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default())
    }

    /// The registered destinations
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Settings the gate was built with
    #[must_use]
    pub const fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Values for formatting a rejection response
    #[must_use]
    pub const fn rejection(&self) -> &RejectionSettings {
        &self.settings.rejection
    }

    /// Identity to hand to workers so they can attach
    #[must_use]
    pub const fn identity(&self) -> &LedgerIdentity {
        &self.identity
    }

    /// Returns `true` if this gate created the ledger
    #[must_use]
    pub const fn is_coordinator(&self) -> bool {
        self.ledger.is_owner()
    }

    /// `fail_open` is `false` for callers that cannot tell an unmetered
    /// admission apart, which turns [`LockFailurePolicy::Admit`] into an error
    fn check(&self, id: DestinationId, fail_open: bool) -> Result<Admission> {
        let destination = self.registry.get(id)?;
        let policy = &destination.policy;
        if policy.is_unlimited() {
            self.update_stats(id, DestinationStats::record_unmetered);
            return Ok(Admission::Unmetered);
        }

        let guard = match self
            .lock
            .acquire(self.settings.lock_timeout, self.settings.lock_poll_interval)
        {
            Ok(guard) => guard,
            Err(e) => return self.on_lock_failure(id, destination, e, fail_open),
        };

        let record = self.record(id)?;
        let current = record.load();
        let now = self.clock.now();
        let (decision, updated) = decide(policy, &current, now, self.settings.grace_mode);
        if decision.is_admit() {
            record.store(&updated);
        }
        release_lock(guard);

        let level = self.settings.decision_log_level();
        let limit = u64::from(policy.slot_limit());
        match decision {
            Decision::Admit => {
                let burst = updated.in_use_slots > limit;
                self.update_stats(id, |stats| stats.record_admit(updated.in_use_slots, burst));
                if burst {
                    log::log!(
                        level,
                        "{}: admitted {}/{}+{} (burst grace period until {})",
                        destination.name,
                        updated.in_use_slots,
                        limit,
                        policy.burst_slots(),
                        updated
                            .grace_expires_at
                            .unwrap_or_else(|| now.saturating_add(policy.grace_period()))
                    );
                } else {
                    log::log!(
                        level,
                        "{}: admitted {}/{}",
                        destination.name,
                        updated.in_use_slots,
                        limit
                    );
                }
                Ok(Admission::Metered)
            }
            Decision::Reject => {
                self.update_stats(id, DestinationStats::record_reject);
                log::log!(
                    level,
                    "{}: rejected at {}/{}+{}",
                    destination.name,
                    current.in_use_slots,
                    limit,
                    policy.burst_slots()
                );
                Ok(Admission::Rejected)
            }
        }
    }

    fn on_lock_failure(
        &self,
        id: DestinationId,
        destination: &Destination,
        error: LockError,
        fail_open: bool,
    ) -> Result<Admission> {
        self.update_stats(id, DestinationStats::record_lock_failure);
        match self.settings.lock_failure {
            LockFailurePolicy::Error => Err(ErrorKind::LockUnavailable(error)),
            LockFailurePolicy::Admit if !fail_open => Err(ErrorKind::LockUnavailable(error)),
            LockFailurePolicy::Admit => {
                log::warn!(
                    "{}: ledger lock unavailable ({error}), admitting without metering",
                    destination.name
                );
                self.update_stats(id, DestinationStats::record_unmetered);
                Ok(Admission::Unmetered)
            }
            LockFailurePolicy::Reject => {
                log::warn!(
                    "{}: ledger lock unavailable ({error}), rejecting",
                    destination.name
                );
                self.update_stats(id, DestinationStats::record_reject);
                Ok(Admission::Rejected)
            }
        }
    }

    fn acquire(&self, id: DestinationId) -> Result<LedgerLockGuard<'_>> {
        self.lock
            .acquire(self.settings.lock_timeout, self.settings.lock_poll_interval)
            .map_err(|e| {
                self.update_stats(id, DestinationStats::record_lock_failure);
                ErrorKind::LockUnavailable(e)
            })
    }

    fn record(&self, id: DestinationId) -> Result<&SharedRecord> {
        self.ledger
            .record_at(id)
            .ok_or(ErrorKind::InvalidDestination {
                id,
                registered: self.ledger.len(),
            })
    }

    fn update_stats<F: FnOnce(&mut DestinationStats)>(&self, id: DestinationId, update: F) {
        if let Some(stats) = self.stats.get(id.index()) {
            update(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }
}

/// Release the ledger lock, logging instead of failing the request path
fn release_lock(guard: LedgerLockGuard<'_>) {
    if let Err(e) = guard.release() {
        log::error!("{}", ErrorKind::LockRelease(e));
    }
}

/// A slot held by an admitted request.
///
/// Dropping the permit hands the slot back on every exit path, including
/// early returns and panics. Permits for requests that were admitted without
/// being counted (unlimited destinations, or a fail-open lock failure)
/// release nothing.
#[must_use = "dropping the permit releases the slot immediately"]
#[derive(Debug)]
pub struct SlotPermit<'a> {
    gate: &'a AdmissionGate,
    id: DestinationId,
    metered: bool,
    released: bool,
}

impl SlotPermit<'_> {
    /// Destination the slot belongs to
    #[must_use]
    pub const fn destination(&self) -> DestinationId {
        self.id
    }

    /// Returns `true` if the slot is counted in the ledger
    #[must_use]
    pub const fn is_metered(&self) -> bool {
        self.metered
    }

    /// Release the slot now and observe failures.
    ///
    /// # Errors
    ///
    /// See [`AdmissionGate::release`]. The permit is consumed either way and
    /// does not retry on drop.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if self.metered {
            self.gate.release(self.id)
        } else {
            Ok(())
        }
    }
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        if self.metered && !self.released {
            if let Err(e) = self.gate.release(self.id) {
                log::error!("Failed to release slot of destination #{}: {e}", self.id);
            }
        }
    }
}
