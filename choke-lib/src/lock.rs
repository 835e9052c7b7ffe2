//! The ledger lock: one mutual-exclusion handle shared by every worker.
//!
//! Threads of one process serialize on an in-process mutex; processes
//! serialize on an advisory lock held on a lock file. Acquisition polls a
//! non-blocking attempt until a deadline, so a stuck or crashed lock holder
//! can stall an admission check for at most the configured timeout.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use fslock::LockFile;
use thiserror::Error;

use crate::{ErrorKind, Result};

/// Default upper bound on waiting for the ledger lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Default pause between two non-blocking acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Errors while acquiring the ledger lock
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock was not acquired before the timeout elapsed
    #[error("timed out after {}ms", waited.as_millis())]
    TimedOut {
        /// How long acquisition was attempted
        waited: Duration,
    },

    /// The lock primitive itself failed
    #[error("lock primitive failed: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    /// Returns `true` for the `ETIMEDOUT`-equivalent case
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// A cross-process mutual-exclusion primitive.
///
/// Implementations that have no non-blocking variant return an error of
/// kind [`io::ErrorKind::Unsupported`] from [`LockPrimitive::try_lock`];
/// [`LedgerLock::acquire`] then falls back to [`LockPrimitive::lock`].
pub trait LockPrimitive: Send {
    /// Try to take the lock without blocking; `Ok(false)` if it is held
    /// elsewhere
    ///
    /// # Errors
    ///
    /// Fails if the underlying primitive fails
    fn try_lock(&mut self) -> io::Result<bool>;

    /// Take the lock, blocking for as long as it takes
    ///
    /// # Errors
    ///
    /// Fails if the underlying primitive fails
    fn lock(&mut self) -> io::Result<()>;

    /// Give the lock back
    ///
    /// # Errors
    ///
    /// Fails if the underlying primitive fails
    fn unlock(&mut self) -> io::Result<()>;
}

impl LockPrimitive for LockFile {
    fn try_lock(&mut self) -> io::Result<bool> {
        // A previous unlock failed and left the lock with us
        if self.owns_lock() {
            return Ok(true);
        }
        LockFile::try_lock(self)
    }

    fn lock(&mut self) -> io::Result<()> {
        if self.owns_lock() {
            return Ok(());
        }
        LockFile::lock(self)
    }

    fn unlock(&mut self) -> io::Result<()> {
        if !self.owns_lock() {
            return Ok(());
        }
        LockFile::unlock(self)
    }
}

type Primitive = Box<dyn LockPrimitive>;

/// The single lock guarding every read and write of the slot ledger.
///
/// Created once by the coordinating process with [`LedgerLock::create`];
/// every worker re-opens it from the same path with [`LedgerLock::attach`].
pub struct LedgerLock {
    path: PathBuf,
    primitive: Mutex<Primitive>,
    owner: bool,
}

impl LedgerLock {
    /// Create the lock file for a new ledger.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Allocation`] if the lock file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        let file = open_lock_file(path).map_err(|source| ErrorKind::Allocation {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Created ledger lock at {}", path.display());
        Ok(Self::new(path, Box::new(file), true))
    }

    /// Re-open the lock file created by the coordinating process.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Attach`] if the lock file does not exist or
    /// cannot be opened.
    pub fn attach(path: &Path) -> Result<Self> {
        let attach = |source: io::Error| ErrorKind::Attach {
            path: path.to_path_buf(),
            source,
        };
        if !path.exists() {
            return Err(attach(io::Error::new(
                io::ErrorKind::NotFound,
                "ledger lock file does not exist",
            )));
        }
        let file = open_lock_file(path).map_err(attach)?;
        Ok(Self::new(path, Box::new(file), false))
    }

    /// Wrap a custom primitive, e.g. one without a non-blocking variant.
    ///
    /// The returned lock never removes `path`.
    #[must_use]
    pub fn with_primitive(path: &Path, primitive: Box<dyn LockPrimitive>) -> Self {
        Self::new(path, primitive, false)
    }

    fn new(path: &Path, primitive: Primitive, owner: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            primitive: Mutex::new(primitive),
            owner,
        }
    }

    /// Acquire the lock, giving up after `timeout`.
    ///
    /// Makes at least one attempt, then retries every `poll_interval` until
    /// the lock is taken or the deadline passes. If the primitive has no
    /// non-blocking variant this blocks without any timeout; that is a
    /// platform limitation.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::TimedOut`] when the deadline passes and
    /// [`LockError::Io`] when the primitive fails.
    pub fn acquire(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> std::result::Result<LedgerLockGuard<'_>, LockError> {
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            let attempt = match self.primitive.try_lock() {
                Ok(primitive) => try_primitive(primitive),
                // A thread panicked while holding the lock; the primitive
                // itself is still usable
                Err(TryLockError::Poisoned(poisoned)) => try_primitive(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => Ok(None),
            }
            .inspect_err(|e| log::debug!("Ledger lock {} failed: {e}", self.path.display()))?;
            if let Some(guard) = attempt {
                log::debug!(
                    "Took ledger lock {} after {}us",
                    self.path.display(),
                    start.elapsed().as_micros()
                );
                return Ok(guard);
            }

            let now = Instant::now();
            if now >= deadline {
                log::debug!(
                    "Ledger lock {} timed out after {}ms",
                    self.path.display(),
                    (now - start).as_millis()
                );
                return Err(LockError::TimedOut {
                    waited: now - start,
                });
            }
            log::trace!("Retrying ledger lock in {}ms", poll_interval.as_millis());
            thread::sleep(poll_interval.min(deadline - now));
        }
    }

    /// Path of the lock file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn try_primitive(
    mut primitive: MutexGuard<'_, Primitive>,
) -> std::result::Result<Option<LedgerLockGuard<'_>>, LockError> {
    match primitive.try_lock() {
        Ok(true) => Ok(Some(LedgerLockGuard {
            primitive: Some(primitive),
        })),
        Ok(false) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::Unsupported => {
            log::debug!("Lock primitive has no non-blocking variant, waiting without timeout");
            primitive.lock()?;
            Ok(Some(LedgerLockGuard {
                primitive: Some(primitive),
            }))
        }
        Err(e) => Err(LockError::Io(e)),
    }
}

fn open_lock_file(path: &Path) -> io::Result<LockFile> {
    let path = path.to_path_buf();
    LockFile::open(&path)
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = fs::remove_file(&self.path) {
                log::error!(
                    "Failed to remove ledger lock at {}: {e}",
                    self.path.display()
                );
            }
        }
    }
}

impl fmt::Debug for LedgerLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerLock")
            .field("path", &self.path)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Proof that the ledger lock is held.
///
/// Dropping the guard releases the lock; use [`LedgerLockGuard::release`]
/// to observe release failures.
pub struct LedgerLockGuard<'a> {
    primitive: Option<MutexGuard<'a, Primitive>>,
}

impl LedgerLockGuard<'_> {
    /// Release the lock.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying primitive. The in-process mutex
    /// is released either way.
    pub fn release(mut self) -> io::Result<()> {
        match self.primitive.take() {
            Some(mut primitive) => primitive.unlock(),
            None => Ok(()),
        }
    }
}

impl Drop for LedgerLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut primitive) = self.primitive.take() {
            if let Err(e) = primitive.unlock() {
                log::error!("Failed to release ledger lock: {e}");
            }
        }
    }
}

impl fmt::Debug for LedgerLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerLockGuard")
            .field("held", &self.primitive.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let lock = LedgerLock::create(&dir.path().join("lock")).unwrap();

        let guard = lock
            .acquire(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
            .unwrap();
        guard.release().unwrap();

        // Released locks can be taken again
        let guard = lock
            .acquire(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
            .unwrap();
        drop(guard);
        lock.acquire(Duration::ZERO, DEFAULT_POLL_INTERVAL).unwrap();
    }

    #[test]
    fn test_held_by_other_handle_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        let lock = LedgerLock::create(&path).unwrap();
        let other = LedgerLock::attach(&path).unwrap();

        let _held = other
            .acquire(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
            .unwrap();

        let start = Instant::now();
        let err = lock
            .acquire(Duration::from_millis(100), DEFAULT_POLL_INTERVAL)
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
    }

    /// Collects every log line of the test binary
    struct CapturingLogger(std::sync::Mutex<Vec<String>>);

    impl log::Log for CapturingLogger {
        fn enabled(&self, _: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            self.0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(format!("[{}] {}", record.level(), record.args()));
        }

        fn flush(&self) {}
    }

    static LOGGER: CapturingLogger = CapturingLogger(std::sync::Mutex::new(Vec::new()));

    fn captured_for(path: &Path) -> Vec<String> {
        let needle = path.display().to_string();
        LOGGER
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(&needle))
            .cloned()
            .collect()
    }

    #[test]
    fn test_every_attempt_outcome_is_logged() {
        // Only this test installs a logger in this binary
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);

        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        let lock = LedgerLock::create(&path).unwrap();
        let other = LedgerLock::attach(&path).unwrap();

        let held = other
            .acquire(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
            .unwrap();
        lock.acquire(Duration::from_millis(10), DEFAULT_POLL_INTERVAL)
            .unwrap_err();
        drop(held);

        let lines = captured_for(&path);
        assert!(
            lines
                .iter()
                .any(|line| line.starts_with("[DEBUG] Took ledger lock")),
            "{lines:?}"
        );
        assert!(
            lines
                .iter()
                .any(|line| line.starts_with("[DEBUG]") && line.contains("timed out")),
            "{lines:?}"
        );
    }

    #[test]
    fn test_attach_missing_lock_file() {
        let dir = tempdir().unwrap();
        let err = LedgerLock::attach(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, ErrorKind::Attach { .. }));
    }

    #[test]
    fn test_owner_removes_lock_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        let lock = LedgerLock::create(&path).unwrap();
        let worker = LedgerLock::attach(&path).unwrap();
        drop(worker);
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
    }

    #[derive(Debug, Default)]
    struct BlockingOnly {
        blocking_calls: Arc<AtomicUsize>,
    }

    impl LockPrimitive for BlockingOnly {
        fn try_lock(&mut self) -> io::Result<bool> {
            Err(io::ErrorKind::Unsupported.into())
        }

        fn lock(&mut self) -> io::Result<()> {
            self.blocking_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unlock(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_falls_back_to_blocking_lock() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lock = LedgerLock::with_primitive(
            Path::new("unused"),
            Box::new(BlockingOnly {
                blocking_calls: Arc::clone(&calls),
            }),
        );

        lock.acquire(Duration::ZERO, DEFAULT_POLL_INTERVAL)
            .unwrap()
            .release()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct Broken;

    impl LockPrimitive for Broken {
        fn try_lock(&mut self) -> io::Result<bool> {
            Err(io::Error::other("device on fire"))
        }

        fn lock(&mut self) -> io::Result<()> {
            Err(io::Error::other("device on fire"))
        }

        fn unlock(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_primitive_error_is_not_a_timeout() {
        let lock = LedgerLock::with_primitive(Path::new("unused"), Box::new(Broken));
        let err = lock
            .acquire(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
            .unwrap_err();
        assert!(matches!(err, LockError::Io(_)));
        assert!(!err.is_timeout());
    }
}
