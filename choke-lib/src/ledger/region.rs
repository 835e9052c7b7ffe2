use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::ptr;
use std::path::{Path, PathBuf};

use memmap2::{MmapOptions, MmapRaw};

use super::record::{RECORD_LEN, SharedRecord};
use crate::{DestinationId, ErrorKind, Result};

/// The memory-mapped slot ledger.
///
/// The coordinating process calls [`SlotLedger::create`] once, after all
/// destinations are registered and before any worker starts. Workers call
/// [`SlotLedger::attach`] on the same path. Nobody owns the region
/// exclusively, but only the creating handle removes the backing file when
/// it is dropped.
pub struct SlotLedger {
    path: PathBuf,
    map: MmapRaw,
    records: usize,
    owner: bool,
}

impl SlotLedger {
    /// Create a zero-filled region of `records` records at `path`.
    ///
    /// A region left behind at the same path by an earlier run is removed
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Allocation`] if the backing file cannot be
    /// created, sized or mapped, and [`ErrorKind::RegionSizeMismatch`] if the
    /// mapping is not exactly the requested size.
    pub fn create(path: &Path, records: usize) -> Result<Self> {
        let allocation = |source: io::Error| ErrorKind::Allocation {
            path: path.to_path_buf(),
            source,
        };
        let len = region_len(records).map_err(allocation)?;

        if path.exists() {
            log::warn!(
                "Found existing slot ledger at {}, destroying it",
                path.display()
            );
            if let Err(e) = fs::remove_file(path) {
                log::error!("Failed to destroy existing slot ledger: {e}");
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(allocation)?;
        file.set_len(len as u64).map_err(allocation)?;

        let map = map_region(&file, len).map_err(allocation)?;
        if map.len() != len {
            return Err(ErrorKind::RegionSizeMismatch {
                path: path.to_path_buf(),
                expected: len,
                actual: map.len(),
            });
        }
        // SAFETY:
        // The mapping is writable and exactly `len` bytes long, and no worker
        // can attach before `create` returns.
        unsafe { ptr::write_bytes(map.as_mut_ptr(), 0, len) };
        map.flush().map_err(allocation)?;

        log::info!(
            "Created slot ledger at {} ({records} records, {len} bytes)",
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            map,
            records,
            owner: true,
        })
    }

    /// Map an existing region created by the coordinating process.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Attach`] if the region is missing or cannot be
    /// mapped, and [`ErrorKind::RegionSizeMismatch`] if it was created for a
    /// different number of destinations. Either way the calling worker
    /// cannot take part in admission control.
    pub fn attach(path: &Path, records: usize) -> Result<Self> {
        let attach = |source: io::Error| ErrorKind::Attach {
            path: path.to_path_buf(),
            source,
        };
        let len = region_len(records).map_err(attach)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(attach)?;

        let actual = file.metadata().map_err(attach)?.len();
        if actual != len as u64 {
            return Err(ErrorKind::RegionSizeMismatch {
                path: path.to_path_buf(),
                expected: len,
                actual: usize::try_from(actual).unwrap_or(usize::MAX),
            });
        }

        let map = map_region(&file, len).map_err(attach)?;
        log::info!("Attached to slot ledger at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            map,
            records,
            owner: false,
        })
    }

    /// The shared record of a destination, or `None` if `id` is out of range.
    ///
    /// The ledger does not synchronize access itself: hold the ledger lock
    /// around every read-modify-write.
    #[must_use]
    pub fn record_at(&self, id: DestinationId) -> Option<&SharedRecord> {
        if id.index() >= self.records {
            return None;
        }

        let base = self.map.as_mut_ptr().cast::<SharedRecord>();
        // SAFETY:
        // The mapping is page-aligned and exactly `records * RECORD_LEN` bytes
        // long (checked on create and attach), so `base + index` is in bounds
        // and aligned for `SharedRecord`. Its fields are atomics, which makes
        // a shared reference sound even while other processes write to the
        // same memory.
        Some(unsafe { &*base.add(id.index()) })
    }

    /// Number of records in the region
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records
    }

    /// Returns `true` if the region holds no records
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Backing file of the region
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if this handle created the region
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        self.owner
    }

    /// Unmap the region and remove its backing file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from removing the backing file.
    pub fn destroy(mut self) -> io::Result<()> {
        self.owner = false;
        fs::remove_file(&self.path)
    }
}

impl Drop for SlotLedger {
    fn drop(&mut self) {
        if self.owner {
            match fs::remove_file(&self.path) {
                Ok(()) => log::debug!("Removed slot ledger at {}", self.path.display()),
                Err(e) => log::error!(
                    "Failed to remove slot ledger at {}: {e}",
                    self.path.display()
                ),
            }
        }
    }
}

impl fmt::Debug for SlotLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLedger")
            .field("path", &self.path)
            .field("records", &self.records)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

fn region_len(records: usize) -> io::Result<usize> {
    if records == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no destinations registered",
        ));
    }
    records
        .checked_mul(RECORD_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "region too large"))
}

/// Map the region as raw shared memory.
///
/// The file is shared with other worker processes on purpose. They only
/// touch it through the atomics in `SharedRecord`, and nobody truncates it
/// while mapped: its size is fixed at creation.
fn map_region(file: &File, len: usize) -> io::Result<MmapRaw> {
    MmapOptions::new().len(len).map_raw(file)
}
