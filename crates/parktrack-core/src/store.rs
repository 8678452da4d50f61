//! Durable storage of the last known tracker location.
//!
//! The store keeps a single record under a fixed account identifier, in the
//! manner of a platform keychain: records are added and deleted, never updated
//! in place. [`LocationStore::save`] therefore deletes any existing record and
//! inserts a new one.
//!
//! Two backends are provided:
//! - [`FileSecretBackend`] - one owner-only JSON file per account
//! - [`MemorySecretBackend`] - in-process map for tests and ephemeral runs

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::location::TrackerLocation;

/// Default account identifier for the tracker record.
pub const DEFAULT_ACCOUNT: &str = "TrackerLocation";

/// Whether `account` can be used as a record key.
///
/// Accepts ASCII alphanumerics, `-`, `_` and `.`, not starting with `.`.
#[must_use]
pub fn is_valid_account(account: &str) -> bool {
    !account.is_empty()
        && !account.starts_with('.')
        && account
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Errors raised by secret backends and the location store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record already exists for the account.
    #[error("a record for account '{account}' already exists")]
    Duplicate {
        /// Account identifier.
        account: String,
    },

    /// The account identifier cannot be used as a record key.
    #[error("invalid account identifier '{0}'")]
    InvalidAccount(String),

    /// Reading a record failed.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// Record path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a record failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Record path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Deleting a record failed.
    #[error("failed to delete {}: {source}", path.display())]
    DeleteError {
        /// Record path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Creating the storage directory failed.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirError {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Encoding the location failed.
    #[error("failed to encode location: {0}")]
    EncodeError(#[from] serde_json::Error),

    /// A background persistence task could not run to completion.
    #[error("persistence worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A keychain-like record store keyed by account.
///
/// Implementations must be callable from any thread; the store is driven from
/// a background worker, never from the hardware-event context.
pub trait SecretBackend: Send + Sync {
    /// Insert a record. Fails with [`StoreError::Duplicate`] if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists or cannot be written.
    fn add(&self, account: &str, data: &[u8]) -> StoreResult<()>;

    /// Fetch the record for `account`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn copy_matching(&self, account: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Remove the record for `account`. Returns whether one was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    fn delete(&self, account: &str) -> StoreResult<bool>;
}

/// File-backed secret store: `<dir>/<account>.json`, mode 0600 on Unix.
#[derive(Debug, Clone)]
pub struct FileSecretBackend {
    dir: PathBuf,
}

impl FileSecretBackend {
    /// Create a backend rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, account: &str) -> StoreResult<PathBuf> {
        if !is_valid_account(account) {
            return Err(StoreError::InvalidAccount(account.to_string()));
        }
        Ok(self.dir.join(format!("{account}.json")))
    }

    fn open_new(path: &Path) -> std::io::Result<fs::File> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(path)
    }
}

impl SecretBackend for FileSecretBackend {
    fn add(&self, account: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.record_path(account)?;
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::CreateDirError {
            path: self.dir.clone(),
            source,
        })?;

        let mut file = match Self::open_new(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Duplicate {
                    account: account.to_string(),
                })
            }
            Err(source) => return Err(StoreError::WriteError { path, source }),
        };

        file.write_all(data)
            .and_then(|()| file.sync_all())
            .map_err(|source| StoreError::WriteError {
                path: path.clone(),
                source,
            })
    }

    fn copy_matching(&self, account: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.record_path(account)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::ReadError { path, source }),
        }
    }

    fn delete(&self, account: &str) -> StoreResult<bool> {
        let path = self.record_path(account)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::DeleteError { path, source }),
        }
    }
}

/// In-memory secret store.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretBackend {
    records: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySecretBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the backend holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretBackend for MemorySecretBackend {
    fn add(&self, account: &str, data: &[u8]) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(account) {
            return Err(StoreError::Duplicate {
                account: account.to_string(),
            });
        }
        records.insert(account.to_string(), data.to_vec());
        Ok(())
    }

    fn copy_matching(&self, account: &str) -> StoreResult<Option<Vec<u8>>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(account).cloned())
    }

    fn delete(&self, account: &str) -> StoreResult<bool> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(account).is_some())
    }
}

/// Persistence of the single last-known tracker location.
#[derive(Clone)]
pub struct LocationStore {
    backend: Arc<dyn SecretBackend>,
    account: String,
}

impl std::fmt::Debug for LocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationStore")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl LocationStore {
    /// Create a store over `backend` using `account` as the record key.
    pub fn new(backend: Arc<dyn SecretBackend>, account: impl Into<String>) -> Self {
        Self {
            backend,
            account: account.into(),
        }
    }

    /// Store backed by files in `dir`, using the default account.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileSecretBackend::new(dir)), DEFAULT_ACCOUNT)
    }

    /// Ephemeral in-memory store, using the default account.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySecretBackend::new()), DEFAULT_ACCOUNT)
    }

    /// Account identifier used as the record key.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Replace the stored location.
    ///
    /// Any existing record is deleted first; a failed delete is logged and the
    /// insert is attempted regardless.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be encoded or inserted.
    pub fn save(&self, location: &TrackerLocation) -> StoreResult<()> {
        if let Err(e) = self.backend.delete(&self.account) {
            warn!(account = %self.account, error = %e, "Failed to delete previous location record");
        }

        let data = serde_json::to_vec(location)?;
        self.backend.add(&self.account, &data)?;

        debug!(
            account = %self.account,
            latitude = location.latitude,
            longitude = location.longitude,
            "Saved tracker location"
        );
        Ok(())
    }

    /// Load the stored location.
    ///
    /// Returns `None` when no record exists or the record cannot be read or
    /// decoded.
    #[must_use]
    pub fn load(&self) -> Option<TrackerLocation> {
        let data = match self.backend.copy_matching(&self.account) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                warn!(account = %self.account, error = %e, "Failed to read location record");
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(location) => Some(location),
            Err(e) => {
                warn!(account = %self.account, error = %e, "Discarding undecodable location record");
                None
            }
        }
    }

    /// Remove the stored location. Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing record cannot be removed.
    pub fn erase(&self) -> StoreResult<bool> {
        let removed = self.backend.delete(&self.account)?;
        if removed {
            info!(account = %self.account, "Erased stored tracker location");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Coordinate;
    use chrono::{TimeZone, Utc};

    fn sample(lat: f64, lon: f64) -> TrackerLocation {
        TrackerLocation::from_beacon(
            Coordinate::new(lat, lon).unwrap(),
            12.5,
            Utc.with_ymd_and_hms(2025, 1, 15, 3, 30, 0).unwrap(),
        )
    }

    #[test]
    fn test_round_trip_preserves_all_fields() {
        let temp = tempfile::tempdir().unwrap();
        let store = LocationStore::in_dir(temp.path());
        let mut location = sample(50.123_456_7, -100.765_432_1);
        location.speed = Some(1.25);
        location.course = Some(270.0);

        store.save(&location).unwrap();
        let loaded = store.load().unwrap();

        assert!((loaded.latitude - location.latitude).abs() < 1e-12);
        assert!((loaded.longitude - location.longitude).abs() < 1e-12);
        assert!((loaded.altitude - location.altitude).abs() < 1e-12);
        assert!((loaded.horizontal_accuracy - location.horizontal_accuracy).abs() < 1e-12);
        assert!((loaded.vertical_accuracy - location.vertical_accuracy).abs() < 1e-12);
        assert_eq!(loaded.speed, location.speed);
        assert_eq!(loaded.course, location.course);
        assert_eq!(loaded.timestamp, location.timestamp);
    }

    #[test]
    fn test_second_save_replaces_first() {
        let backend = MemorySecretBackend::new();
        let store = LocationStore::new(Arc::new(backend.clone()), DEFAULT_ACCOUNT);

        store.save(&sample(1.0, 2.0)).unwrap();
        store.save(&sample(3.0, 4.0)).unwrap();

        assert_eq!(backend.len(), 1);
        assert_eq!(store.load(), Some(sample(3.0, 4.0)));
    }

    #[test]
    fn test_file_backend_keeps_single_record() {
        let temp = tempfile::tempdir().unwrap();
        let store = LocationStore::in_dir(temp.path());

        store.save(&sample(1.0, 2.0)).unwrap();
        store.save(&sample(3.0, 4.0)).unwrap();

        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.load(), Some(sample(3.0, 4.0)));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_backend_record_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let store = LocationStore::in_dir(temp.path());
        store.save(&sample(1.0, 2.0)).unwrap();

        let path = temp.path().join(format!("{DEFAULT_ACCOUNT}.json"));
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_add_rejects_duplicate() {
        let backend = MemorySecretBackend::new();
        backend.add("a", b"1").unwrap();
        assert!(matches!(
            backend.add("a", b"2"),
            Err(StoreError::Duplicate { .. })
        ));

        let temp = tempfile::tempdir().unwrap();
        let files = FileSecretBackend::new(temp.path());
        files.add("a", b"1").unwrap();
        assert!(matches!(files.add("a", b"2"), Err(StoreError::Duplicate { .. })));
    }

    #[test]
    fn test_load_absent_and_corrupt_records() {
        let temp = tempfile::tempdir().unwrap();
        let store = LocationStore::in_dir(temp.path());
        assert_eq!(store.load(), None);

        fs::write(temp.path().join("TrackerLocation.json"), b"{not json").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_erase() {
        let store = LocationStore::in_memory();
        assert!(!store.erase().unwrap());
        store.save(&sample(1.0, 2.0)).unwrap();
        assert!(store.erase().unwrap());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_invalid_account_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let files = FileSecretBackend::new(temp.path());
        assert!(matches!(
            files.add("../escape", b"x"),
            Err(StoreError::InvalidAccount(_))
        ));
        assert!(matches!(
            files.copy_matching(""),
            Err(StoreError::InvalidAccount(_))
        ));
    }

    /// Backend whose delete always fails, to check save still inserts.
    struct FailingDelete(MemorySecretBackend);

    impl SecretBackend for FailingDelete {
        fn add(&self, account: &str, data: &[u8]) -> StoreResult<()> {
            self.0.add(account, data)
        }
        fn copy_matching(&self, account: &str) -> StoreResult<Option<Vec<u8>>> {
            self.0.copy_matching(account)
        }
        fn delete(&self, _account: &str) -> StoreResult<bool> {
            Err(StoreError::WorkerUnavailable("delete disabled".into()))
        }
    }

    #[test]
    fn test_failed_delete_does_not_block_insert() {
        let inner = MemorySecretBackend::new();
        let store = LocationStore::new(Arc::new(FailingDelete(inner.clone())), DEFAULT_ACCOUNT);

        store.save(&sample(1.0, 2.0)).unwrap();
        assert_eq!(inner.len(), 1);

        // The stale record is still there, so the insert now reports a duplicate.
        assert!(matches!(
            store.save(&sample(3.0, 4.0)),
            Err(StoreError::Duplicate { .. })
        ));
    }
}
