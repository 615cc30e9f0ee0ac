//! Module dedicated to the generic cache manager.
//!
//! The [`CacheManager`] owns the cached records of one mailbox and
//! the path of the file they are persisted to. It is shared by every
//! backing format: the [`BackingKind`] given at opening time decides
//! which [`RecordId`] variant is accepted.
//!
//! In-memory records and the cache file diverge between two calls to
//! [`CacheManager::synchronize`]: callers batch their mutations and
//! synchronize when they need durability.

use std::{
    mem,
    path::{Path, PathBuf},
    slice,
};

use tracing::{debug, instrument, warn};

use crate::{
    codec,
    flag::Flags,
    record::{BackingKind, CacheRecord, RecordId},
    Error, Result,
};

/// The cache manager of a mailbox.
#[derive(Clone, Debug)]
pub struct CacheManager {
    path: PathBuf,
    kind: BackingKind,
    records: Vec<CacheRecord>,
}

impl CacheManager {
    /// Open the cache of the given backing kind located at the given
    /// path.
    ///
    /// A missing file gives an empty cache. A file that exists but
    /// cannot be decoded gives an error: see
    /// [`CacheManager::open_or_empty`] for the usual fallback.
    #[instrument(skip_all, fields(%kind))]
    pub fn open(path: impl AsRef<Path>, kind: BackingKind) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let records = codec::read(&path, kind)?.unwrap_or_default();
        debug!(?path, count = records.len(), "cache opened");

        Ok(Self {
            path,
            kind,
            records,
        })
    }

    /// Open the cache at the given path, falling back to an empty
    /// cache bound to the same path when the file cannot be read.
    ///
    /// A corrupted cache must not make the mailbox unusable: the
    /// next synchronization replaces the corrupted file.
    pub fn open_or_empty(path: impl AsRef<Path>, kind: BackingKind) -> Self {
        let path = path.as_ref();

        match Self::open(path, kind) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(?path, "cannot open cache, starting from an empty one: {err}");
                debug!("{err:?}");
                Self::new(path, kind)
            }
        }
    }

    /// Create an empty cache bound to the given path, without
    /// reading it.
    pub fn new(path: impl Into<PathBuf>, kind: BackingKind) -> Self {
        Self {
            path: path.into(),
            kind,
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Change the path the next synchronization writes to.
    ///
    /// The previous cache file is neither moved nor deleted, and the
    /// records are not reloaded.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn kind(&self) -> BackingKind {
        self.kind
    }

    /// Drop all in-memory records. The cache file is not touched.
    pub fn invalidate(&mut self) {
        debug!(path = ?self.path, count = self.records.len(), "invalidating cache");
        self.records.clear();
    }

    /// Persist all records to the cache file.
    ///
    /// An empty cache is not written, and the existing file is left
    /// as it is. Use [`CacheManager::clear_persisted`] to erase the
    /// persisted cache.
    ///
    /// On error, in-memory records are left untouched.
    #[instrument(skip_all, fields(path = ?self.path))]
    pub fn synchronize(&self) -> Result<()> {
        if self.records.is_empty() {
            debug!("empty cache, skipping synchronization");
            return Ok(());
        }

        for record in &self.records {
            self.validate(record)?;
        }

        codec::write_atomically(&self.path, self.kind, &self.records)
    }

    /// Drop all in-memory records and replace the cache file with an
    /// empty cache.
    #[instrument(skip_all, fields(path = ?self.path))]
    pub fn clear_persisted(&mut self) -> Result<()> {
        codec::write_atomically(&self.path, self.kind, &[])?;
        self.records.clear();
        Ok(())
    }

    /// Return the number of records held in memory.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CacheRecord] {
        &self.records
    }

    pub fn iter(&self) -> slice::Iter<'_, CacheRecord> {
        self.records.iter()
    }

    /// Move all records out of the cache, leaving it empty.
    pub fn take_records(&mut self) -> Vec<CacheRecord> {
        mem::take(&mut self.records)
    }

    /// Discard all records, then append the given ones in order.
    pub fn replace_records(&mut self, records: impl IntoIterator<Item = CacheRecord>) {
        self.records.clear();
        self.records.extend(records);
    }

    pub fn get(&self, id: &RecordId) -> Option<&CacheRecord> {
        self.records.iter().find(|record| &record.id == id)
    }

    /// Insert the given record, or update the record having the same
    /// identifier.
    ///
    /// Returns `true` if the record has been inserted.
    pub fn upsert(&mut self, record: CacheRecord) -> Result<bool> {
        self.validate(&record)?;

        match self.position(&record.id) {
            Some(pos) => {
                self.records[pos] = record;
                Ok(false)
            }
            None => {
                self.records.push(record);
                Ok(true)
            }
        }
    }

    /// Remove the record matching the given identifier.
    pub fn remove(&mut self, id: &RecordId) -> Option<CacheRecord> {
        let pos = self.position(id)?;
        Some(self.records.remove(pos))
    }

    /// Replace the flags of the record matching the given identifier.
    ///
    /// Returns `false` if no record matches.
    pub fn set_flags(&mut self, id: &RecordId, flags: Flags) -> bool {
        match self.records.iter_mut().find(|record| &record.id == id) {
            Some(record) => {
                record.flags = flags;
                true
            }
            None => {
                debug!(%id, "cannot set flags of uncached record, skipping it");
                false
            }
        }
    }

    pub(crate) fn records_mut(&mut self) -> &mut Vec<CacheRecord> {
        &mut self.records
    }

    pub(crate) fn validate(&self, record: &CacheRecord) -> Result<()> {
        if record.id.kind() != self.kind {
            return Err(Error::MismatchedRecordKindError(
                self.kind,
                record.id.clone(),
            ));
        }

        if !record.id.is_set() {
            return Err(Error::InvalidRecordIdError(record.id.clone()));
        }

        Ok(())
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|record| &record.id == id)
    }
}

impl<'a> IntoIterator for &'a CacheManager {
    type Item = &'a CacheRecord;
    type IntoIter = slice::Iter<'a, CacheRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
