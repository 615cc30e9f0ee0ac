//! Module dedicated to the POP3 cache manager.
//!
//! POP3 servers identify messages with opaque UIDs (see the `UIDL`
//! command). On every session, the client lists the remote UIDs and
//! needs to know, for each of them, whether the message has already
//! been fetched. The [`Pop3CacheManager`] indexes cached records by
//! UID for that purpose, and appends newly fetched records to the
//! cache file one by one instead of rewriting it.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, instrument, warn};

use crate::{
    codec::{self, COUNT_OFFSET, HEADER_LEN},
    manager::CacheManager,
    record::{BackingKind, CacheRecord, RecordId},
    Error, Result,
};

/// The POP3 cache manager.
///
/// The UID index always matches the in-memory records. The append
/// target is owned by the manager and closed when it is dropped.
#[derive(Debug)]
pub struct Pop3CacheManager {
    cache: CacheManager,
    uids: HashMap<String, u64>,
    count: usize,
    log: Option<AppendLog>,
}

impl Pop3CacheManager {
    /// Open the POP3 cache located at the given path, then acquire
    /// the append target.
    ///
    /// The cache file is created if it does not exist.
    #[instrument(skip_all)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let cache = CacheManager::open(path, BackingKind::Pop3)?;
        Self::from_cache(cache)
    }

    /// Open the POP3 cache located at the given path, starting from
    /// an empty cache when the file cannot be read.
    ///
    /// The unreadable file is replaced by an empty cache file.
    pub fn open_or_empty(path: impl AsRef<Path>) -> Result<Self> {
        let cache = CacheManager::open_or_empty(path, BackingKind::Pop3);
        Self::from_cache(cache)
    }

    fn from_cache(mut cache: CacheManager) -> Result<Self> {
        let log = AppendLog::open(cache.path(), cache.records())?;

        let records = cache.take_records();
        let mut manager = Self {
            cache,
            uids: HashMap::new(),
            count: 0,
            log: Some(log),
        };
        manager.load(records);

        debug!(path = ?manager.path(), count = manager.count, "pop3 cache opened");
        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        self.cache.path()
    }

    /// Change the path of the cache.
    ///
    /// The append target is released. It is acquired again at the
    /// new path by the next write, after a full synchronization when
    /// the cache is not empty.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.cache.set_path(path);
        self.log = None;
    }

    /// Return the cached date of the message matching the given
    /// UID, or `None` if the message is not cached.
    pub fn date_for_uid(&self, uid: &str) -> Option<u64> {
        self.uids.get(uid).copied()
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.uids.contains_key(uid)
    }

    pub fn get(&self, uid: &str) -> Option<&CacheRecord> {
        if !self.contains_uid(uid) {
            return None;
        }

        self.cache.get(&RecordId::Pop3(uid.to_owned()))
    }

    /// Append the given record to the cache file, then add it to the
    /// in-memory cache.
    ///
    /// Only the record and the record count are written. When the
    /// write fails, the record is not added to the cache.
    #[instrument(skip_all, fields(id = %record.id))]
    pub fn write_record(&mut self, record: CacheRecord) -> Result<()> {
        self.cache.validate(&record)?;

        let uid = match record.id.as_pop3_uid() {
            Some(uid) => uid.to_owned(),
            None => return Err(Error::InvalidRecordIdError(record.id.clone())),
        };

        if self.uids.contains_key(&uid) {
            return Err(Error::DuplicateUidError(uid));
        }

        self.log()?.append(&record)?;

        self.uids.insert(uid, record.date);
        self.cache.records_mut().push(record);
        self.count += 1;

        Ok(())
    }

    /// Remove the record matching the given UID from memory.
    ///
    /// The removal is persisted by the next synchronization.
    pub fn remove_uid(&mut self, uid: &str) -> Option<CacheRecord> {
        self.uids.remove(uid)?;
        self.count -= 1;
        self.cache.remove(&RecordId::Pop3(uid.to_owned()))
    }

    /// Rewrite the whole cache file from the in-memory records, then
    /// acquire the append target of the new file.
    ///
    /// As for [`CacheManager::synchronize`], an empty cache is not
    /// written.
    pub fn synchronize(&mut self) -> Result<()> {
        if self.cache.is_empty() {
            debug!("empty pop3 cache, skipping synchronization");
            return Ok(());
        }

        self.cache.synchronize()?;
        self.reopen_log()
    }

    /// Drop all records and the UID index, and start a fresh append
    /// log.
    pub fn invalidate(&mut self) -> Result<()> {
        self.cache.invalidate();
        self.uids.clear();
        self.count = 0;

        let Some(log) = self.log.as_mut() else {
            return self.reopen_log();
        };

        if let Err(err) = log.reset() {
            self.log = None;
            return Err(err);
        }

        Ok(())
    }

    /// Drop all records and replace the cache file with an empty
    /// cache.
    pub fn clear_persisted(&mut self) -> Result<()> {
        self.cache.clear_persisted()?;
        self.uids.clear();
        self.count = 0;
        self.reopen_log()
    }

    /// Return the number of cached records.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn records(&self) -> &[CacheRecord] {
        self.cache.records()
    }

    /// Move all records out of the cache, leaving it empty.
    pub fn take_records(&mut self) -> Vec<CacheRecord> {
        self.uids.clear();
        self.count = 0;
        self.cache.take_records()
    }

    /// Discard all records, then add the given ones in order.
    ///
    /// Records that are not valid POP3 records, or whose UID is
    /// already present, are skipped.
    pub fn replace_records(&mut self, records: impl IntoIterator<Item = CacheRecord>) {
        self.cache.invalidate();
        self.uids.clear();
        self.count = 0;
        self.index(records);
    }

    /// Index the records read from the cache file.
    ///
    /// The file is an append log: a UID appended again after its
    /// removal replaces the entry appended before.
    fn load(&mut self, records: Vec<CacheRecord>) {
        for record in records {
            if let Err(err) = self.cache.validate(&record) {
                warn!("skipping invalid pop3 record: {err}");
                continue;
            }

            let Some(uid) = record.id.as_pop3_uid() else {
                continue;
            };

            if self.uids.contains_key(uid) {
                debug!(uid, "replacing previously appended pop3 record");
                self.cache.remove(&record.id);
                self.count -= 1;
            }

            self.uids.insert(uid.to_owned(), record.date);
            self.cache.records_mut().push(record);
            self.count += 1;
        }
    }

    fn index(&mut self, records: impl IntoIterator<Item = CacheRecord>) {
        for record in records {
            if let Err(err) = self.cache.validate(&record) {
                warn!("skipping invalid pop3 record: {err}");
                continue;
            }

            let Some(uid) = record.id.as_pop3_uid() else {
                continue;
            };

            if self.uids.contains_key(uid) {
                warn!(uid, "skipping duplicate pop3 record");
                continue;
            }

            self.uids.insert(uid.to_owned(), record.date);
            self.cache.records_mut().push(record);
            self.count += 1;
        }
    }

    fn log(&mut self) -> Result<&mut AppendLog> {
        if self.log.is_none() {
            if !self.cache.is_empty() {
                self.cache.synchronize()?;
            }
            self.reopen_log()?;
        }

        let path = self.path().to_owned();
        self.log
            .as_mut()
            .ok_or_else(|| Error::OpenAppendTargetError(io::ErrorKind::NotFound.into(), path))
    }

    fn reopen_log(&mut self) -> Result<()> {
        self.log = None;
        self.log = Some(AppendLog::open(self.cache.path(), self.cache.records())?);
        Ok(())
    }
}

/// The append target of a POP3 cache file.
#[derive(Debug)]
struct AppendLog {
    file: File,
    path: PathBuf,
    /// Number of records declared in the file header.
    count: u64,
    /// Offset right after the last counted record.
    end: u64,
}

impl AppendLog {
    /// Open the cache file at the given path for appending.
    ///
    /// The given records must be the ones persisted in the file. When
    /// there is none, the file is reset to an empty cache.
    fn open(path: &Path, records: &[CacheRecord]) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|err| Error::CreateCacheDirError(err, dir.to_owned()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| Error::OpenAppendTargetError(err, path.to_owned()))?;

        let mut log = Self {
            file,
            path: path.to_owned(),
            count: records.len() as u64,
            end: HEADER_LEN + codec::encoded_len(records, path)?,
        };

        if records.is_empty() {
            log.reset()?;
        }

        Ok(log)
    }

    /// Truncate the file down to an empty cache.
    fn reset(&mut self) -> Result<()> {
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        codec::write_header(&mut header, BackingKind::Pop3, 0, &self.path)?;

        self.file
            .set_len(0)
            .and_then(|()| self.write_at(0, &header))
            .and_then(|()| self.file.sync_data())
            .map_err(|err| Error::OpenAppendTargetError(err, self.path.clone()))?;

        self.count = 0;
        self.end = HEADER_LEN;
        debug!(path = ?self.path, "pop3 append log reset");
        Ok(())
    }

    fn append(&mut self, record: &CacheRecord) -> Result<()> {
        let bytes = codec::encode_record(record, &self.path)?;
        let count = codec::encode_count(self.count + 1, &self.path)?;

        let written = self
            .write_at(self.end, &bytes)
            .and_then(|()| self.write_at(COUNT_OFFSET, &count))
            .and_then(|()| self.file.sync_data());

        if let Err(err) = written {
            // best effort to leave the file as it was
            self.file.set_len(self.end).ok();
            if let Ok(count) = codec::encode_count(self.count, &self.path) {
                self.write_at(COUNT_OFFSET, &count).ok();
            }
            return Err(Error::AppendRecordError(err, self.path.clone()));
        }

        self.end += bytes.len() as u64;
        self.count += 1;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)
    }
}
