//! Module dedicated to the cache file format.
//!
//! A cache file starts with a fixed-size header (magic marker,
//! format version, backing kind, record count) followed by `count`
//! records. Every record is encoded in a fixed field order, variable
//! length fields being prefixed by their length. Integers are little
//! endian and fixed size, so the record count can be rewritten in
//! place when records are appended.
//!
//! Bytes found after the last counted record are ignored: they can
//! only come from an append that did not reach the count update.

use std::{
    borrow::Cow,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Cursor, ErrorKind, Write},
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicUsize, Ordering},
};

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    flag::Flags,
    record::{BackingKind, CacheRecord, RecordId},
    Error, Result,
};

pub(crate) const MAGIC: [u8; 8] = *b"PMCACHE\0";
pub(crate) const VERSION: u32 = 1;

/// Size of the encoded [`Header`].
pub(crate) const HEADER_LEN: u64 = 21;

/// Offset of the record count inside the encoded [`Header`].
pub(crate) const COUNT_OFFSET: u64 = 13;

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
    kind: u8,
    count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
enum WireId<'a> {
    Mbox(u64),
    Maildir(Cow<'a, [u8]>),
    Imap(u32),
    Pop3(Cow<'a, str>),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRecord<'a> {
    id: WireId<'a>,
    date: u64,
    flags: u32,
    size: u64,
    from: Cow<'a, [u8]>,
    to: Cow<'a, [u8]>,
    cc: Cow<'a, [u8]>,
    subject: Cow<'a, [u8]>,
    message_id: Cow<'a, [u8]>,
    in_reply_to: Cow<'a, [u8]>,
    references: Cow<'a, [u8]>,
}

impl<'a> From<&'a CacheRecord> for WireRecord<'a> {
    fn from(record: &'a CacheRecord) -> Self {
        let id = match &record.id {
            RecordId::Mbox(position) => WireId::Mbox(*position),
            RecordId::Maildir(filename) => WireId::Maildir(Cow::Borrowed(filename)),
            RecordId::Imap(uid) => WireId::Imap(*uid),
            RecordId::Pop3(uid) => WireId::Pop3(Cow::Borrowed(uid)),
        };

        Self {
            id,
            date: record.date,
            flags: record.flags.bits(),
            size: record.size,
            from: Cow::Borrowed(&record.from),
            to: Cow::Borrowed(&record.to),
            cc: Cow::Borrowed(&record.cc),
            subject: Cow::Borrowed(&record.subject),
            message_id: Cow::Borrowed(&record.message_id),
            in_reply_to: Cow::Borrowed(&record.in_reply_to),
            references: Cow::Borrowed(&record.references),
        }
    }
}

impl From<WireRecord<'_>> for CacheRecord {
    fn from(wire: WireRecord<'_>) -> Self {
        let id = match wire.id {
            WireId::Mbox(position) => RecordId::Mbox(position),
            WireId::Maildir(filename) => RecordId::Maildir(filename.into_owned()),
            WireId::Imap(uid) => RecordId::Imap(uid),
            WireId::Pop3(uid) => RecordId::Pop3(uid.into_owned()),
        };

        Self {
            id,
            date: wire.date,
            flags: Flags::from_bits(wire.flags),
            size: wire.size,
            from: wire.from.into_owned(),
            to: wire.to.into_owned(),
            cc: wire.cc.into_owned(),
            subject: wire.subject.into_owned(),
            message_id: wire.message_id.into_owned(),
            in_reply_to: wire.in_reply_to.into_owned(),
            references: wire.references.into_owned(),
        }
    }
}

/// Read the cache file at the given path.
///
/// Returns `None` when there is no file at that path.
pub(crate) fn read(path: &Path, kind: BackingKind) -> Result<Option<Vec<CacheRecord>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(?path, "no cache file found");
            return Ok(None);
        }
        Err(err) => return Err(Error::ReadCacheError(err, path.to_owned())),
    };

    decode(&bytes, kind, path).map(Some)
}

pub(crate) fn decode(bytes: &[u8], kind: BackingKind, path: &Path) -> Result<Vec<CacheRecord>> {
    let limit = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes);

    let header: Header = options()
        .with_limit(limit)
        .deserialize_from(&mut cursor)
        .map_err(|err| Error::DecodeCacheError(err, path.to_owned()))?;

    if header.magic != MAGIC {
        return Err(Error::InvalidMagicError(path.to_owned()));
    }

    if header.version != VERSION {
        return Err(Error::UnsupportedVersionError(
            header.version,
            path.to_owned(),
        ));
    }

    match BackingKind::from_byte(header.kind) {
        Some(found) if found == kind => (),
        Some(found) => return Err(Error::MismatchedKindError(kind, found, path.to_owned())),
        None => return Err(Error::InvalidMagicError(path.to_owned())),
    }

    trace!(count = header.count, "decoded cache header");

    // a record takes at least 4 bytes, this bounds the allocation on
    // corrupted counts
    let capacity = header.count.min(limit / 4) as usize;
    let mut records = Vec::with_capacity(capacity);

    for _ in 0..header.count {
        let wire: WireRecord = options()
            .with_limit(limit)
            .deserialize_from(&mut cursor)
            .map_err(|err| Error::DecodeCacheError(err, path.to_owned()))?;
        records.push(CacheRecord::from(wire));
    }

    let trailing = limit - cursor.position();
    if trailing > 0 {
        debug!(?path, trailing, "ignoring trailing bytes after last record");
    }

    Ok(records)
}

pub(crate) fn write_header(
    writer: impl Write,
    kind: BackingKind,
    count: u64,
    path: &Path,
) -> Result<()> {
    let header = Header {
        magic: MAGIC,
        version: VERSION,
        kind: kind.to_byte(),
        count,
    };

    options()
        .serialize_into(writer, &header)
        .map_err(|err| Error::EncodeCacheError(err, path.to_owned()))
}

pub(crate) fn encode_count(count: u64, path: &Path) -> Result<Vec<u8>> {
    options()
        .serialize(&count)
        .map_err(|err| Error::EncodeCacheError(err, path.to_owned()))
}

/// Return the size of the encoded records, without encoding them.
pub(crate) fn encoded_len(records: &[CacheRecord], path: &Path) -> Result<u64> {
    records.iter().try_fold(0, |len, record| {
        let record_len = options()
            .serialized_size(&WireRecord::from(record))
            .map_err(|err| Error::EncodeCacheError(err, path.to_owned()))?;
        Ok(len + record_len)
    })
}

pub(crate) fn encode_record(record: &CacheRecord, path: &Path) -> Result<Vec<u8>> {
    options()
        .serialize(&WireRecord::from(record))
        .map_err(|err| Error::EncodeCacheError(err, path.to_owned()))
}

/// Write the given records to the given path, replacing any
/// previous cache file.
///
/// Records are first written to a temporary file of the same
/// directory, then the temporary file is renamed over the target. A
/// crash in the middle leaves the previous cache file intact.
pub(crate) fn write_atomically(
    path: &Path,
    kind: BackingKind,
    records: &[CacheRecord],
) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
        _ => PathBuf::from("."),
    };

    fs::create_dir_all(&dir).map_err(|err| Error::CreateCacheDirError(err, dir.clone()))?;

    let (file, tmp_path) = create_tmp_file(&dir, path)?;

    /// Removes the temporary file when leaving the scope before it
    /// has been renamed to its final location.
    struct UnlinkOnError {
        path_to_unlink: Option<PathBuf>,
    }

    impl Drop for UnlinkOnError {
        fn drop(&mut self) {
            if let Some(path) = self.path_to_unlink.take() {
                fs::remove_file(path).ok();
            }
        }
    }

    let mut unlink_guard = UnlinkOnError {
        path_to_unlink: Some(tmp_path.clone()),
    };

    let mut writer = BufWriter::new(file);

    write_header(&mut writer, kind, records.len() as u64, path)?;

    for record in records {
        options()
            .serialize_into(&mut writer, &WireRecord::from(record))
            .map_err(|err| Error::EncodeCacheError(err, path.to_owned()))?;
    }

    let file = writer
        .into_inner()
        .map_err(|err| Error::WriteCacheError(err.into_error(), tmp_path.clone()))?;
    file.sync_all()
        .map_err(|err| Error::WriteCacheError(err, tmp_path.clone()))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|err| Error::PersistCacheError(err, path.to_owned()))?;
    unlink_guard.path_to_unlink.take();

    debug!(?path, count = records.len(), "cache written");
    Ok(())
}

fn create_tmp_file(dir: &Path, path: &Path) -> Result<(File, PathBuf)> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("cache"));
    let pid = process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::SeqCst);
        let tmp_path = dir.join(format!(".{name}.{pid}.{counter:x}.tmp"));

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((file, tmp_path)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(Error::WriteCacheError(err, tmp_path)),
        }
    }
}
