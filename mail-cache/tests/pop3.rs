use std::fs::{self, OpenOptions};
use std::io::Write;

use mail_cache::{BackingKind, CacheManager, CacheRecord, Error, Pop3CacheManager, RecordId};
use tempfile::tempdir;

fn pop3_record(uid: &str, date: u64) -> CacheRecord {
    CacheRecord::new(RecordId::Pop3(uid.to_owned()))
        .with_date(date)
        .with_size(1024)
        .with_subject(format!("message {uid}"))
        .with_message_id(format!("<{uid}@localhost>"))
}

#[test_log::test]
fn open_creates_empty_cache_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("pop3").join("inbox.pop3.cache");

    let cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 0);
    assert_eq!(cache.path(), path.as_path());
    assert_eq!(fs::metadata(&path).unwrap().len(), 21);

    let cache = CacheManager::open(&path, BackingKind::Pop3).unwrap();
    assert!(cache.is_empty());
}

#[test_log::test]
fn write_record_appends_to_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();
    cache.write_record(pop3_record("uid-2", 200)).unwrap();

    assert_eq!(cache.count(), 2);
    assert_eq!(cache.date_for_uid("uid-1"), Some(100));
    assert_eq!(cache.date_for_uid("uid-2"), Some(200));
    assert_eq!(cache.date_for_uid("uid-3"), None);
    assert_eq!(cache.get("uid-2").map(|r| r.size), Some(1024));

    // records are persisted without any synchronization
    let appended = fs::read(&path).unwrap();
    drop(cache);

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 2);
    assert_eq!(cache.date_for_uid("uid-2"), Some(200));
    assert_eq!(cache.records()[0], pop3_record("uid-1", 100));

    // appending gives the same bytes as a full rewrite
    cache.synchronize().unwrap();
    assert_eq!(fs::read(&path).unwrap(), appended);
}

#[test_log::test]
fn write_record_rejects_duplicates_and_invalid_records() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();
    let len = fs::metadata(&path).unwrap().len();

    let err = cache.write_record(pop3_record("uid-1", 300)).unwrap_err();
    assert!(matches!(err, Error::DuplicateUidError(ref uid) if uid == "uid-1"), "{err:?}");

    let err = cache.write_record(pop3_record("", 300)).unwrap_err();
    assert!(matches!(err, Error::InvalidRecordIdError(_)), "{err:?}");

    let err = cache
        .write_record(CacheRecord::new(RecordId::Imap(1)))
        .unwrap_err();
    assert!(
        matches!(err, Error::MismatchedRecordKindError(BackingKind::Pop3, _)),
        "{err:?}"
    );

    assert_eq!(cache.count(), 1);
    assert_eq!(cache.date_for_uid("uid-1"), Some(100));
    assert_eq!(fs::metadata(&path).unwrap().len(), len);
}

#[test_log::test]
fn invalidate_resets_index_and_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();
    cache.write_record(pop3_record("uid-2", 200)).unwrap();

    cache.invalidate().unwrap();
    assert_eq!(cache.count(), 0);
    assert!(cache.records().is_empty());
    assert_eq!(cache.date_for_uid("uid-1"), None);
    assert!(!cache.contains_uid("uid-2"));
    assert_eq!(fs::metadata(&path).unwrap().len(), 21);

    cache.write_record(pop3_record("uid-3", 300)).unwrap();
    drop(cache);

    let cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 1);
    assert_eq!(cache.date_for_uid("uid-3"), Some(300));
}

#[test_log::test]
fn removed_uids_are_compacted_by_synchronize() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    for (i, uid) in ["uid-1", "uid-2", "uid-3"].into_iter().enumerate() {
        cache.write_record(pop3_record(uid, i as u64)).unwrap();
    }

    let removed = cache.remove_uid("uid-2").unwrap();
    assert_eq!(removed.id, RecordId::Pop3("uid-2".into()));
    assert_eq!(cache.remove_uid("uid-2"), None);
    assert_eq!(cache.count(), 2);

    cache.synchronize().unwrap();
    cache.write_record(pop3_record("uid-4", 4)).unwrap();
    drop(cache);

    let cache = Pop3CacheManager::open(&path).unwrap();
    let uids: Vec<_> = cache
        .records()
        .iter()
        .filter_map(|record| record.id.as_pop3_uid())
        .collect();
    assert_eq!(uids, vec!["uid-1", "uid-3", "uid-4"]);
    assert_eq!(cache.count(), 3);
}

#[test_log::test]
fn replace_records_rebuilds_index() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();

    let mut records = cache.take_records();
    assert_eq!(cache.count(), 0);
    assert_eq!(cache.date_for_uid("uid-1"), None);

    records.push(pop3_record("uid-2", 200));
    records.push(pop3_record("uid-2", 250));
    records.push(pop3_record("", 300));
    cache.replace_records(records);

    assert_eq!(cache.count(), 2);
    assert_eq!(cache.records().len(), 2);
    assert_eq!(cache.date_for_uid("uid-1"), Some(100));
    assert_eq!(cache.date_for_uid("uid-2"), Some(200));

    cache.synchronize().unwrap();
    drop(cache);

    let cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 2);
}

#[test_log::test]
fn interrupted_append_is_overwritten() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();
    drop(cache);

    // a record written without its count update
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x03, 0x00, 0x00]).unwrap();
    drop(file);

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 1);

    cache.write_record(pop3_record("uid-2", 200)).unwrap();
    drop(cache);

    let cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 2);
    assert_eq!(cache.date_for_uid("uid-2"), Some(200));
}

#[test_log::test]
fn corrupted_cache_is_replaced() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");
    fs::write(&path, b"garbage garbage garbage garbage").unwrap();

    let err = Pop3CacheManager::open(&path).unwrap_err();
    assert!(err.is_unreadable(), "{err:?}");

    let mut cache = Pop3CacheManager::open_or_empty(&path).unwrap();
    assert_eq!(cache.count(), 0);
    assert_eq!(fs::metadata(&path).unwrap().len(), 21);

    cache.write_record(pop3_record("uid-1", 100)).unwrap();
    drop(cache);

    let cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 1);
}

#[test_log::test]
fn set_path_moves_append_target() {
    let tmp = tempdir().unwrap();
    let old_path = tmp.path().join("old.pop3.cache");
    let new_path = tmp.path().join("new.pop3.cache");

    let mut cache = Pop3CacheManager::open(&old_path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();

    cache.set_path(&new_path);
    cache.write_record(pop3_record("uid-2", 200)).unwrap();
    drop(cache);

    assert_eq!(Pop3CacheManager::open(&old_path).unwrap().count(), 1);
    assert_eq!(Pop3CacheManager::open(&new_path).unwrap().count(), 2);
}

#[test_log::test]
fn clear_persisted_empties_cache() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();
    cache.clear_persisted().unwrap();
    assert_eq!(cache.count(), 0);

    cache.write_record(pop3_record("uid-2", 200)).unwrap();
    drop(cache);

    let cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 1);
    assert!(cache.contains_uid("uid-2"));
    assert!(!cache.contains_uid("uid-1"));
}

#[test_log::test]
fn rewritten_uid_survives_reopening() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 1)).unwrap();
    cache.write_record(pop3_record("uid-2", 2)).unwrap();
    cache.remove_uid("uid-1").unwrap();
    cache.write_record(pop3_record("uid-1", 3)).unwrap();
    assert_eq!(cache.date_for_uid("uid-1"), Some(3));
    drop(cache);

    let cache = Pop3CacheManager::open(&path).unwrap();
    assert_eq!(cache.count(), 2);
    assert_eq!(cache.records().len(), 2);
    assert_eq!(cache.date_for_uid("uid-1"), Some(3));
    assert_eq!(cache.get("uid-1").map(|r| r.date), Some(3));
    assert_eq!(cache.date_for_uid("uid-2"), Some(2));
}

#[test_log::test]
fn failed_write_record_leaves_index_untouched() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("inbox.pop3.cache");
    // a regular file where the cache directory should be
    let blocker = tmp.path().join("blocker");
    fs::write(&blocker, b"").unwrap();

    let mut cache = Pop3CacheManager::open(&path).unwrap();
    cache.write_record(pop3_record("uid-1", 100)).unwrap();

    cache.set_path(blocker.join("inbox.pop3.cache"));
    let err = cache.write_record(pop3_record("uid-2", 200)).unwrap_err();
    assert!(err.is_unwritable(), "{err:?}");

    assert_eq!(cache.count(), 1);
    assert_eq!(cache.records().len(), 1);
    assert_eq!(cache.date_for_uid("uid-2"), None);
    assert!(!cache.contains_uid("uid-2"));
    assert_eq!(cache.date_for_uid("uid-1"), Some(100));

    // an empty cache fails the same way when acquiring its target
    cache.invalidate().ok();
    let err = cache.write_record(pop3_record("uid-3", 300)).unwrap_err();
    assert!(err.is_unwritable(), "{err:?}");
    assert_eq!(cache.count(), 0);
    assert_eq!(cache.date_for_uid("uid-3"), None);

    // the previous file still holds the first record
    assert_eq!(Pop3CacheManager::open(&path).unwrap().count(), 1);
}
