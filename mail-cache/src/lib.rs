//! Rust library to cache email metadata per mailbox and to thread
//! messages into conversations.
//!
//! The [`CacheManager`] keeps the metadata of the messages of one
//! mailbox (flags, date, size and the headers needed for listing and
//! threading) and persists them to a single cache file, whatever the
//! backing format of the mailbox (mbox, maildir, IMAP or POP3). The
//! [`Pop3CacheManager`] indexes records by UID and appends newly
//! fetched records to the cache file without rewriting it.
//!
//! The [`thread`] function builds conversation trees out of a flat
//! list of messages, using the JWZ algorithm.
//!
//! ```rust,no_run
//! use mail_cache::{BackingKind, CacheManager, CacheRecord, RecordId};
//!
//! # fn main() -> mail_cache::Result<()> {
//! let mut cache = CacheManager::open_or_empty("/tmp/inbox.imap.cache", BackingKind::Imap);
//!
//! let record = CacheRecord::new(RecordId::Imap(42))
//!     .with_date(1_700_000_000)
//!     .with_subject("Trip")
//!     .with_message_id("<trip@localhost>");
//! cache.upsert(record)?;
//! cache.synchronize()?;
//!
//! let forest = mail_cache::thread(cache.records());
//! assert_eq!(forest.len(), 1);
//! # Ok(())
//! # }
//! ```

mod codec;
pub mod config;
mod error;
pub mod flag;
pub mod manager;
pub mod pop3;
pub mod record;
pub mod thread;

#[doc(inline)]
pub use self::{
    config::{CacheConfig, ThreadConfig},
    error::{Error, Result},
    flag::{Flag, Flags},
    manager::CacheManager,
    pop3::Pop3CacheManager,
    record::{BackingKind, CacheRecord, RecordId},
    thread::{thread, thread_with_config, Forest, ThreadAnomaly, ThreadNode, Threadable},
};
