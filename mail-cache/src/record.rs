//! Module dedicated to cache records.
//!
//! A [`CacheRecord`] holds the metadata of one message: its
//! identifier inside the backing store, its date, flags and size,
//! plus the raw header values needed to list and thread messages
//! without fetching them again.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::flag::Flags;

/// The physical storage scheme of a mailbox.
///
/// The backing kind decides which [`RecordId`] variant identifies
/// the records of a cache.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BackingKind {
    Mbox,
    Maildir,
    Imap,
    Pop3,
}

impl BackingKind {
    /// Return the identifier of this kind with all its fields unset.
    pub fn empty_id(&self) -> RecordId {
        match self {
            Self::Mbox => RecordId::Mbox(0),
            Self::Maildir => RecordId::Maildir(Vec::new()),
            Self::Imap => RecordId::Imap(0),
            Self::Pop3 => RecordId::Pop3(String::new()),
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Mbox => 0,
            Self::Maildir => 1,
            Self::Imap => 2,
            Self::Pop3 => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Mbox),
            1 => Some(Self::Maildir),
            2 => Some(Self::Imap),
            3 => Some(Self::Pop3),
            _ => None,
        }
    }
}

impl fmt::Display for BackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mbox => write!(f, "mbox"),
            Self::Maildir => write!(f, "maildir"),
            Self::Imap => write!(f, "imap"),
            Self::Pop3 => write!(f, "pop3"),
        }
    }
}

/// The identifier of a cached message inside its backing store.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum RecordId {
    /// Byte offset of the message inside the mbox file.
    Mbox(u64),
    /// File name of the message inside the maildir.
    Maildir(Vec<u8>),
    /// IMAP UID of the message.
    Imap(u32),
    /// Server-assigned POP3 UID (UIDL) of the message.
    Pop3(String),
}

impl RecordId {
    pub fn kind(&self) -> BackingKind {
        match self {
            Self::Mbox(_) => BackingKind::Mbox,
            Self::Maildir(_) => BackingKind::Maildir,
            Self::Imap(_) => BackingKind::Imap,
            Self::Pop3(_) => BackingKind::Pop3,
        }
    }

    /// Return `true` if the identifier addresses a message.
    ///
    /// An mbox offset is always set, since the first message of an
    /// mbox starts at offset 0. IMAP UIDs are strictly positive.
    pub fn is_set(&self) -> bool {
        match self {
            Self::Mbox(_) => true,
            Self::Maildir(filename) => !filename.is_empty(),
            Self::Imap(uid) => *uid != 0,
            Self::Pop3(uid) => !uid.is_empty(),
        }
    }

    pub fn as_pop3_uid(&self) -> Option<&str> {
        match self {
            Self::Pop3(uid) => Some(uid),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mbox(position) => write!(f, "mbox:{position}"),
            Self::Maildir(filename) => write!(f, "maildir:{}", String::from_utf8_lossy(filename)),
            Self::Imap(uid) => write!(f, "imap:{uid}"),
            Self::Pop3(uid) => write!(f, "pop3:{uid}"),
        }
    }
}

/// The cached metadata of one message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheRecord {
    pub id: RecordId,
    /// Seconds since the Unix epoch, 0 when unknown.
    pub date: u64,
    pub flags: Flags,
    /// Size of the message in bytes.
    pub size: u64,
    pub from: Vec<u8>,
    pub to: Vec<u8>,
    pub cc: Vec<u8>,
    pub subject: Vec<u8>,
    pub message_id: Vec<u8>,
    pub in_reply_to: Vec<u8>,
    pub references: Vec<u8>,
}

impl CacheRecord {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            date: 0,
            flags: Flags::default(),
            size: 0,
            from: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            subject: Vec::new(),
            message_id: Vec::new(),
            in_reply_to: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Reset every field to its zero value, so the record can be
    /// reused for the next message of the same mailbox.
    ///
    /// The identifier keeps its backing kind but loses its value.
    pub fn clear(&mut self) {
        self.id = self.id.kind().empty_id();
        self.date = 0;
        self.flags.clear();
        self.size = 0;
        self.from.clear();
        self.to.clear();
        self.cc.clear();
        self.subject.clear();
        self.message_id.clear();
        self.in_reply_to.clear();
        self.references.clear();
    }

    /// Return the date as a UTC datetime, if set.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        if self.date == 0 {
            return None;
        }

        i64::try_from(self.date)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    pub fn with_date(mut self, date: u64) -> Self {
        self.date = date;
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_from(mut self, from: impl Into<Vec<u8>>) -> Self {
        self.from = from.into();
        self
    }

    pub fn with_to(mut self, to: impl Into<Vec<u8>>) -> Self {
        self.to = to.into();
        self
    }

    pub fn with_cc(mut self, cc: impl Into<Vec<u8>>) -> Self {
        self.cc = cc.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<Vec<u8>>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<Vec<u8>>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: impl Into<Vec<u8>>) -> Self {
        self.in_reply_to = in_reply_to.into();
        self
    }

    pub fn with_references(mut self, references: impl Into<Vec<u8>>) -> Self {
        self.references = references.into();
        self
    }
}
