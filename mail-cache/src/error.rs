use std::{io, path::PathBuf, result};

use thiserror::Error;

use crate::record::{BackingKind, RecordId};

/// The global `Result` alias of the library.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse unknown flag {0}")]
    ParseFlagError(String),
    #[error("cannot parse unknown maildir flag {0}")]
    ParseMaildirFlagError(char),

    #[error("cannot read cache file at {1}")]
    ReadCacheError(#[source] io::Error, PathBuf),
    #[error("cannot decode cache file at {1}")]
    DecodeCacheError(#[source] bincode::Error, PathBuf),
    #[error("cannot decode cache file at {0}: invalid magic marker")]
    InvalidMagicError(PathBuf),
    #[error("cannot decode cache file at {1}: unsupported version {0}")]
    UnsupportedVersionError(u32, PathBuf),
    #[error("cannot decode cache file at {2}: expected {0} cache, found {1} cache")]
    MismatchedKindError(BackingKind, BackingKind, PathBuf),

    #[error("cannot create cache directory at {1}")]
    CreateCacheDirError(#[source] io::Error, PathBuf),
    #[error("cannot write temporary cache file at {1}")]
    WriteCacheError(#[source] io::Error, PathBuf),
    #[error("cannot encode cache for {1}")]
    EncodeCacheError(#[source] bincode::Error, PathBuf),
    #[error("cannot move temporary cache file to {1}")]
    PersistCacheError(#[source] io::Error, PathBuf),
    #[error("cannot open cache append target at {1}")]
    OpenAppendTargetError(#[source] io::Error, PathBuf),
    #[error("cannot append record to cache at {1}")]
    AppendRecordError(#[source] io::Error, PathBuf),

    #[error("cannot cache record: identifier {0} is not set")]
    InvalidRecordIdError(RecordId),
    #[error("cannot cache record {1} into a {0} cache")]
    MismatchedRecordKindError(BackingKind, RecordId),
    #[error("cannot cache record: pop3 uid {0} already cached")]
    DuplicateUidError(String),
}

impl Error {
    /// Return `true` if the error comes from a cache file that exists
    /// but cannot be loaded.
    ///
    /// Such a cache is unusable: the owner should discard it and
    /// rebuild it from the mail store.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            Self::ReadCacheError(..)
                | Self::DecodeCacheError(..)
                | Self::InvalidMagicError(..)
                | Self::UnsupportedVersionError(..)
                | Self::MismatchedKindError(..)
        )
    }

    /// Return `true` if the error comes from a failed write. The
    /// in-memory cache is left untouched in that case.
    pub fn is_unwritable(&self) -> bool {
        matches!(
            self,
            Self::CreateCacheDirError(..)
                | Self::WriteCacheError(..)
                | Self::EncodeCacheError(..)
                | Self::PersistCacheError(..)
                | Self::OpenAppendTargetError(..)
                | Self::AppendRecordError(..)
        )
    }
}
