//! Module dedicated to configuration.

use std::path::PathBuf;

use crate::record::BackingKind;

/// The cache configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct CacheConfig {
    /// The directory containing cache files.
    ///
    /// Defaults to `$XDG_CACHE_HOME/mail-cache` on Linux, and to the
    /// equivalent cache directory on other systems.
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    pub fn find_default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("mail-cache"))
    }

    pub fn find_dir(&self) -> Option<PathBuf> {
        self.dir.clone().or_else(Self::find_default_dir)
    }

    /// Return the path of the cache file of the given mailbox.
    ///
    /// The folder name is percent-encoded, so nested folders and
    /// special characters map to a single file name.
    pub fn cache_path(&self, folder: &str, kind: BackingKind) -> Option<PathBuf> {
        let name = format!("{}.{kind}.cache", urlencoding::encode(folder));
        self.find_dir().map(|dir| dir.join(name))
    }
}

/// The threading configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct ThreadConfig {
    /// Gather root messages without References nor In-Reply-To
    /// headers by subject.
    ///
    /// Defaults to `true`.
    pub subject_gathering: Option<bool>,
}

impl ThreadConfig {
    pub fn is_subject_gathering_enabled(&self) -> bool {
        self.subject_gathering.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::record::BackingKind;

    use super::{CacheConfig, ThreadConfig};

    #[test]
    fn cache_path() {
        let config = CacheConfig {
            dir: Some(PathBuf::from("/tmp/cache")),
        };

        assert_eq!(
            config.cache_path("INBOX/Sent mail", BackingKind::Imap),
            Some(PathBuf::from("/tmp/cache/INBOX%2FSent%20mail.imap.cache"))
        );
    }

    #[test]
    fn subject_gathering_defaults_to_true() {
        assert!(ThreadConfig::default().is_subject_gathering_enabled());

        let config = ThreadConfig {
            subject_gathering: Some(false),
        };
        assert!(!config.is_subject_gathering_enabled());
    }
}
