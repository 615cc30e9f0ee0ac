//! Module dedicated to cached message flags.
//!
//! Flags are kept as an ordered set in memory, and as a bitmask in
//! the cache file. Bit values are stable: changing them would
//! silently alter every cache written so far.

use std::{
    collections::BTreeSet,
    fmt,
    ops::{Deref, DerefMut},
    str::FromStr,
};

use tracing::debug;

use crate::{Error, Result};

/// The message flag.
///
/// The concept of flag is the same across backing formats, but
/// their wire representation varies: `\Answered` for IMAP, `R` for
/// Maildir, a status header for mbox.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum Flag {
    /// The message has been answered.
    Answered,

    /// The message is a draft and is therefore not complete.
    Draft,

    /// The message is bookmarked. The meaning is specific to the
    /// user: important, starred, to check etc.
    Flagged,

    /// The message arrived since the last session.
    Recent,

    /// The message has been opened.
    Seen,

    /// The message is marked for deletion.
    Deleted,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::Answered,
        Flag::Draft,
        Flag::Flagged,
        Flag::Recent,
        Flag::Seen,
        Flag::Deleted,
    ];

    /// Return the bit of the flag inside a flags bitmask.
    pub fn bit(&self) -> u32 {
        match self {
            Flag::Answered => 1,
            Flag::Draft => 2,
            Flag::Flagged => 4,
            Flag::Recent => 8,
            Flag::Seen => 16,
            Flag::Deleted => 32,
        }
    }

    /// Return the Maildir info letter of the flag, if any.
    pub fn maildir_char(&self) -> Option<char> {
        match self {
            Flag::Answered => Some('R'),
            Flag::Seen => Some('S'),
            Flag::Deleted => Some('T'),
            Flag::Draft => Some('D'),
            Flag::Flagged => Some('F'),
            Flag::Recent => None,
        }
    }
}

/// Parse a flag from a string. If the string does not match any of
/// the existing variant, it returns an error.
impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            seen if seen.eq_ignore_ascii_case("seen") => Ok(Flag::Seen),
            answered if answered.eq_ignore_ascii_case("answered") => Ok(Flag::Answered),
            replied if replied.eq_ignore_ascii_case("replied") => Ok(Flag::Answered),
            flagged if flagged.eq_ignore_ascii_case("flagged") => Ok(Flag::Flagged),
            recent if recent.eq_ignore_ascii_case("recent") => Ok(Flag::Recent),
            deleted if deleted.eq_ignore_ascii_case("deleted") => Ok(Flag::Deleted),
            trashed if trashed.eq_ignore_ascii_case("trashed") => Ok(Flag::Deleted),
            draft if draft.eq_ignore_ascii_case("draft") => Ok(Flag::Draft),
            unknown => Err(Error::ParseFlagError(unknown.to_string())),
        }
    }
}

impl TryFrom<char> for Flag {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        match c {
            'r' | 'R' => Ok(Flag::Answered),
            's' | 'S' => Ok(Flag::Seen),
            't' | 'T' => Ok(Flag::Deleted),
            'd' | 'D' => Ok(Flag::Draft),
            'f' | 'F' => Ok(Flag::Flagged),
            unknown => Err(Error::ParseMaildirFlagError(unknown)),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = match self {
            Flag::Answered => "answered",
            Flag::Draft => "draft",
            Flag::Flagged => "flagged",
            Flag::Recent => "recent",
            Flag::Seen => "seen",
            Flag::Deleted => "deleted",
        };
        write!(f, "{flag}")
    }
}

/// The set of message flags.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Flags(BTreeSet<Flag>);

impl Flags {
    /// Build flags from a bitmask. Unknown bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        Flag::ALL
            .into_iter()
            .filter(|flag| bits & flag.bit() != 0)
            .collect()
    }

    /// Return the bitmask of the flags.
    pub fn bits(&self) -> u32 {
        self.iter().fold(0, |bits, flag| bits | flag.bit())
    }

    /// Build flags from the info part of a Maildir file name
    /// (`S`, `RS`, `DFT`…). Unknown letters are skipped.
    pub fn from_maildir_info(info: &str) -> Self {
        info.chars()
            .filter_map(|c| match Flag::try_from(c) {
                Ok(flag) => Some(flag),
                Err(err) => {
                    debug!("skipping maildir flag: {err}");
                    None
                }
            })
            .collect()
    }

    /// Return the normalized Maildir info letters of the flags.
    pub fn to_maildir_info(&self) -> String {
        let mut letters: Vec<char> = self.iter().filter_map(Flag::maildir_char).collect();
        letters.sort();
        String::from_iter(letters)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, flag) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{flag}")?;
        }
        Ok(())
    }
}

impl Deref for Flags {
    type Target = BTreeSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromStr for Flags {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Flags(
            s.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|flag| !flag.is_empty())
                .map(|flag| flag.parse())
                .collect::<Result<_>>()?,
        ))
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{Flag, Flags};

    #[test]
    fn bits() {
        let flags = Flags::from_iter([Flag::Seen, Flag::Answered]);
        assert_eq!(flags.bits(), 17);
        assert_eq!(Flags::from_bits(17), flags);
        assert_eq!(Flags::from_bits(0), Flags::default());
        assert_eq!(Flags::from_bits(63).len(), 6);
        assert_eq!(Flags::from_bits(64 | 8), Flags::from_iter([Flag::Recent]));
    }

    #[test]
    fn maildir_info() {
        let flags = Flags::from_maildir_info("TSx");
        assert_eq!(flags, Flags::from_iter([Flag::Deleted, Flag::Seen]));

        let flags = Flags::from_iter([Flag::Seen, Flag::Recent, Flag::Answered, Flag::Draft]);
        assert_eq!(flags.to_maildir_info(), "DRS");
    }

    #[test]
    fn parse() {
        let flags: Flags = "seen, Replied trashed".parse().unwrap();
        assert_eq!(
            flags,
            Flags::from_iter([Flag::Seen, Flag::Answered, Flag::Deleted])
        );
        assert_eq!(flags.to_string(), "answered, seen, deleted");
        assert!("seen unknown".parse::<Flags>().is_err());
    }
}
