//! Opaque identifiers for stored attachments
//!
//! Identifiers are random v4 UUIDs rendered in their canonical lowercase
//! hyphenated form. Parsing only accepts exactly that form, so anything that
//! reaches the registry or the filesystem is 36 characters of `[0-9a-f-]`.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of the canonical hyphenated form
const CANONICAL_LEN: usize = 36;

/// Identifier of a locally stored attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a fresh, non-sequential identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier received from an untrusted caller.
    ///
    /// Returns `None` for anything other than a canonical lowercase v4 UUID:
    /// braces, URNs, the simple (unhyphenated) form, uppercase and other UUID
    /// versions are all rejected without touching any state.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != CANONICAL_LEN {
            return None;
        }

        let valid_chars = raw
            .bytes()
            .enumerate()
            .all(|(i, b)| match i {
                8 | 13 | 18 | 23 => b == b'-',
                _ => b.is_ascii_digit() || (b'a'..=b'f').contains(&b),
            });
        if !valid_chars {
            return None;
        }

        let uuid = Uuid::parse_str(raw).ok()?;
        if uuid.get_version_num() != 4 {
            return None;
        }

        Some(Self(uuid))
    }
}

impl<'de> Deserialize<'de> for FileId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        FileId::parse(&raw).ok_or_else(|| de::Error::custom("invalid file identifier"))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
