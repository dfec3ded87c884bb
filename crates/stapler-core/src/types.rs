//! Common types used throughout Stapler RS

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a host record.
///
/// Hosts use either integer keys or opaque string keys (UUIDs, slugs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    /// Whether the key should be treated as a number.
    ///
    /// String keys made only of ASCII digits count as numeric, so `"9"` and
    /// `9` partition the same way.
    pub fn is_numeric(&self) -> bool {
        match self {
            Self::Int(_) => true,
            Self::Str(s) => !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}
