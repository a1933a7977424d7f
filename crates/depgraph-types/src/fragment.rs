//! Sub-parts of tracked objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of a map-typed fragment.
///
/// Numeric and string keys compare by value. Any other key type is reduced to
/// a stable textual form via [`MapKey::textual`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKey {
    Uint(u64),
    Str(String),
}

impl MapKey {
    pub fn textual(key: impl fmt::Display) -> Self {
        MapKey::Str(key.to_string())
    }
}

impl From<u64> for MapKey {
    fn from(value: u64) -> Self {
        MapKey::Uint(value)
    }
}

impl From<&str> for MapKey {
    fn from(value: &str) -> Self {
        MapKey::Str(value.to_string())
    }
}

impl From<String> for MapKey {
    fn from(value: String) -> Self {
        MapKey::Str(value)
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Uint(k) => write!(f, "{}", k),
            MapKey::Str(k) => write!(f, "{:?}", k),
        }
    }
}

/// A named sub-part of a tracked object.
///
/// `Complete` stands for the whole object: a complete write supersedes every
/// per-fragment writer of the object, and a complete read observes all of them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    /// Field identified by its declaring type and name.
    Field { class: String, name: String },
    ArrayIndex { index: u64 },
    MapIndex { key: MapKey },
    Complete,
}

impl Fragment {
    pub fn field(class: impl Into<String>, name: impl Into<String>) -> Self {
        Fragment::Field {
            class: class.into(),
            name: name.into(),
        }
    }

    pub fn array_index(index: u64) -> Self {
        Fragment::ArrayIndex { index }
    }

    pub fn map_index(key: impl Into<MapKey>) -> Self {
        Fragment::MapIndex { key: key.into() }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Fragment::Complete)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Field { class, name } => write!(f, "{}.{}", class, name),
            Fragment::ArrayIndex { index } => write!(f, "[{}]", index),
            Fragment::MapIndex { key } => write!(f, "[{}]", key),
            Fragment::Complete => write!(f, "*"),
        }
    }
}
