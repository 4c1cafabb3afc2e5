//! Cache tags used for bulk invalidation.

use std::fmt;

use smol_str::SmolStr;

/// An opaque string attached to a cached id, used as a group identifier for
/// bulk invalidation (see `CacheIndex::invalidate_by_tags`).
///
/// Cheap to clone: backed by [`SmolStr`], so tags up to 23 bytes never
/// allocate.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Tag(SmolStr);

impl Tag {
    /// Creates a tag from any string-like value.
    pub fn new(value: impl AsRef<str>) -> Self {
        Tag(SmolStr::new(value.as_ref()))
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Tag::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Tag(SmolStr::new(value))
    }
}

impl From<SmolStr> for Tag {
    fn from(value: SmolStr) -> Self {
        Tag(value)
    }
}
