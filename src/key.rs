use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hierarchical datastore key such as `/blocks/CIQA...`.
///
/// Keys are always stored cleaned: a single leading `/`, no empty segments,
/// no trailing `/`. The root key is `/`. Ordering is the ordering of the
/// cleaned string, which keeps every descendant of a namespace contiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    path: String,
}

impl Key {
    pub fn new(raw: &str) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Self::from_segments(segments)
    }

    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
        }
    }

    fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut path = String::new();
        for segment in segments {
            path.push('/');
            path.push_str(segment);
        }
        if path.is_empty() {
            path.push('/');
        }
        Self { path }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment of the key, or `""` for the root.
    pub fn base_namespace(&self) -> &str {
        self.namespaces().last().unwrap_or("")
    }

    /// Key with the last segment removed. The parent of a top-level key and of
    /// the root is the root.
    pub fn parent(&self) -> Key {
        match self.path.rfind('/') {
            Some(0) | None => Key::root(),
            Some(idx) => Key {
                path: self.path[..idx].to_string(),
            },
        }
    }

    pub fn child(&self, other: &Key) -> Key {
        if self.is_root() {
            return other.clone();
        }
        if other.is_root() {
            return self.clone();
        }
        Key {
            path: format!("{}{}", self.path, other.path),
        }
    }

    pub fn child_segment(&self, segment: &str) -> Key {
        self.child(&Key::new(segment))
    }

    /// True when `self` lives strictly below `ancestor`. Every non-root key
    /// descends from the root.
    pub fn is_descendant_of(&self, ancestor: &Key) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.path.len() > ancestor.path.len()
            && self.path.starts_with(&ancestor.path)
            && self.path.as_bytes()[ancestor.path.len()] == b'/'
    }

    /// Prefix-query membership: the prefix itself or any descendant.
    pub fn has_prefix(&self, prefix: &Key) -> bool {
        self == prefix || self.is_descendant_of(prefix)
    }
}

impl Default for Key {
    fn default() -> Self {
        Key::root()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl FromStr for Key {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Key::new(s))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::new(value)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Key::new(&raw))
    }
}
