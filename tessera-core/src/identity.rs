//! Identity types: store paths, cache UIDs and engine-local handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between a store scope and a document path inside a [`Uid`].
pub const UID_SEPARATOR: &str = "///";

/// Separator used when naming sub-collection entries (`<uid>/<name>`).
pub const ENTRY_SEPARATOR: &str = "/";

/// Field that receives a document's value when the remote value is not an object.
pub const DEFAULT_PROP_VALUE: &str = ".value";

fn normalize(raw: &str) -> String {
    raw.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// PATHS
// ============================================================================

/// Slash-separated path of a single document, e.g. `posts/1/comments/7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(normalize(path.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Collection that holds this document.
    pub fn parent(&self) -> CollectionPath {
        match self.0.rfind('/') {
            Some(at) => CollectionPath(self.0[..at].to_string()),
            None => CollectionPath(String::new()),
        }
    }

    /// Sub-collection nested under this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath::new(format!("{}/{}", self.0, name))
    }

    /// Document addressed by `name` directly under this document.
    pub fn child(&self, name: &str) -> DocPath {
        DocPath::new(format!("{}/{}", self.0, name))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Slash-separated path of a collection, e.g. `posts/1/comments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(normalize(path.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: &str) -> DocPath {
        DocPath::new(format!("{}/{}", self.0, id))
    }

    /// True when `path` is a direct child of this collection.
    pub fn contains(&self, path: &DocPath) -> bool {
        path.parent() == *self
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Globally unique cache key: `<store scope>///<document path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(String);

impl Uid {
    pub fn new(scope: &str, path: &DocPath) -> Self {
        Self(format!("{}{}{}", scope, UID_SEPARATOR, path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scope(&self) -> &str {
        self.0.split(UID_SEPARATOR).next().unwrap_or("")
    }

    pub fn path(&self) -> DocPath {
        match self.0.find(UID_SEPARATOR) {
            Some(at) => DocPath::new(&self.0[at + UID_SEPARATOR.len()..]),
            None => DocPath::new(&self.0),
        }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// HANDLES
// ============================================================================

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(
    /// One owner of projections (a view, component or session).
    InstanceId,
    "instance-"
);
handle!(
    /// One bound subscription inside an instance.
    EntryId,
    "entry-"
);
handle!(
    /// Slot of a cache record in the engine's registry.
    RecordId,
    "record-"
);
handle!(
    /// Correlates an outstanding store read with the entry waiting for it.
    Ticket,
    "ticket-"
);

/// Data operations that resolve caller data back through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Write,
    Overwrite,
    Save,
    Delete,
    ClearFields,
    DiffAgainstRemote,
    Locate,
    Build,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Write => "write",
            Operation::Overwrite => "overwrite",
            Operation::Save => "save",
            Operation::Delete => "delete",
            Operation::ClearFields => "clear_fields",
            Operation::DiffAgainstRemote => "diff_against_remote",
            Operation::Locate => "locate",
            Operation::Build => "build",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_path_normalizes_slashes() {
        let path = DocPath::new("/posts//1/");
        assert_eq!(path.as_str(), "posts/1");
        assert_eq!(path.id(), "1");
        assert_eq!(path.parent().as_str(), "posts");
    }

    #[test]
    fn test_sub_collection_paths() {
        let post = DocPath::new("posts/1");
        assert_eq!(post.collection("comments").as_str(), "posts/1/comments");
        assert_eq!(post.child("settings").as_str(), "posts/1/settings");
        assert!(post.collection("comments").contains(&DocPath::new("posts/1/comments/9")));
        assert!(!post.collection("comments").contains(&DocPath::new("posts/1/comments/9/likes/2")));
    }

    #[test]
    fn test_uid_round_trips_scope_and_path() {
        let uid = Uid::new("primary", &DocPath::new("posts/1"));
        assert_eq!(uid.as_str(), "primary///posts/1");
        assert_eq!(uid.scope(), "primary");
        assert_eq!(uid.path(), DocPath::new("posts/1"));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(EntryId::new(4).to_string(), "entry-4");
        assert_eq!(InstanceId::new(1).get(), 1);
    }
}
