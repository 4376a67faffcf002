//! Tessera Store - Backing Store Boundary
//!
//! The [`DocumentStore`] trait is the only way the engine talks to a remote
//! database. Reads are push-based: the store answers a `get` once and a
//! `subscribe` on every change through a [`SnapshotListener`]. Writes are
//! async and settle when the store acknowledges them.

pub mod diff;
pub mod listener;
pub mod memory;
pub mod query;
pub mod snapshot;

pub use diff::diff_results;
pub use listener::{SnapshotListener, StoreEvent, Subscription};
pub use memory::InMemoryStore;
pub use query::{compare_values, Cursor, Direction, Filter, FilterOp, OrderBy, Query};
pub use snapshot::{ChangeKind, DocumentChange, DocumentSnapshot, QuerySnapshot, Snapshot};

use ::async_trait::async_trait;
use tessera_core::{CollectionPath, DocPath, Fields, StoreResult};

/// What an entry reads: one document or a query over a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Document(DocPath),
    Query(Query),
}

impl Source {
    pub fn doc(path: impl Into<DocPath>) -> Self {
        Source::Document(path.into())
    }

    pub fn collection(path: impl Into<CollectionPath>) -> Self {
        Source::Query(Query::collection(path))
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Source::Query(_))
    }

    pub fn as_query(&self) -> Option<&Query> {
        match self {
            Source::Query(query) => Some(query),
            Source::Document(_) => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocPath> {
        match self {
            Source::Document(path) => Some(path),
            Source::Query(_) => None,
        }
    }
}

impl From<Query> for Source {
    fn from(query: Query) -> Self {
        Source::Query(query)
    }
}

/// A remote document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Scope string prefixed onto every cache UID from this store.
    fn scope(&self) -> &str;

    // ========================================================================
    // READS
    // ========================================================================

    /// Deliver exactly one result for `source` to `listener`.
    fn get(&self, source: &Source, listener: SnapshotListener);

    /// Deliver the current result and then every change until cancelled.
    fn subscribe(&self, source: &Source, listener: SnapshotListener) -> Subscription;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Replace the document.
    async fn set(&self, path: &DocPath, fields: Fields) -> StoreResult<()>;

    /// Merge top-level fields into an existing document.
    async fn update(&self, path: &DocPath, fields: Fields) -> StoreResult<()>;

    async fn delete(&self, path: &DocPath) -> StoreResult<()>;

    /// Remove the named fields from an existing document.
    async fn delete_fields(&self, path: &DocPath, fields: Vec<String>) -> StoreResult<()>;

    /// Fresh document id for `collection`.
    fn new_document_id(&self, collection: &CollectionPath) -> String;
}
