//! Identity-stable containers handed to application code.
//!
//! A [`Document`] is created once per cache record and mutated in place for
//! every later snapshot, so callers may hold a `DocRef` across updates and
//! compare identity with [`Arc::ptr_eq`]. Sequences and mappings hold
//! documents the same way and are themselves stable for the lifetime of the
//! entry that projects into them.

use crate::identity::Uid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Field map of a document.
pub type Fields = serde_json::Map<String, Value>;

/// Shared handle to a document.
pub type DocRef = Arc<Document>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Last known remote existence of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Existence {
    #[default]
    Unknown,
    Exists,
    Missing,
}

impl Existence {
    pub fn from_exists(exists: bool) -> Self {
        if exists {
            Existence::Exists
        } else {
            Existence::Missing
        }
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

pub struct Document {
    uid: Option<Uid>,
    fields: RwLock<Fields>,
    subs: RwLock<BTreeMap<String, Target>>,
    parent: RwLock<Weak<Document>>,
}

impl Document {
    /// Document owned by a cache record.
    pub fn bound(uid: Uid) -> DocRef {
        Arc::new(Self {
            uid: Some(uid),
            fields: RwLock::new(Fields::new()),
            subs: RwLock::new(BTreeMap::new()),
            parent: RwLock::new(Weak::new()),
        })
    }

    /// Plain object the cache knows nothing about.
    pub fn detached(fields: Fields) -> DocRef {
        Arc::new(Self {
            uid: None,
            fields: RwLock::new(fields),
            subs: RwLock::new(BTreeMap::new()),
            parent: RwLock::new(Weak::new()),
        })
    }

    pub fn uid(&self) -> Option<&Uid> {
        self.uid.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        read(&self.fields).get(field).cloned()
    }

    pub fn contains(&self, field: &str) -> bool {
        read(&self.fields).contains_key(field)
    }

    /// Copy of the current field map.
    pub fn fields(&self) -> Fields {
        read(&self.fields).clone()
    }

    pub fn set(&self, field: &str, value: Value) {
        write(&self.fields).insert(field.to_string(), value);
    }

    pub fn remove(&self, field: &str) -> Option<Value> {
        write(&self.fields).remove(field)
    }

    pub fn clear(&self) {
        write(&self.fields).clear();
        write(&self.subs).clear();
    }

    pub fn sub(&self, name: &str) -> Option<Target> {
        read(&self.subs).get(name).cloned()
    }

    pub fn sub_names(&self) -> Vec<String> {
        read(&self.subs).keys().cloned().collect()
    }

    pub fn set_sub(&self, name: &str, target: Target) {
        write(&self.subs).insert(name.to_string(), target);
    }

    pub fn remove_sub(&self, name: &str) -> Option<Target> {
        write(&self.subs).remove(name)
    }

    /// Document that owns the collection this document was projected into.
    pub fn parent(&self) -> Option<DocRef> {
        read(&self.parent).upgrade()
    }

    pub fn set_parent(&self, parent: &DocRef) {
        *write(&self.parent) = Arc::downgrade(parent);
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("uid", &self.uid)
            .field("fields", &*read(&self.fields))
            .field("subs", &self.sub_names())
            .finish()
    }
}

// ============================================================================
// SEQUENCE
// ============================================================================

/// Ordered list of documents, index-aligned with the query result.
#[derive(Default)]
pub struct Sequence {
    items: RwLock<Vec<DocRef>>,
}

impl Sequence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        read(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.items).is_empty()
    }

    pub fn get(&self, index: usize) -> Option<DocRef> {
        read(&self.items).get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<DocRef> {
        read(&self.items).clone()
    }

    pub fn position(&self, uid: &Uid) -> Option<usize> {
        read(&self.items)
            .iter()
            .position(|doc| doc.uid() == Some(uid))
    }

    pub fn contains(&self, doc: &DocRef) -> bool {
        read(&self.items).iter().any(|item| Arc::ptr_eq(item, doc))
    }

    /// Inserts at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, doc: DocRef) {
        let mut items = write(&self.items);
        let at = index.min(items.len());
        items.insert(at, doc);
    }

    pub fn push(&self, doc: DocRef) {
        write(&self.items).push(doc);
    }

    /// Replaces the element at `index`, appending when `index == len`.
    pub fn set(&self, index: usize, doc: DocRef) {
        let mut items = write(&self.items);
        if index < items.len() {
            items[index] = doc;
        } else {
            items.push(doc);
        }
    }

    pub fn remove(&self, index: usize) -> Option<DocRef> {
        let mut items = write(&self.items);
        (index < items.len()).then(|| items.remove(index))
    }

    pub fn move_item(&self, from: usize, to: usize) {
        let mut items = write(&self.items);
        if from >= items.len() || from == to {
            return;
        }
        let doc = items.remove(from);
        let at = to.min(items.len());
        items.insert(at, doc);
    }

    pub fn truncate(&self, len: usize) {
        write(&self.items).truncate(len);
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uids: Vec<_> = read(&self.items).iter().map(|doc| doc.uid().cloned()).collect();
        f.debug_struct("Sequence").field("items", &uids).finish()
    }
}

// ============================================================================
// MAPPING
// ============================================================================

/// Documents keyed by document id.
#[derive(Default)]
pub struct Mapping {
    items: RwLock<BTreeMap<String, DocRef>>,
}

impl Mapping {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        read(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.items).is_empty()
    }

    pub fn get(&self, key: &str) -> Option<DocRef> {
        read(&self.items).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        read(&self.items).keys().cloned().collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, DocRef> {
        read(&self.items).clone()
    }

    pub fn insert(&self, key: &str, doc: DocRef) {
        write(&self.items).insert(key.to_string(), doc);
    }

    pub fn remove(&self, key: &str) -> Option<DocRef> {
        write(&self.items).remove(key)
    }

    pub fn clear(&self) {
        write(&self.items).clear();
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping").field("keys", &self.keys()).finish()
    }
}

// ============================================================================
// TARGET
// ============================================================================

/// Container an entry projects into.
#[derive(Debug, Clone)]
pub enum Target {
    Document(DocRef),
    Sequence(Arc<Sequence>),
    Mapping(Arc<Mapping>),
}

impl Target {
    /// Identity comparison.
    pub fn same(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::Document(a), Target::Document(b)) => Arc::ptr_eq(a, b),
            (Target::Sequence(a), Target::Sequence(b)) => Arc::ptr_eq(a, b),
            (Target::Mapping(a), Target::Mapping(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Documents currently held, in projection order.
    pub fn documents(&self) -> Vec<DocRef> {
        match self {
            Target::Document(doc) => vec![Arc::clone(doc)],
            Target::Sequence(seq) => seq.to_vec(),
            Target::Mapping(map) => map.to_map().into_values().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Target::Document(_) => false,
            Target::Sequence(seq) => seq.is_empty(),
            Target::Mapping(map) => map.is_empty(),
        }
    }

    pub fn as_document(&self) -> Option<&DocRef> {
        match self {
            Target::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Arc<Sequence>> {
        match self {
            Target::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Arc<Mapping>> {
        match self {
            Target::Mapping(map) => Some(map),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
