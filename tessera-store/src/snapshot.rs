//! Snapshot values delivered by a store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::DocPath;

/// Point-in-time view of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    path: DocPath,
    data: Option<Value>,
}

impl DocumentSnapshot {
    pub fn new(path: DocPath, data: Option<Value>) -> Self {
        Self { path, data }
    }

    pub fn existing(path: impl Into<DocPath>, data: Value) -> Self {
        Self::new(path.into(), Some(data))
    }

    pub fn missing(path: impl Into<DocPath>) -> Self {
        Self::new(path.into(), None)
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Value of a top-level field; `Null` when absent.
    pub fn field(&self, name: &str) -> Value {
        self.data
            .as_ref()
            .and_then(|data| data.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One ordered change in a query result.
///
/// `old_index` is set for `Modified` and `Removed`, `new_index` for `Added`
/// and `Modified`. Indices are positions in the sequence as it stands when
/// the changes are applied one after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub doc: DocumentSnapshot,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
}

impl DocumentChange {
    pub fn added(doc: DocumentSnapshot, new_index: usize) -> Self {
        Self {
            kind: ChangeKind::Added,
            doc,
            old_index: None,
            new_index: Some(new_index),
        }
    }

    pub fn modified(doc: DocumentSnapshot, old_index: usize, new_index: usize) -> Self {
        Self {
            kind: ChangeKind::Modified,
            doc,
            old_index: Some(old_index),
            new_index: Some(new_index),
        }
    }

    pub fn removed(doc: DocumentSnapshot, old_index: usize) -> Self {
        Self {
            kind: ChangeKind::Removed,
            doc,
            old_index: Some(old_index),
            new_index: None,
        }
    }
}

/// Result of a query read, with the changes since the previous delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub docs: Vec<DocumentSnapshot>,
    pub changes: Vec<DocumentChange>,
}

impl QuerySnapshot {
    pub fn new(docs: Vec<DocumentSnapshot>, changes: Vec<DocumentChange>) -> Self {
        Self { docs, changes }
    }

    /// First delivery of a result: every document is an addition.
    pub fn initial(docs: Vec<DocumentSnapshot>) -> Self {
        let changes = docs
            .iter()
            .enumerate()
            .map(|(index, doc)| DocumentChange::added(doc.clone(), index))
            .collect();
        Self { docs, changes }
    }

    pub fn size(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn first(&self) -> Option<&DocumentSnapshot> {
        self.docs.first()
    }

    pub fn last(&self) -> Option<&DocumentSnapshot> {
        self.docs.last()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Document(DocumentSnapshot),
    Query(QuerySnapshot),
}
