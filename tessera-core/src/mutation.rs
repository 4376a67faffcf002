//! Host mutation hooks.
//!
//! Every structural edit the engine makes to an application-visible
//! container goes through a [`MutationSystem`], so a host with its own
//! change-tracking (observable models, undo stacks, render schedulers) can
//! intercept it. The defaults edit the container directly.

use crate::document::{DocRef, Document, Mapping, Sequence, Target};
use crate::identity::InstanceId;
use serde_json::Value;

pub trait MutationSystem: Send + Sync {
    fn set_field(&self, doc: &Document, field: &str, value: Value) {
        doc.set(field, value);
    }

    fn remove_field(&self, doc: &Document, field: &str) {
        doc.remove(field);
    }

    fn set_sub(&self, doc: &Document, name: &str, target: Target) {
        doc.set_sub(name, target);
    }

    fn remove_sub(&self, doc: &Document, name: &str) {
        doc.remove_sub(name);
    }

    fn sequence_insert(&self, seq: &Sequence, index: usize, doc: DocRef) {
        seq.insert(index, doc);
    }

    fn sequence_set(&self, seq: &Sequence, index: usize, doc: DocRef) {
        seq.set(index, doc);
    }

    fn sequence_remove(&self, seq: &Sequence, index: usize) -> Option<DocRef> {
        seq.remove(index)
    }

    fn sequence_move(&self, seq: &Sequence, from: usize, to: usize) {
        seq.move_item(from, to);
    }

    fn sequence_truncate(&self, seq: &Sequence, len: usize) {
        seq.truncate(len);
    }

    fn mapping_set(&self, map: &Mapping, key: &str, doc: DocRef) {
        map.insert(key, doc);
    }

    fn mapping_remove(&self, map: &Mapping, key: &str) -> Option<DocRef> {
        map.remove(key)
    }

    fn mapping_clear(&self, map: &Mapping) {
        map.clear();
    }

    /// Called when a named document entry's document disappears and the
    /// entry nullifies missing documents.
    fn remove_named(&self, _instance: InstanceId, _name: &str) {}

    /// Wraps all edits produced by one snapshot.
    fn batch(&self, apply: &mut dyn FnMut()) {
        apply();
    }
}

/// Edits containers directly with no interception.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectMutation;

impl MutationSystem for DirectMutation {}
