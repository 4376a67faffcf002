use crate::Engine;
use std::sync::Arc;
use tessera_core::{EntryId, Sequence, Target, Uid};
use tessera_store::{ChangeKind, QuerySnapshot};
use tracing::trace;

impl Engine {
    pub(super) fn sequence_initial(&mut self, eid: EntryId, seq: &Arc<Sequence>, snapshot: &QuerySnapshot) {
        let system = Arc::clone(&self.system);
        let mut missing = self.initial_missing(
            eid,
            seq.to_vec().iter().filter_map(|doc| doc.uid().cloned()),
        );

        system.sequence_truncate(seq, 0);
        for doc in &snapshot.docs {
            let Some(data) = self.project_doc(eid, doc) else {
                continue;
            };
            missing.retain(|uid| Some(uid) != data.uid());
            system.sequence_set(seq, seq.len(), data);
        }

        self.detach_missing(eid, missing);
    }

    pub(super) fn sequence_incremental(
        &mut self,
        eid: EntryId,
        target: &Target,
        seq: &Arc<Sequence>,
        snapshot: &QuerySnapshot,
    ) {
        let system = Arc::clone(&self.system);
        let callbacks = Arc::clone(&self.callbacks);

        for change in &snapshot.changes {
            trace!(entry = %eid, doc = %change.doc.path(), kind = ?change.kind, "applying change");
            match change.kind {
                ChangeKind::Added => {
                    let Some(data) = self.project_doc(eid, &change.doc) else {
                        continue;
                    };
                    let at = change.new_index.unwrap_or(seq.len());
                    system.sequence_insert(seq, at, Arc::clone(&data));
                    callbacks.on_collection_added(target, &data);
                }
                ChangeKind::Removed => {
                    let uid = Uid::new(self.store.scope(), change.doc.path());
                    let index = change
                        .old_index
                        .filter(|i| seq.get(*i).is_some_and(|doc| doc.uid() == Some(&uid)))
                        .or_else(|| seq.position(&uid));
                    if let Some(removed) = index.and_then(|i| system.sequence_remove(seq, i)) {
                        callbacks.on_collection_removed(target, &removed);
                    }
                    self.release_removed(eid, &change.doc);
                }
                ChangeKind::Modified => {
                    let Some(data) = self.project_doc(eid, &change.doc) else {
                        continue;
                    };
                    if change.old_index != change.new_index {
                        let from = change
                            .old_index
                            .filter(|i| seq.get(*i).is_some_and(|doc| Arc::ptr_eq(&doc, &data)))
                            .or_else(|| data.uid().and_then(|uid| seq.position(uid)));
                        match (from, change.new_index) {
                            (Some(from), Some(to)) => system.sequence_move(seq, from, to),
                            (None, Some(to)) => system.sequence_insert(seq, to, Arc::clone(&data)),
                            _ => {}
                        }
                    }
                    callbacks.on_collection_modified(target, &data);
                }
            }
        }

        let size = snapshot.size();
        if seq.len() > size {
            system.sequence_truncate(seq, size);
        }
    }
}
