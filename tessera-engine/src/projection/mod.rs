//! Projection handlers: apply snapshots to an entry's target.
//!
//! Collection entries use an initial handler for their first snapshot
//! after every (re)query and an incremental handler for the ones after.

mod document;
mod mapping;
mod sequence;

use crate::engine::ReadKind;
use crate::entry::Phase;
use crate::{Engine, Shape};
use tessera_core::{
    DocRef, EntryId, Mapping, OperationError, Sequence, Target, TesseraResult, Uid,
};
use tessera_store::{DocumentSnapshot, Query, QuerySnapshot, Source};
use tracing::debug;

impl Engine {
    pub(crate) fn start_collection(&mut self, eid: EntryId) -> TesseraResult<Target> {
        let entry = self
            .entries
            .get_mut(&eid)
            .ok_or(OperationError::UnknownTarget)?;
        let Source::Query(source) = entry.source.clone() else {
            return Err(OperationError::NotACollection.into());
        };
        let base = entry.options.resolve_query(source);
        entry.query = Some(base.clone());

        let keyed = entry.shape.is_keyed();
        let target = match &entry.target {
            Some(target @ Target::Sequence(_)) if !keyed => target.clone(),
            Some(target @ Target::Mapping(_)) if keyed => target.clone(),
            _ if keyed => Target::Mapping(Mapping::new()),
            _ => Target::Sequence(Sequence::new()),
        };
        entry.target = Some(target.clone());

        self.requery_entry(eid, base);
        Ok(target)
    }

    /// Re-issues the entry's read with `query`.
    pub(crate) fn requery_entry(&mut self, eid: EntryId, query: Query) {
        let Some(entry) = self.entries.get(&eid) else {
            return;
        };
        if matches!(entry.shape, Shape::Stream { .. }) {
            self.stream_requery(eid, query);
            return;
        }
        let once = entry.options.once;

        self.cancel_reads(eid);
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.active_query = Some(query.clone());
            entry.completion.begin();
        }
        debug!(entry = %eid, collection = %query.collection_path(), "requery");
        self.issue_read(
            eid,
            Source::Query(query),
            ReadKind::Collection {
                phase: Phase::Initial,
            },
            !once,
        );
    }

    pub(crate) fn project_initial(&mut self, eid: EntryId, snapshot: &QuerySnapshot) {
        let Some(target) = self.entries.get(&eid).and_then(|e| e.target.clone()) else {
            return;
        };
        match &target {
            Target::Sequence(seq) => self.sequence_initial(eid, seq, snapshot),
            Target::Mapping(map) => self.mapping_initial(eid, map, snapshot),
            Target::Document(_) => {}
        }
        self.update_cursors(eid, snapshot);
        self.callbacks.on_collection_settled(&target);
    }

    pub(crate) fn project_incremental(&mut self, eid: EntryId, snapshot: &QuerySnapshot) {
        let Some(target) = self.entries.get(&eid).and_then(|e| e.target.clone()) else {
            return;
        };
        match &target {
            Target::Sequence(seq) => self.sequence_incremental(eid, &target, seq, snapshot),
            Target::Mapping(map) => self.mapping_incremental(eid, &target, map, snapshot),
            Target::Document(_) => {}
        }
        self.update_cursors(eid, snapshot);
        self.callbacks.on_collection_settled(&target);
    }

    pub(crate) fn update_cursors(&mut self, eid: EntryId, snapshot: &QuerySnapshot) {
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.first = snapshot.first().cloned();
            entry.last = snapshot.last().cloned();
        }
    }

    /// Resolves and refreshes the record behind one snapshot document.
    fn project_doc(&mut self, eid: EntryId, doc: &DocumentSnapshot) -> Option<DocRef> {
        let rid = self.resolve_record(eid, doc.path(), false)?;
        self.refresh_record(rid, eid, doc)
    }

    /// Drops a document that left the entry's result: detached when it
    /// still exists remotely, destroyed when it is gone.
    fn release_removed(&mut self, eid: EntryId, doc: &DocumentSnapshot) {
        let uid = Uid::new(self.store.scope(), doc.path());
        let Some(rid) = self
            .entries
            .get(&eid)
            .and_then(|entry| entry.children.get(&uid).copied())
        else {
            return;
        };
        if doc.exists() {
            self.detach(eid, rid);
        } else {
            self.mark_missing(rid);
            self.destroy_record(rid);
        }
    }

    /// Records an initial pass may drop: those shown in the target plus
    /// children that never entered it, such as built but unsaved documents.
    fn initial_missing(&self, eid: EntryId, shown: impl Iterator<Item = Uid>) -> Vec<Uid> {
        let mut missing: Vec<Uid> = shown.collect();
        if let Some(entry) = self.entries.get(&eid) {
            for uid in entry.children.keys() {
                if !missing.contains(uid) {
                    missing.push(uid.clone());
                }
            }
        }
        missing
    }

    fn detach_missing(&mut self, eid: EntryId, missing: Vec<Uid>) {
        for uid in missing {
            if let Some(rid) = self.cache.lookup(&uid) {
                self.detach(eid, rid);
            }
        }
    }
}
