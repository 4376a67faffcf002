use crate::engine::ReadKind;
use crate::Engine;
use std::sync::Arc;
use tessera_core::{EntryId, OperationError, RecordId, Target, TesseraResult, Uid};
use tessera_store::{DocumentSnapshot, Source};
use tracing::debug;

impl Engine {
    pub(crate) fn start_document(&mut self, eid: EntryId) -> TesseraResult<Target> {
        let entry = self.entries.get(&eid).ok_or(OperationError::UnknownTarget)?;
        let Source::Document(path) = entry.source.clone() else {
            return Err(OperationError::UnknownTarget.into());
        };
        let once = entry.options.once;
        let previous: Option<RecordId> = match &entry.target {
            Some(Target::Document(doc)) => self.cache.record_for(doc),
            _ => None,
        };

        let rid = self
            .resolve_record(eid, &path, true)
            .ok_or(OperationError::UnknownTarget)?;
        if let Some(previous) = previous.filter(|p| *p != rid) {
            self.detach(eid, previous);
        }
        let data = self.cache.data(rid).ok_or(OperationError::UnknownTarget)?;
        let target = Target::Document(data);

        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.target = Some(target.clone());
            entry.completion.begin();
        }
        debug!(entry = %eid, path = %path, "document bound");
        self.issue_read(eid, Source::Document(path), ReadKind::Document, !once);
        Ok(target)
    }

    pub(crate) fn project_document(&mut self, eid: EntryId, snapshot: &DocumentSnapshot) {
        if snapshot.exists() {
            let Some(data) = self.project_doc(eid, snapshot) else {
                return;
            };
            if let Some(entry) = self.entries.get_mut(&eid) {
                entry.target = Some(Target::Document(Arc::clone(&data)));
            }
            self.callbacks.on_document_updated(&data);
            self.settle_entry(eid);
            return;
        }

        let uid = Uid::new(self.store.scope(), snapshot.path());
        self.callbacks.on_document_missing(&uid);
        let Some((instance, name, nullify)) = self
            .entries
            .get(&eid)
            .map(|e| (e.instance, e.name.clone(), e.options.nullify_missing))
        else {
            return;
        };

        if let Some(rid) = self.cache.lookup(&uid) {
            if nullify {
                self.mark_missing(rid);
                self.destroy_record(rid);
                if let Some(name) = &name {
                    self.system.remove_named(instance, name);
                }
                debug!(entry = %eid, uid = %uid, "missing document nullified");
            } else {
                self.mark_missing(rid);
            }
        }
        self.settle_entry(eid);
    }
}
