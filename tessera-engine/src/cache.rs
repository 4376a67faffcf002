//! Shared, reference-counted document cache.
//!
//! A record exists once per UID across every instance of an engine. Its
//! `uses` counts the instances that hold it; an instance is credited once
//! no matter how many of its entries reference the record. When the count
//! reaches zero the record is destroyed: its sub-collection entries close,
//! its fields are removed and the UID is forgotten.

use crate::entry::EntrySpec;
use crate::options::EntryOptions;
use crate::Engine;
use crate::Shape;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tessera_core::{
    DocPath, DocRef, Document, EntryId, Existence, InstanceId, RecordId, Uid, ENTRY_SEPARATOR,
};
use tessera_store::{Query, Source};
use tracing::{debug, warn};

pub(crate) struct CacheRecord {
    pub(crate) uid: Uid,
    pub(crate) path: DocPath,
    pub(crate) data: DocRef,
    pub(crate) exists: Existence,
    pub(crate) uses: usize,
    pub(crate) entries: Vec<EntryId>,
    pub(crate) sub: BTreeMap<String, EntryId>,
    /// Options of the entry that created the record. Govern encoding.
    pub(crate) options: Arc<EntryOptions>,
    /// Fields carried by the last remote snapshot.
    pub(crate) remote_fields: BTreeSet<String>,
}

/// Read-only view of a cache record.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub uid: Uid,
    pub path: DocPath,
    pub data: DocRef,
    pub exists: Existence,
    pub uses: usize,
    pub entries: Vec<EntryId>,
    pub subs: Vec<String>,
}

#[derive(Default)]
pub(crate) struct CacheRegistry {
    records: HashMap<RecordId, CacheRecord>,
    by_uid: HashMap<Uid, RecordId>,
    next: u64,
}

impl CacheRegistry {
    pub(crate) fn lookup(&self, uid: &Uid) -> Option<RecordId> {
        self.by_uid.get(uid).copied()
    }

    pub(crate) fn get(&self, rid: RecordId) -> Option<&CacheRecord> {
        self.records.get(&rid)
    }

    pub(crate) fn get_mut(&mut self, rid: RecordId) -> Option<&mut CacheRecord> {
        self.records.get_mut(&rid)
    }

    pub(crate) fn insert(&mut self, record: CacheRecord) -> RecordId {
        self.next += 1;
        let rid = RecordId::new(self.next);
        self.by_uid.insert(record.uid.clone(), rid);
        self.records.insert(rid, record);
        rid
    }

    pub(crate) fn remove(&mut self, rid: RecordId) -> Option<CacheRecord> {
        let record = self.records.remove(&rid)?;
        if self.by_uid.get(&record.uid) == Some(&rid) {
            self.by_uid.remove(&record.uid);
        }
        Some(record)
    }

    /// Record owning exactly this document object.
    pub(crate) fn record_for(&self, data: &Document) -> Option<RecordId> {
        let rid = self.lookup(data.uid()?)?;
        let record = self.records.get(&rid)?;
        std::ptr::eq(Arc::as_ptr(&record.data), data).then_some(rid)
    }

    pub(crate) fn data(&self, rid: RecordId) -> Option<DocRef> {
        self.records.get(&rid).map(|record| Arc::clone(&record.data))
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn info(&self, rid: RecordId) -> Option<RecordInfo> {
        self.records.get(&rid).map(|record| RecordInfo {
            uid: record.uid.clone(),
            path: record.path.clone(),
            data: Arc::clone(&record.data),
            exists: record.exists,
            uses: record.uses,
            entries: record.entries.clone(),
            subs: record.sub.keys().cloned().collect(),
        })
    }
}

impl Engine {
    /// Finds or creates the record for `path` and attaches it to `eid`.
    pub(crate) fn resolve_record(
        &mut self,
        eid: EntryId,
        path: &DocPath,
        check_subs: bool,
    ) -> Option<RecordId> {
        let options = Arc::clone(&self.entries.get(&eid)?.options);
        let uid = Uid::new(self.store.scope(), path);

        let rid = match self.cache.lookup(&uid) {
            Some(rid) => rid,
            None => {
                let data = Document::bound(uid.clone());
                if let Some(factory) = &options.new_document {
                    for (field, value) in factory() {
                        data.set(&field, value);
                    }
                }
                let rid = self.cache.insert(CacheRecord {
                    uid: uid.clone(),
                    path: path.clone(),
                    data,
                    exists: Existence::Unknown,
                    uses: 0,
                    entries: Vec::new(),
                    sub: BTreeMap::new(),
                    options,
                    remote_fields: BTreeSet::new(),
                });
                debug!(uid = %uid, "cache record created");
                self.callbacks.on_record_created(&uid);
                rid
            }
        };

        self.attach(rid, eid, check_subs);
        Some(rid)
    }

    pub(crate) fn attach(&mut self, rid: RecordId, eid: EntryId, check_subs: bool) {
        let Some(instance) = self.entries.get(&eid).map(|e| e.instance) else {
            return;
        };
        let Some(record) = self.cache.get_mut(rid) else {
            return;
        };
        let uid = record.uid.clone();

        if let Some(inst) = self.instances.get_mut(&instance) {
            if !inst.cache.contains_key(&uid) {
                inst.cache.insert(uid.clone(), rid);
                record.uses += 1;
            }
        }

        let newly_attached = !record.entries.contains(&eid);
        if newly_attached {
            record.entries.push(eid);
            if let Some(entry) = self.entries.get_mut(&eid) {
                entry.children.insert(uid, rid);
            }
        }

        if newly_attached || check_subs {
            self.attach_subs(rid, eid);
        }
    }

    /// Opens a sub-collection entry for every sub the entry's options name
    /// that the record does not already project.
    pub(crate) fn attach_subs(&mut self, rid: RecordId, eid: EntryId) {
        let Some((instance, options)) = self
            .entries
            .get(&eid)
            .map(|e| (e.instance, Arc::clone(&e.options)))
        else {
            return;
        };
        if options.sub.is_empty() {
            return;
        }

        for (name, input) in &options.sub {
            let Some((uid, path, data)) = self
                .cache
                .get(rid)
                .map(|r| (r.uid.clone(), r.path.clone(), Arc::clone(&r.data)))
            else {
                return;
            };
            if self.has_live_sub(rid, name) {
                continue;
            }

            let sub_options = match self.resolve_options(instance, input) {
                Ok(sub_options) => sub_options,
                Err(err) => {
                    warn!(uid = %uid, sub = %name, error = %err, "sub-collection options unresolved");
                    continue;
                }
            };
            let source = if sub_options.doc {
                Source::Document(path.child(name))
            } else {
                Source::Query(Query::collection(path.collection(name)))
            };
            let shape = Shape::select(&source, &sub_options);
            if let Err(err) = self.check_shape(&source, &sub_options) {
                warn!(uid = %uid, sub = %name, error = %err, "sub-collection skipped");
                continue;
            }

            let sub_eid = self.open_entry(EntrySpec {
                instance,
                source,
                options: sub_options,
                shape,
                name: Some(format!("{}{}{}", uid, ENTRY_SEPARATOR, name)),
                parent: Some(rid),
            });
            if let Some(record) = self.cache.get_mut(rid) {
                record.sub.insert(name.clone(), sub_eid);
            }

            match self.start_entry(sub_eid) {
                Ok(target) => {
                    self.system.set_sub(&data, name, target);
                    self.callbacks.on_sub_attached(&uid, name);
                    debug!(uid = %uid, sub = %name, entry = %sub_eid, "sub-collection attached");
                }
                Err(err) => {
                    warn!(uid = %uid, sub = %name, error = %err, "sub-collection failed to start");
                }
            }
        }
    }

    fn has_live_sub(&self, rid: RecordId, name: &str) -> bool {
        self.cache
            .get(rid)
            .and_then(|record| record.sub.get(name))
            .and_then(|eid| self.entries.get(eid))
            .is_some_and(|entry| entry.live)
    }

    /// True when some entry still referencing the record asks for `name`.
    pub(crate) fn is_referenced_sub(&self, rid: RecordId, name: &str) -> bool {
        self.cache.get(rid).is_some_and(|record| {
            record.entries.iter().any(|eid| {
                self.entries
                    .get(eid)
                    .is_some_and(|entry| entry.options.sub.contains_key(name))
            })
        })
    }

    pub(crate) fn detach(&mut self, eid: EntryId, rid: RecordId) {
        let Some(instance) = self.entries.get(&eid).map(|e| e.instance) else {
            return;
        };
        let Some(record) = self.cache.get_mut(rid) else {
            return;
        };
        let uid = record.uid.clone();
        record.entries.retain(|e| *e != eid);
        let remaining = record.entries.clone();
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.children.remove(&uid);
        }

        let instance_still_holds = remaining.iter().any(|e| {
            self.entries
                .get(e)
                .is_some_and(|entry| entry.instance == instance)
        });
        if !instance_still_holds {
            self.release_from_instance(rid, instance, true);
        }

        let Some(record) = self.cache.get(rid) else {
            return;
        };
        if record.uses > 0 {
            let subs: Vec<(String, EntryId)> = record
                .sub
                .iter()
                .map(|(name, sub)| (name.clone(), *sub))
                .collect();
            for (name, sub_eid) in subs {
                if !self.is_referenced_sub(rid, &name) {
                    self.close_entry(sub_eid, true);
                }
            }
        }
    }

    /// Removes the instance's claim on the record.
    pub(crate) fn release_from_instance(
        &mut self,
        rid: RecordId,
        instance: InstanceId,
        check_destroy: bool,
    ) {
        let Some(uid) = self.cache.get(rid).map(|r| r.uid.clone()) else {
            return;
        };
        let Some(inst) = self.instances.get_mut(&instance) else {
            return;
        };
        if inst.cache.remove(&uid).is_none() {
            return;
        }

        let Some(record) = self.cache.get_mut(rid) else {
            return;
        };
        record.uses = record.uses.saturating_sub(1);
        let owned: Vec<EntryId> = record
            .entries
            .iter()
            .rev()
            .copied()
            .filter(|e| {
                self.entries
                    .get(e)
                    .is_some_and(|entry| entry.instance == instance)
            })
            .collect();

        for eid in owned {
            self.detach(eid, rid);
        }

        if check_destroy && self.cache.get(rid).is_some_and(|r| r.uses == 0) {
            self.destroy_record(rid);
        }
    }

    pub(crate) fn destroy_record(&mut self, rid: RecordId) {
        let Some(record) = self.cache.get(rid) else {
            return;
        };
        let uid = record.uid.clone();

        let mut holders: Vec<InstanceId> = Vec::new();
        for eid in &record.entries {
            if let Some(entry) = self.entries.get(eid) {
                if !holders.contains(&entry.instance) {
                    holders.push(entry.instance);
                }
            }
        }
        for instance in holders {
            self.release_from_instance(rid, instance, false);
        }

        let subs: Vec<EntryId> = self
            .cache
            .get(rid)
            .map(|r| r.sub.values().copied().collect())
            .unwrap_or_default();
        for sub_eid in subs {
            self.close_entry(sub_eid, true);
        }

        let Some(record) = self.cache.get_mut(rid) else {
            return;
        };
        if record.uses > 0 {
            return;
        }
        let data = Arc::clone(&record.data);
        self.cache.remove(rid);

        for field in data.fields().keys() {
            self.system.remove_field(&data, field);
        }
        self.callbacks.on_record_destroyed(&uid);
        debug!(uid = %uid, "cache record destroyed");
    }

    /// Marks a record's document as gone from the store.
    pub(crate) fn mark_missing(&mut self, rid: RecordId) {
        let Some(record) = self.cache.get_mut(rid) else {
            return;
        };
        record.exists = Existence::Missing;
        record.remote_fields.clear();
        let data = Arc::clone(&record.data);
        if let Some(prop) = record.options.prop_exists.clone() {
            self.system.set_field(&data, &prop, serde_json::Value::Bool(false));
        }
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn uid(&self, path: impl AsRef<str>) -> Uid {
        Uid::new(self.store.scope(), &DocPath::new(path))
    }

    pub fn record_info(&self, uid: &Uid) -> Option<RecordInfo> {
        self.cache.info(self.cache.lookup(uid)?)
    }

    /// Record owning the given document object, if it is in scope.
    pub fn record_of(&self, data: &Document) -> Option<RecordInfo> {
        self.cache.info(self.cache.record_for(data)?)
    }

    pub fn record_count(&self) -> usize {
        self.cache.len()
    }

    /// Destroys the record owning `data` regardless of its holders.
    pub fn evict(&mut self, data: &Document) -> bool {
        match self.cache.record_for(data) {
            Some(rid) => {
                self.destroy_record(rid);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uid: &str) -> CacheRecord {
        let path = DocPath::new(uid);
        let uid = Uid::new("t", &path);
        CacheRecord {
            uid: uid.clone(),
            path,
            data: Document::bound(uid),
            exists: Existence::Unknown,
            uses: 0,
            entries: Vec::new(),
            sub: BTreeMap::new(),
            options: Arc::new(EntryOptions::default()),
            remote_fields: BTreeSet::new(),
        }
    }

    #[test]
    fn test_registry_lookup_and_remove() {
        let mut registry = CacheRegistry::default();
        let rid = registry.insert(record("a/1"));
        let uid = Uid::new("t", &DocPath::new("a/1"));
        assert_eq!(registry.lookup(&uid), Some(rid));
        assert_eq!(registry.len(), 1);

        registry.remove(rid);
        assert_eq!(registry.lookup(&uid), None);
        assert!(registry.get(rid).is_none());
    }

    #[test]
    fn test_record_for_checks_identity() {
        let mut registry = CacheRegistry::default();
        let rid = registry.insert(record("a/1"));
        let data = registry.data(rid).unwrap();
        assert_eq!(registry.record_for(&data), Some(rid));

        let impostor = Document::bound(Uid::new("t", &DocPath::new("a/1")));
        assert_eq!(registry.record_for(&impostor), None);
        assert_eq!(registry.record_for(&Document::detached(Default::default())), None);
    }
}
