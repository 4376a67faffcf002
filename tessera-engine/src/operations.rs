//! Operations on application data.
//!
//! Every operation resolves the caller's document back to its cache record
//! first. A document the registry does not own (never bound, evicted, or
//! left behind by a destroyed instance) is out of scope: asynchronous
//! operations hand back a rejected completion and `locate`/`build` return
//! the error directly. Either way the invalid-operation callback fires once.

use crate::completion::Completion;
use crate::data::{encode_data, parse_document};
use crate::Engine;
use futures_util::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tessera_core::{
    DocPath, DocRef, Document, EntryId, Existence, Fields, InstanceId, Operation, OperationError,
    RecordId, StoreError, Target, TesseraError, TesseraResult,
};
use tessera_store::{Snapshot, SnapshotListener, Source};
use tracing::{debug, warn};

/// Field comparison used by [`Engine::diff_against_remote`].
pub type Equality = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Fields whose local value differs from the store's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteChanges {
    pub changed: Vec<String>,
    pub remote: Fields,
    pub local: Fields,
}

impl RemoteChanges {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    a == b
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Update,
    Set,
}

impl Engine {
    fn scoped(&self, operation: Operation, data: &Document) -> TesseraResult<RecordId> {
        match self.cache.record_for(data) {
            Some(rid) => Ok(rid),
            None => {
                warn!(operation = %operation, uid = ?data.uid(), "operation outside the cache");
                self.callbacks.on_invalid_operation(operation, data);
                Err(OperationError::OutOfScope { operation }.into())
            }
        }
    }

    fn encoded(&self, rid: RecordId, fields: Option<&[&str]>) -> Option<(DocPath, Fields)> {
        let record = self.cache.get(rid)?;
        let encoded = encode_data(&record.data, &record.options, fields, &self.config.prop_value);
        Some((record.path.clone(), encoded))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Updates the remote document with the document's encodable fields.
    pub fn write(&self, data: &Document, fields: Option<&[&str]>) -> Completion<()> {
        self.persist(Operation::Write, data, fields, |_| WriteMode::Update)
    }

    /// Replaces the remote document.
    pub fn overwrite(&self, data: &Document, fields: Option<&[&str]>) -> Completion<()> {
        self.persist(Operation::Overwrite, data, fields, |_| WriteMode::Set)
    }

    /// Updates when the document is known to exist, replaces otherwise.
    pub fn save(&self, data: &Document, fields: Option<&[&str]>) -> Completion<()> {
        self.persist(Operation::Save, data, fields, |exists| match exists {
            Existence::Exists => WriteMode::Update,
            Existence::Unknown | Existence::Missing => WriteMode::Set,
        })
    }

    fn persist(
        &self,
        operation: Operation,
        data: &Document,
        fields: Option<&[&str]>,
        mode: impl FnOnce(Existence) -> WriteMode,
    ) -> Completion<()> {
        let rid = match self.scoped(operation, data) {
            Ok(rid) => rid,
            Err(err) => return Completion::rejected(err),
        };
        let Some(exists) = self.cache.get(rid).map(|record| record.exists) else {
            return Completion::rejected(OperationError::UnknownTarget);
        };
        let Some((path, encoded)) = self.encoded(rid, fields) else {
            return Completion::rejected(OperationError::UnknownTarget);
        };
        let mode = mode(exists);
        debug!(operation = %operation, path = %path, ?mode, fields = encoded.len(), "writing");

        let store = Arc::clone(&self.store);
        Completion::from_future(async move {
            let result = match mode {
                WriteMode::Update => store.update(&path, encoded).await,
                WriteMode::Set => store.set(&path, encoded).await,
            };
            result.map_err(TesseraError::from)
        })
    }

    /// Deletes the remote document. With `cascade_subs`, every loaded
    /// sub-collection document is deleted first, deepest level first.
    pub fn delete(&self, data: &Document, cascade_subs: bool) -> Completion<()> {
        let rid = match self.scoped(Operation::Delete, data) {
            Ok(rid) => rid,
            Err(err) => return Completion::rejected(err),
        };
        let Some(record) = self.cache.get(rid) else {
            return Completion::rejected(OperationError::UnknownTarget);
        };
        let path = record.path.clone();
        let mut levels: Vec<Vec<DocPath>> = Vec::new();
        if cascade_subs {
            let names = record.data.sub_names();
            self.collect_sub_documents(&record.data, &names, 0, &mut levels);
        }
        debug!(path = %path, cascade = levels.iter().map(Vec::len).sum::<usize>(), "deleting");

        let store = Arc::clone(&self.store);
        Completion::from_future(async move {
            for level in levels.iter().rev() {
                try_join_all(level.iter().map(|child| store.delete(child))).await?;
            }
            store.delete(&path).await?;
            Ok::<(), TesseraError>(())
        })
    }

    /// Deletes the children of the named sub-collections and removes the
    /// remaining named fields from the remote document.
    pub fn clear_fields(&self, data: &Document, fields: &[&str]) -> Completion<()> {
        let rid = match self.scoped(Operation::ClearFields, data) {
            Ok(rid) => rid,
            Err(err) => return Completion::rejected(err),
        };
        let Some(record) = self.cache.get(rid) else {
            return Completion::rejected(OperationError::UnknownTarget);
        };
        let path = record.path.clone();
        let subs = record.data.sub_names();
        let (sub_fields, plain): (Vec<&str>, Vec<&str>) = fields
            .iter()
            .copied()
            .partition(|field| subs.iter().any(|sub| sub == field));
        let sub_fields: Vec<String> = sub_fields.into_iter().map(str::to_string).collect();
        let plain: Vec<String> = plain.into_iter().map(str::to_string).collect();

        let mut levels: Vec<Vec<DocPath>> = Vec::new();
        self.collect_sub_documents(&record.data, &sub_fields, 0, &mut levels);

        let store = Arc::clone(&self.store);
        Completion::from_future(async move {
            for level in levels.iter().rev() {
                try_join_all(level.iter().map(|child| store.delete(child))).await?;
            }
            if !plain.is_empty() {
                store.delete_fields(&path, plain).await?;
            }
            Ok::<(), TesseraError>(())
        })
    }

    /// Groups the in-scope documents of `data`'s named subs by depth.
    fn collect_sub_documents(
        &self,
        data: &Document,
        names: &[String],
        depth: usize,
        levels: &mut Vec<Vec<DocPath>>,
    ) {
        for name in names {
            let Some(target) = data.sub(name) else {
                continue;
            };
            for child in target.documents() {
                let Some(record) = self.cache.record_for(&child).and_then(|rid| self.cache.get(rid))
                else {
                    continue;
                };
                if levels.len() <= depth {
                    levels.push(Vec::new());
                }
                levels[depth].push(record.path.clone());
                self.collect_sub_documents(&child, &child.sub_names(), depth + 1, levels);
            }
        }
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Compares local fields against a fresh read of the remote document.
    /// Without `fields`, every encodable field on either side is compared.
    pub fn diff_against_remote(
        &self,
        data: &Document,
        fields: Option<&[&str]>,
        equality: Option<Equality>,
    ) -> Completion<RemoteChanges> {
        let rid = match self.scoped(Operation::DiffAgainstRemote, data) {
            Ok(rid) => rid,
            Err(err) => return Completion::rejected(err),
        };
        let Some(record) = self.cache.get(rid) else {
            return Completion::rejected(OperationError::UnknownTarget);
        };
        let options = Arc::clone(&record.options);
        let prop_value = self.config.prop_value.clone();
        let local = encode_data(&record.data, &options, fields, &prop_value);
        let requested: Option<Vec<String>> =
            fields.map(|list| list.iter().map(|f| f.to_string()).collect());

        let (listener, received) = SnapshotListener::oneshot();
        self.store.get(&Source::Document(record.path.clone()), listener);

        Completion::from_future(async move {
            let snapshot = received.await.map_err(|_| OperationError::Closed)??;
            let Snapshot::Document(doc) = snapshot else {
                return Err(StoreError::Internal {
                    reason: "document read answered with a query".to_string(),
                }
                .into());
            };
            let parsed = parse_document(&doc, &options, &prop_value);
            let selected: Option<Vec<&str>> = requested
                .as_ref()
                .map(|list| list.iter().map(String::as_str).collect());
            let remote_side = encode_data(
                &Document::detached(parsed),
                &options,
                selected.as_deref(),
                &prop_value,
            );

            let names: Vec<String> = match requested {
                Some(list) => list,
                None => {
                    let mut names: Vec<String> = local.keys().cloned().collect();
                    for name in remote_side.keys() {
                        if !local.contains_key(name) {
                            names.push(name.clone());
                        }
                    }
                    names
                }
            };

            let equal: Equality = match equality {
                Some(equality) => equality,
                None => Arc::new(json_eq),
            };
            let mut changes = RemoteChanges::default();
            for name in names {
                let mine = local.get(&name).cloned().unwrap_or(Value::Null);
                let theirs = remote_side.get(&name).cloned().unwrap_or(Value::Null);
                if !equal(&mine, &theirs) {
                    changes.changed.push(name.clone());
                }
                changes.local.insert(name.clone(), mine);
                changes.remote.insert(name, theirs);
            }
            Ok(changes)
        })
    }

    /// Source that reads the document, or one of its sub-collections.
    pub fn locate(&self, data: &Document, sub: Option<&str>) -> TesseraResult<Source> {
        let rid = self.scoped(Operation::Locate, data)?;
        let record = self.cache.get(rid).ok_or(OperationError::UnknownTarget)?;
        let Some(name) = sub else {
            return Ok(Source::Document(record.path.clone()));
        };
        if let Some(entry) = record.sub.get(name).and_then(|eid| self.entries.get(eid)) {
            return Ok(entry.source.clone());
        }
        if self.is_referenced_sub(rid, name) {
            return Ok(Source::collection(record.path.collection(name)));
        }
        Err(OperationError::UnknownSubCollection {
            sub: name.to_string(),
        }
        .into())
    }

    // ========================================================================
    // BUILD / CREATE
    // ========================================================================

    /// New local document in the collection behind `target`, with the
    /// entry's defaults and `initial` applied. Nothing is written.
    pub fn build(
        &mut self,
        instance: InstanceId,
        target: &Target,
        initial: Option<Fields>,
    ) -> TesseraResult<DocRef> {
        let eid = self
            .entry_for(instance, target)
            .ok_or(OperationError::UnknownTarget)?;
        self.build_in(eid, initial)
    }

    pub fn build_named(
        &mut self,
        instance: InstanceId,
        name: &str,
        initial: Option<Fields>,
    ) -> TesseraResult<DocRef> {
        let eid = self
            .entry_named(instance, name)
            .ok_or(OperationError::UnknownTarget)?;
        self.build_in(eid, initial)
    }

    /// Builds a document and writes it with [`Engine::overwrite`].
    pub fn create(
        &mut self,
        instance: InstanceId,
        target: &Target,
        initial: Option<Fields>,
    ) -> TesseraResult<(DocRef, Completion<()>)> {
        let data = self.build(instance, target, initial)?;
        let written = self.overwrite(&data, None);
        Ok((data, written))
    }

    pub fn create_named(
        &mut self,
        instance: InstanceId,
        name: &str,
        initial: Option<Fields>,
    ) -> TesseraResult<(DocRef, Completion<()>)> {
        let data = self.build_named(instance, name, initial)?;
        let written = self.overwrite(&data, None);
        Ok((data, written))
    }

    /// Builds a document inside one of `data`'s sub-collections.
    pub fn build_sub(
        &mut self,
        data: &Document,
        sub: &str,
        initial: Option<Fields>,
    ) -> TesseraResult<DocRef> {
        let rid = self.scoped(Operation::Build, data)?;
        let eid = self
            .cache
            .get(rid)
            .and_then(|record| record.sub.get(sub).copied())
            .ok_or_else(|| OperationError::UnknownSubCollection {
                sub: sub.to_string(),
            })?;
        self.build_in(eid, initial)
    }

    pub fn create_sub(
        &mut self,
        data: &Document,
        sub: &str,
        initial: Option<Fields>,
    ) -> TesseraResult<(DocRef, Completion<()>)> {
        let child = self.build_sub(data, sub, initial)?;
        let written = self.overwrite(&child, None);
        Ok((child, written))
    }

    fn build_in(&mut self, eid: EntryId, initial: Option<Fields>) -> TesseraResult<DocRef> {
        let entry = self.entries.get(&eid).ok_or(OperationError::UnknownTarget)?;
        let Source::Query(query) = &entry.source else {
            return Err(OperationError::NotACollection.into());
        };
        let collection = query.collection_path().clone();
        let options = Arc::clone(&entry.options);

        let id = self.store.new_document_id(&collection);
        let path = collection.doc(&id);
        let rid = self
            .resolve_record(eid, &path, false)
            .ok_or(OperationError::UnknownTarget)?;
        let data = self.cache.data(rid).ok_or(OperationError::UnknownTarget)?;
        let initial = initial.unwrap_or_default();

        for (field, default) in &options.defaults {
            if !initial.contains_key(field) {
                self.system.set_field(&data, field, default.produce());
            }
        }
        for (field, value) in initial {
            self.system.set_field(&data, &field, value);
        }
        if let Some(key) = &options.key {
            self.system.set_field(&data, key, Value::String(id.clone()));
        }
        debug!(entry = %eid, path = %path, "document built");
        Ok(data)
    }
}
