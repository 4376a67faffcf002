//! In-memory document store with live queries.
//!
//! Every write re-evaluates the active watches and pushes a snapshot to the
//! ones whose result changed. Deliveries happen after the state lock is
//! released, so listeners may call back into the store.

use crate::diff::diff_results;
use crate::listener::{SnapshotListener, Subscription};
use crate::snapshot::{DocumentSnapshot, QuerySnapshot, Snapshot};
use crate::{DocumentStore, Query, Source};
use ::async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tessera_core::{CollectionPath, DocPath, Fields, StoreError, StoreResult};
use tracing::{debug, trace};
use uuid::Uuid;

enum Seen {
    Document(Option<Value>),
    Query(Vec<DocumentSnapshot>),
}

struct Watch {
    source: Source,
    listener: SnapshotListener,
    seen: Seen,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<DocPath, Value>,
    watches: BTreeMap<u64, Watch>,
    next_watch: u64,
    read_failure: Option<StoreError>,
    write_failure: Option<StoreError>,
    reads: usize,
}

type Delivery = (SnapshotListener, Snapshot);

impl State {
    fn snapshot_of(&self, path: &DocPath) -> DocumentSnapshot {
        DocumentSnapshot::new(path.clone(), self.documents.get(path).cloned())
    }

    fn candidates(&self, query: &Query) -> Vec<DocumentSnapshot> {
        self.documents
            .iter()
            .filter(|(path, _)| query.collection_path().contains(path))
            .map(|(path, data)| DocumentSnapshot::new(path.clone(), Some(data.clone())))
            .collect()
    }

    fn evaluate(&self, query: &Query) -> Vec<DocumentSnapshot> {
        query.evaluate(&self.candidates(query))
    }

    fn read(&self, source: &Source) -> (Snapshot, Seen) {
        match source {
            Source::Document(path) => {
                let snap = self.snapshot_of(path);
                let seen = Seen::Document(snap.data().cloned());
                (Snapshot::Document(snap), seen)
            }
            Source::Query(query) => {
                let docs = self.evaluate(query);
                let seen = Seen::Query(docs.clone());
                (Snapshot::Query(QuerySnapshot::initial(docs)), seen)
            }
        }
    }

    /// Recomputes every watch and returns the deliveries owed.
    fn collect_changes(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let mut updates = Vec::new();

        for (id, watch) in &self.watches {
            match (&watch.source, &watch.seen) {
                (Source::Document(path), Seen::Document(previous)) => {
                    let current = self.documents.get(path).cloned();
                    if &current != previous {
                        let snap = DocumentSnapshot::new(path.clone(), current.clone());
                        deliveries.push((watch.listener.clone(), Snapshot::Document(snap)));
                        updates.push((*id, Seen::Document(current)));
                    }
                }
                (Source::Query(query), Seen::Query(previous)) => {
                    let docs = self.evaluate(query);
                    let changes = diff_results(previous, &docs, |path| self.snapshot_of(path));
                    if !changes.is_empty() {
                        trace!(collection = %query.collection_path(), changes = changes.len(), "query result changed");
                        deliveries.push((
                            watch.listener.clone(),
                            Snapshot::Query(QuerySnapshot::new(docs.clone(), changes)),
                        ));
                        updates.push((*id, Seen::Query(docs)));
                    }
                }
                _ => {}
            }
        }

        for (id, seen) in updates {
            if let Some(watch) = self.watches.get_mut(&id) {
                watch.seen = seen;
            }
        }
        deliveries
    }
}

fn deliver_all(deliveries: Vec<Delivery>) {
    for (listener, snapshot) in deliveries {
        listener.snapshot(snapshot);
    }
}

/// In-memory store for tests and local development.
#[derive(Clone)]
pub struct InMemoryStore {
    scope: String,
    inner: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            inner: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Store pre-populated with `(path, value)` pairs.
    pub fn with_documents<'a, I>(scope: impl Into<String>, documents: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let store = Self::new(scope);
        {
            let mut state = store.state();
            for (path, value) in documents {
                state.documents.insert(DocPath::new(path), value);
            }
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<F>(&self, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut BTreeMap<DocPath, Value>) -> StoreResult<()>,
    {
        let deliveries = {
            let mut state = self.state();
            if let Some(err) = state.write_failure.take() {
                return Err(err);
            }
            apply(&mut state.documents)?;
            state.collect_changes()
        };
        deliver_all(deliveries);
        Ok(())
    }

    /// Writes a document as if another client had changed it.
    pub fn insert(&self, path: &str, value: Value) {
        let path = DocPath::new(path);
        let _ = self.mutate(|docs| {
            docs.insert(path, value);
            Ok(())
        });
    }

    /// Deletes a document as if another client had removed it.
    pub fn remove(&self, path: &str) {
        let path = DocPath::new(path);
        let _ = self.mutate(|docs| {
            docs.remove(&path);
            Ok(())
        });
    }

    pub fn document(&self, path: &str) -> Option<Value> {
        self.state().documents.get(&DocPath::new(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().documents.is_empty()
    }

    /// Number of active subscriptions.
    pub fn watch_count(&self) -> usize {
        self.state().watches.len()
    }

    /// Number of reads served, one-shot and live.
    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    /// The next read (get or subscribe) delivers `error` instead of data.
    pub fn fail_next_read(&self, error: StoreError) {
        self.state().read_failure = Some(error);
    }

    /// The next write returns `error` and changes nothing.
    pub fn fail_next_write(&self, error: StoreError) {
        self.state().write_failure = Some(error);
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn get(&self, source: &Source, listener: SnapshotListener) {
        let result = {
            let mut state = self.state();
            state.reads += 1;
            match state.read_failure.take() {
                Some(err) => Err(err),
                None => Ok(state.read(source).0),
            }
        };
        listener.deliver(result);
    }

    fn subscribe(&self, source: &Source, listener: SnapshotListener) -> Subscription {
        let (id, initial) = {
            let mut state = self.state();
            state.reads += 1;
            if let Some(err) = state.read_failure.take() {
                drop(state);
                listener.error(err);
                return Subscription::detached();
            }
            let (snapshot, seen) = state.read(source);
            let id = state.next_watch;
            state.next_watch += 1;
            state.watches.insert(
                id,
                Watch {
                    source: source.clone(),
                    listener: listener.clone(),
                    seen,
                },
            );
            (id, snapshot)
        };
        debug!(scope = %self.scope, watch = id, "subscription opened");
        listener.snapshot(initial);

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .watches
                    .remove(&id);
            }
        })
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        self.mutate(|docs| {
            docs.insert(path.clone(), Value::Object(fields));
            Ok(())
        })
    }

    async fn update(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        self.mutate(|docs| match docs.get_mut(path) {
            Some(Value::Object(existing)) => {
                existing.extend(fields);
                Ok(())
            }
            Some(other) => {
                *other = Value::Object(fields);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        })
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        self.mutate(|docs| {
            docs.remove(path);
            Ok(())
        })
    }

    async fn delete_fields(&self, path: &DocPath, fields: Vec<String>) -> StoreResult<()> {
        self.mutate(|docs| match docs.get_mut(path) {
            Some(Value::Object(existing)) => {
                for field in &fields {
                    existing.remove(field);
                }
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        })
    }

    fn new_document_id(&self, _collection: &CollectionPath) -> String {
        Uuid::now_v7().simple().to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChangeKind;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn recording() -> (SnapshotListener, Arc<StdMutex<Vec<StoreResult<Snapshot>>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = SnapshotListener::new(move |result| sink.lock().unwrap().push(result));
        (listener, seen)
    }

    fn store() -> InMemoryStore {
        InMemoryStore::with_documents(
            "mem",
            vec![
                ("todos/1", json!({"name": "T1", "done": false})),
                ("todos/2", json!({"name": "T2", "done": true})),
            ],
        )
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[test]
    fn test_get_document_and_query() {
        let store = store();
        let (listener, seen) = recording();
        store.get(&Source::doc("todos/1"), listener.clone());
        store.get(&Source::collection("todos"), listener);

        let seen = seen.lock().unwrap();
        assert!(matches!(&seen[0], Ok(Snapshot::Document(d)) if d.exists()));
        assert!(matches!(&seen[1], Ok(Snapshot::Query(q)) if q.size() == 2));
        assert_eq!(store.watch_count(), 0);
    }

    #[test]
    fn test_subscription_delivers_changes_until_cancelled() {
        let store = store();
        let (listener, seen) = recording();
        let sub = store.subscribe(&Source::collection("todos"), listener);
        assert_eq!(store.watch_count(), 1);

        store.insert("todos/0", json!({"name": "T0"}));
        store.insert("other/1", json!({}));
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            match &seen[1] {
                Ok(Snapshot::Query(q)) => {
                    assert_eq!(q.changes.len(), 1);
                    assert_eq!(q.changes[0].kind, ChangeKind::Added);
                    assert_eq!(q.changes[0].new_index, Some(0));
                }
                other => panic!("unexpected delivery: {other:?}"),
            }
        }

        sub.cancel();
        assert_eq!(store.watch_count(), 0);
        store.remove("todos/0");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_removed_change_reports_remote_state() {
        let store = store();
        let (listener, seen) = recording();
        let query = Query::collection("todos").filter("done", crate::FilterOp::Eq, json!(false));
        let _sub = store.subscribe(&Source::Query(query), listener);

        store.insert("todos/1", json!({"name": "T1", "done": true}));
        let seen = seen.lock().unwrap();
        match &seen[1] {
            Ok(Snapshot::Query(q)) => {
                assert_eq!(q.changes[0].kind, ChangeKind::Removed);
                assert!(q.changes[0].doc.exists());
            }
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_requires_existing_document() {
        let store = store();
        let missing = store
            .update(&DocPath::new("todos/9"), fields(json!({"name": "x"})))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));

        store
            .update(&DocPath::new("todos/1"), fields(json!({"done": true})))
            .await
            .unwrap();
        assert_eq!(store.document("todos/1"), Some(json!({"name": "T1", "done": true})));
    }

    #[tokio::test]
    async fn test_delete_fields_and_delete() {
        let store = store();
        store
            .delete_fields(&DocPath::new("todos/1"), vec!["done".to_string()])
            .await
            .unwrap();
        assert_eq!(store.document("todos/1"), Some(json!({"name": "T1"})));

        store.delete(&DocPath::new("todos/1")).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = store();
        store.fail_next_write(StoreError::PermissionDenied {
            path: "todos/1".to_string(),
        });
        let result = store.set(&DocPath::new("todos/1"), Fields::new()).await;
        assert!(matches!(result, Err(StoreError::PermissionDenied { .. })));
        assert!(store.document("todos/1").is_some());

        store.fail_next_read(StoreError::Unavailable {
            reason: "offline".to_string(),
        });
        let (listener, seen) = recording();
        let _sub = store.subscribe(&Source::collection("todos"), listener);
        assert!(seen.lock().unwrap()[0].is_err());
        assert_eq!(store.watch_count(), 0);
    }

    #[test]
    fn test_document_ids_are_unique() {
        let store = store();
        let collection = CollectionPath::new("todos");
        assert_ne!(store.new_document_id(&collection), store.new_document_id(&collection));
    }
}
