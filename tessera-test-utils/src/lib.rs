//! Tessera Test Utilities
//!
//! Shared test infrastructure for the tessera workspace:
//! - A scripted store that hands snapshot delivery to the test
//! - Recording callbacks and mutation hooks
//! - Proptest generators
//! - Store fixtures for common scenarios
//! - Assertions for tessera error variants

pub use tessera_core::{
    Callbacks, DocPath, DocRef, Document, Existence, Fields, InstanceId, MutationSystem,
    OperationError, Operation, Sequence, SetupError, StoreError, Target, TesseraError,
    TesseraResult, Uid, WindowError,
};
pub use tessera_store::{
    DocumentChange, DocumentSnapshot, DocumentStore, InMemoryStore, QuerySnapshot, Snapshot,
    SnapshotListener, Source, Subscription,
};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tessera_core::{CollectionPath, Mapping, StoreResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Install a test subscriber filtered by `TESSERA_LOG` (default `warn`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TESSERA_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Converts a JSON object literal into a field map.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

// ============================================================================
// SCRIPTED STORE
// ============================================================================

/// One read the engine issued against a [`ScriptedStore`].
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub source: Source,
    pub live: bool,
    listener: SnapshotListener,
    cancelled: Arc<AtomicBool>,
}

impl ScriptedCall {
    pub fn push(&self, snapshot: Snapshot) {
        self.listener.snapshot(snapshot);
    }

    pub fn push_doc(&self, doc: DocumentSnapshot) {
        self.push(Snapshot::Document(doc));
    }

    pub fn push_query(&self, docs: Vec<DocumentSnapshot>, changes: Vec<DocumentChange>) {
        self.push(Snapshot::Query(QuerySnapshot::new(docs, changes)));
    }

    pub fn push_initial(&self, docs: Vec<DocumentSnapshot>) {
        self.push(Snapshot::Query(QuerySnapshot::initial(docs)));
    }

    pub fn fail(&self, error: StoreError) {
        self.listener.error(error);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedWrite {
    Set(DocPath, Fields),
    Update(DocPath, Fields),
    Delete(DocPath),
    DeleteFields(DocPath, Vec<String>),
}

/// Store that records reads and lets the test decide what they return.
#[derive(Debug)]
pub struct ScriptedStore {
    scope: String,
    calls: Mutex<Vec<ScriptedCall>>,
    writes: Mutex<Vec<ScriptedWrite>>,
    next_id: AtomicU64,
}

impl ScriptedStore {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            calls: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        lock(&self.calls).clone()
    }

    pub fn call(&self, index: usize) -> Option<ScriptedCall> {
        lock(&self.calls).get(index).cloned()
    }

    pub fn last_call(&self) -> Option<ScriptedCall> {
        lock(&self.calls).last().cloned()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Live subscriptions not yet cancelled.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.live && !call.is_cancelled())
            .count()
    }

    pub fn writes(&self) -> Vec<ScriptedWrite> {
        lock(&self.writes).clone()
    }

    fn record(&self, source: &Source, listener: SnapshotListener, live: bool) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        lock(&self.calls).push(ScriptedCall {
            source: source.clone(),
            live,
            listener,
            cancelled: Arc::clone(&cancelled),
        });
        cancelled
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn get(&self, source: &Source, listener: SnapshotListener) {
        self.record(source, listener, false);
    }

    fn subscribe(&self, source: &Source, listener: SnapshotListener) -> Subscription {
        let cancelled = self.record(source, listener, true);
        Subscription::new(move || cancelled.store(true, Ordering::SeqCst))
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        lock(&self.writes).push(ScriptedWrite::Set(path.clone(), fields));
        Ok(())
    }

    async fn update(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        lock(&self.writes).push(ScriptedWrite::Update(path.clone(), fields));
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        lock(&self.writes).push(ScriptedWrite::Delete(path.clone()));
        Ok(())
    }

    async fn delete_fields(&self, path: &DocPath, fields: Vec<String>) -> StoreResult<()> {
        lock(&self.writes).push(ScriptedWrite::DeleteFields(path.clone(), fields));
        Ok(())
    }

    fn new_document_id(&self, _collection: &CollectionPath) -> String {
        format!("doc{:04}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

// ============================================================================
// RECORDING CALLBACKS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    RecordCreated(Uid),
    RecordDestroyed(Uid),
    SubAttached(Uid, String),
    SubDetached(Uid, String),
    CollectionAdded(Option<Uid>),
    CollectionRemoved(Option<Uid>),
    CollectionModified(Option<Uid>),
    CollectionSettled,
    DocumentUpdated(Option<Uid>),
    DocumentMissing(Uid),
    InstanceCreated(InstanceId),
    InstanceDestroyed(InstanceId),
    InvalidOperation(Operation),
    StoreError(StoreError),
}

#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, matches: impl Fn(&CallbackEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|event| matches(event)).count()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn push(&self, event: CallbackEvent) {
        lock(&self.events).push(event);
    }
}

impl Callbacks for RecordingCallbacks {
    fn on_record_created(&self, uid: &Uid) {
        self.push(CallbackEvent::RecordCreated(uid.clone()));
    }

    fn on_record_destroyed(&self, uid: &Uid) {
        self.push(CallbackEvent::RecordDestroyed(uid.clone()));
    }

    fn on_sub_attached(&self, uid: &Uid, sub: &str) {
        self.push(CallbackEvent::SubAttached(uid.clone(), sub.to_string()));
    }

    fn on_sub_detached(&self, uid: &Uid, sub: &str) {
        self.push(CallbackEvent::SubDetached(uid.clone(), sub.to_string()));
    }

    fn on_collection_added(&self, _target: &Target, doc: &Document) {
        self.push(CallbackEvent::CollectionAdded(doc.uid().cloned()));
    }

    fn on_collection_removed(&self, _target: &Target, doc: &Document) {
        self.push(CallbackEvent::CollectionRemoved(doc.uid().cloned()));
    }

    fn on_collection_modified(&self, _target: &Target, doc: &Document) {
        self.push(CallbackEvent::CollectionModified(doc.uid().cloned()));
    }

    fn on_collection_settled(&self, _target: &Target) {
        self.push(CallbackEvent::CollectionSettled);
    }

    fn on_document_updated(&self, doc: &Document) {
        self.push(CallbackEvent::DocumentUpdated(doc.uid().cloned()));
    }

    fn on_document_missing(&self, uid: &Uid) {
        self.push(CallbackEvent::DocumentMissing(uid.clone()));
    }

    fn on_instance_created(&self, instance: InstanceId) {
        self.push(CallbackEvent::InstanceCreated(instance));
    }

    fn on_instance_destroyed(&self, instance: InstanceId) {
        self.push(CallbackEvent::InstanceDestroyed(instance));
    }

    fn on_invalid_operation(&self, operation: Operation, _data: &Document) {
        self.push(CallbackEvent::InvalidOperation(operation));
    }

    fn on_store_error(&self, error: &StoreError) {
        self.push(CallbackEvent::StoreError(error.clone()));
    }
}

// ============================================================================
// RECORDING MUTATION
// ============================================================================

/// Mutation hooks that count edits and the batches wrapping them.
#[derive(Debug, Default)]
pub struct RecordingMutation {
    depth: AtomicUsize,
    batches: AtomicUsize,
    edits: AtomicUsize,
    edits_outside_batch: AtomicUsize,
    removed_names: Mutex<Vec<(InstanceId, String)>>,
}

impl RecordingMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn edits(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }

    pub fn edits_outside_batch(&self) -> usize {
        self.edits_outside_batch.load(Ordering::SeqCst)
    }

    pub fn removed_names(&self) -> Vec<(InstanceId, String)> {
        lock(&self.removed_names).clone()
    }

    fn note(&self) {
        self.edits.fetch_add(1, Ordering::SeqCst);
        if self.depth.load(Ordering::SeqCst) == 0 {
            self.edits_outside_batch.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl MutationSystem for RecordingMutation {
    fn set_field(&self, doc: &Document, field: &str, value: Value) {
        self.note();
        doc.set(field, value);
    }

    fn remove_field(&self, doc: &Document, field: &str) {
        self.note();
        doc.remove(field);
    }

    fn set_sub(&self, doc: &Document, name: &str, target: Target) {
        self.note();
        doc.set_sub(name, target);
    }

    fn remove_sub(&self, doc: &Document, name: &str) {
        self.note();
        doc.remove_sub(name);
    }

    fn sequence_insert(&self, seq: &Sequence, index: usize, doc: DocRef) {
        self.note();
        seq.insert(index, doc);
    }

    fn sequence_set(&self, seq: &Sequence, index: usize, doc: DocRef) {
        self.note();
        seq.set(index, doc);
    }

    fn sequence_remove(&self, seq: &Sequence, index: usize) -> Option<DocRef> {
        self.note();
        seq.remove(index)
    }

    fn sequence_move(&self, seq: &Sequence, from: usize, to: usize) {
        self.note();
        seq.move_item(from, to);
    }

    fn sequence_truncate(&self, seq: &Sequence, len: usize) {
        self.note();
        seq.truncate(len);
    }

    fn mapping_set(&self, map: &Mapping, key: &str, doc: DocRef) {
        self.note();
        map.insert(key, doc);
    }

    fn mapping_remove(&self, map: &Mapping, key: &str) -> Option<DocRef> {
        self.note();
        map.remove(key)
    }

    fn mapping_clear(&self, map: &Mapping) {
        self.note();
        map.clear();
    }

    fn remove_named(&self, instance: InstanceId, name: &str) {
        lock(&self.removed_names).push((instance, name.to_string()));
    }

    fn batch(&self, apply: &mut dyn FnMut()) {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.depth.fetch_add(1, Ordering::SeqCst);
        apply();
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tessera types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a scalar JSON field value.
    pub fn arb_field_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| Value::from(n)),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    /// Generate a small field map.
    pub fn arb_fields() -> impl Strategy<Value = Fields> {
        proptest::collection::btree_map("[a-z]{1,6}", arb_field_value(), 0..5)
            .prop_map(|map| map.into_iter().collect())
    }

    /// Generate a set of distinct document ids.
    pub fn arb_doc_ids(max: usize) -> impl Strategy<Value = Vec<String>> {
        proptest::collection::btree_set("[a-z0-9]{1,4}", 0..max)
            .prop_map(|ids| ids.into_iter().collect())
    }

    /// One step of an instance/entry lifecycle script.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RefOp {
        /// Bind document `doc` in instance `instance`.
        Bind { instance: usize, doc: usize },
        /// Free the first entry of `instance` bound to `doc`.
        Free { instance: usize, doc: usize },
        /// Destroy and recreate `instance`.
        Destroy { instance: usize },
    }

    /// Generate a lifecycle script over `instances` instances and `docs` documents.
    pub fn arb_ref_ops(instances: usize, docs: usize, len: usize) -> impl Strategy<Value = Vec<RefOp>> {
        let op = prop_oneof![
            4 => (0..instances, 0..docs).prop_map(|(instance, doc)| RefOp::Bind { instance, doc }),
            3 => (0..instances, 0..docs).prop_map(|(instance, doc)| RefOp::Free { instance, doc }),
            1 => (0..instances).prop_map(|instance| RefOp::Destroy { instance }),
        ];
        proptest::collection::vec(op, 0..len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-seeded stores for common scenarios.

    use super::*;
    use serde_json::json;

    /// Three todos with ids `1`, `2`, `3`.
    pub fn todos_store() -> InMemoryStore {
        InMemoryStore::with_documents(
            "todos-db",
            vec![
                ("todos/1", json!({"name": "T1", "done": false})),
                ("todos/2", json!({"name": "T2", "done": true})),
                ("todos/3", json!({"name": "T3", "done": false})),
            ],
        )
    }

    /// Posts with nested comments and likes.
    pub fn blog_store() -> InMemoryStore {
        InMemoryStore::with_documents(
            "blog-db",
            vec![
                ("posts/1", json!({"title": "First", "rank": 1})),
                ("posts/2", json!({"title": "Second", "rank": 2})),
                ("posts/1/comments/1", json!({"text": "nice"})),
                ("posts/1/comments/2", json!({"text": "agreed"})),
                ("posts/1/comments/1/likes/1", json!({"by": "ana"})),
                ("posts/2/comments/3", json!({"text": "hmm"})),
                ("posts/1/settings", json!({"pinned": true})),
            ],
        )
    }

    /// `count` tasks ordered by their `order` field.
    pub fn tasks_store(count: usize) -> InMemoryStore {
        let store = InMemoryStore::new("tasks-db");
        for i in 1..=count {
            store.insert(&format!("tasks/t{i:02}"), json!({"name": format!("task {i}"), "order": i}));
        }
        store
    }

    pub fn snapshot(path: &str, data: Value) -> DocumentSnapshot {
        DocumentSnapshot::existing(path, data)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for tessera-specific results.

    use super::*;

    /// Document ids held by a sequence target, in order.
    pub fn sequence_ids(target: &Target) -> Vec<String> {
        target
            .documents()
            .iter()
            .filter_map(|doc| doc.uid().map(|uid| uid.path().id().to_string()))
            .collect()
    }

    #[track_caller]
    pub fn assert_ids(target: &Target, expected: &[&str]) {
        let actual = sequence_ids(target);
        assert_eq!(actual, expected, "unexpected document ids in target");
    }

    #[track_caller]
    pub fn assert_out_of_scope<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Operation(OperationError::OutOfScope { .. })) => {}
            other => panic!("Expected OutOfScope error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_window_error<T: std::fmt::Debug>(result: &TesseraResult<T>, expected: WindowError) {
        match result {
            Err(TesseraError::Window(actual)) => assert_eq!(*actual, expected),
            other => panic!("Expected {:?}, got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_setup_error<T: std::fmt::Debug>(result: &TesseraResult<T>, expected: SetupError) {
        match result {
            Err(TesseraError::Setup(actual)) => assert_eq!(*actual, expected),
            other => panic!("Expected {:?}, got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
