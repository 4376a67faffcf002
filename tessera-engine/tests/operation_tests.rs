//! Operation Tests
//!
//! Writes, deletes and builds against cached documents, driven through
//! the scripted store so the exact store calls can be checked.

use serde_json::json;
use std::sync::Arc;
use tessera_engine::{Engine, EntryOptions, Existence, Source, Target};
use tessera_test_utils::assertions::{assert_out_of_scope, assert_store_error};
use tessera_test_utils::fixtures::{blog_store, snapshot};
use tessera_test_utils::{
    fields, CallbackEvent, DocPath, Document, Operation, RecordingCallbacks, ScriptedStore,
    ScriptedWrite, StoreError,
};

fn scripted_with_callbacks() -> (Arc<ScriptedStore>, Arc<RecordingCallbacks>, Engine) {
    let store = Arc::new(ScriptedStore::new("scripted"));
    let callbacks = Arc::new(RecordingCallbacks::new());
    let engine = Engine::builder(store.clone())
        .callbacks(callbacks.clone())
        .build()
        .unwrap();
    (store, callbacks, engine)
}

// ============================================================================
// SCOPE
// ============================================================================

#[tokio::test]
async fn test_out_of_scope_write_never_reaches_store() {
    let (store, callbacks, engine) = scripted_with_callbacks();
    let stray = Document::detached(fields(json!({"name": "stray"})));

    assert_out_of_scope(&engine.write(&stray, None).await);
    assert_eq!(
        callbacks.count(|e| *e == CallbackEvent::InvalidOperation(Operation::Write)),
        1
    );
    assert!(store.writes().is_empty());

    assert_out_of_scope(&engine.delete(&stray, true).await);
    assert_out_of_scope(&engine.locate(&stray, None));
    assert_eq!(
        callbacks.count(|e| matches!(e, CallbackEvent::InvalidOperation(_))),
        3
    );
}

#[tokio::test]
async fn test_write_after_free_is_out_of_scope() {
    let (store, _callbacks, mut engine) = scripted_with_callbacks();
    let instance = engine.create_instance();
    let target = engine
        .bind(instance, Source::doc("todos/1"), EntryOptions::new())
        .unwrap();
    store.last_call().unwrap().push_doc(snapshot("todos/1", json!({"name": "T1"})));
    engine.flush();
    let doc = target.as_document().unwrap().clone();

    engine.free(instance, &target);
    assert_out_of_scope(&engine.write(&doc, None).await);
    assert!(store.writes().is_empty());
}

// ============================================================================
// WRITES
// ============================================================================

#[tokio::test]
async fn test_write_encodes_selected_fields() {
    let (store, _callbacks, mut engine) = scripted_with_callbacks();
    let instance = engine.create_instance();
    let options = EntryOptions::new().key("id").exclude(["draft"]);
    let Target::Document(doc) = engine
        .bind(instance, Source::doc("todos/1"), options)
        .unwrap()
    else {
        panic!("expected a document");
    };
    store
        .last_call()
        .unwrap()
        .push_doc(snapshot("todos/1", json!({"name": "T1", "rank": 1})));
    engine.flush();
    assert_eq!(doc.get("id"), Some(json!("1")));

    doc.set("name", json!("T1!"));
    doc.set("draft", json!(true));
    engine.write(&doc, None).await.unwrap();
    engine.write(&doc, Some(&["rank"][..])).await.unwrap();

    let path = DocPath::new("todos/1");
    assert_eq!(
        store.writes(),
        vec![
            ScriptedWrite::Update(path.clone(), fields(json!({"name": "T1!", "rank": 1}))),
            ScriptedWrite::Update(path, fields(json!({"rank": 1}))),
        ]
    );
}

#[tokio::test]
async fn test_save_picks_mode_from_existence() {
    let (store, _callbacks, mut engine) = scripted_with_callbacks();
    let instance = engine.create_instance();
    let Target::Document(doc) = engine
        .bind(instance, Source::doc("todos/9"), EntryOptions::new())
        .unwrap()
    else {
        panic!("expected a document");
    };
    store
        .last_call()
        .unwrap()
        .push_doc(tessera_test_utils::DocumentSnapshot::missing("todos/9"));
    engine.flush();
    assert_eq!(engine.record_of(&doc).unwrap().exists, Existence::Missing);

    doc.set("name", json!("T9"));
    engine.save(&doc, None).await.unwrap();
    assert_eq!(
        store.writes(),
        vec![ScriptedWrite::Set(
            DocPath::new("todos/9"),
            fields(json!({"name": "T9"}))
        )]
    );
}

#[tokio::test]
async fn test_store_write_failure_rejects() {
    let store = blog_store();
    let mut engine = Engine::new(Arc::new(store.clone()));
    let instance = engine.create_instance();
    let target = engine
        .bind(instance, Source::doc("posts/2"), EntryOptions::new())
        .unwrap();
    engine.flush();
    let doc = target.as_document().unwrap().clone();

    store.fail_next_write(StoreError::PermissionDenied {
        path: "posts/2".to_string(),
    });
    doc.set("title", json!("Changed"));
    assert_store_error(&engine.write(&doc, None).await);
    assert_eq!(store.document("posts/2"), Some(json!({"title": "Second", "rank": 2})));
}

// ============================================================================
// BUILD / CREATE
// ============================================================================

#[tokio::test]
async fn test_create_sub_joins_live_sub_collection() {
    let store = blog_store();
    let mut engine = Engine::new(Arc::new(store.clone()));
    let instance = engine.create_instance();
    let options = EntryOptions::new().sub("comments", EntryOptions::new());
    let Target::Document(post) = engine
        .bind(instance, Source::doc("posts/1"), options)
        .unwrap()
    else {
        panic!("expected a document");
    };
    engine.flush();

    let (comment, written) = engine
        .create_sub(&post, "comments", Some(fields(json!({"text": "third"}))))
        .unwrap();
    written.await.unwrap();
    engine.flush();

    let comments = post.sub("comments").unwrap();
    assert_eq!(comments.documents().len(), 3);
    assert!(comments.documents().iter().any(|doc| Arc::ptr_eq(doc, &comment)));
    assert_eq!(engine.record_of(&comment).unwrap().exists, Existence::Exists);
}

#[test]
fn test_build_sub_requires_configured_sub() {
    let mut engine = Engine::new(Arc::new(blog_store()));
    let instance = engine.create_instance();
    let target = engine
        .bind(instance, Source::doc("posts/1"), EntryOptions::new())
        .unwrap();
    engine.flush();
    let post = target.as_document().unwrap().clone();

    assert!(engine.build_sub(&post, "comments", None).is_err());
    assert!(engine.locate(&post, Some("comments")).is_err());
}

#[test]
fn test_locate_sub_collection() {
    let mut engine = Engine::new(Arc::new(blog_store()));
    let instance = engine.create_instance();
    let options = EntryOptions::new().sub("comments", EntryOptions::new());
    let target = engine
        .bind(instance, Source::doc("posts/2"), options)
        .unwrap();
    engine.flush();
    let post = target.as_document().unwrap().clone();

    assert_eq!(
        engine.locate(&post, Some("comments")).unwrap(),
        Source::collection("posts/2/comments")
    );
    assert_eq!(engine.locate(&post, None).unwrap(), Source::doc("posts/2"));
}

#[tokio::test]
async fn test_create_named_writes_with_defaults() {
    let (store, _callbacks, mut engine) = scripted_with_callbacks();
    let instance = engine.create_instance();
    let options = EntryOptions::new()
        .key("id")
        .default_value("done", json!(false));
    engine
        .bind_named(instance, "todos", Source::collection("todos"), options)
        .unwrap();

    let (doc, written) = engine
        .create_named(instance, "todos", Some(fields(json!({"name": "new"}))))
        .unwrap();
    written.await.unwrap();

    let path = DocPath::new("todos/doc0001");
    assert_eq!(doc.get("id"), Some(json!("doc0001")));
    assert_eq!(
        store.writes(),
        vec![ScriptedWrite::Set(path, fields(json!({"name": "new", "done": false})))]
    );
}
