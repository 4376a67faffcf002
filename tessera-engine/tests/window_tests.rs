//! Window Tests
//!
//! Growing stream windows and cursor paging over live ordered queries.

use serde_json::json;
use std::sync::Arc;
use tessera_engine::{Engine, EngineConfig, EntryOptions, InstanceId, Query, Source, Target};
use tessera_store::Direction;
use tessera_test_utils::assertions::{assert_ids, assert_setup_error, assert_window_error};
use tessera_test_utils::fixtures::tasks_store;
use tessera_test_utils::{InMemoryStore, SetupError, WindowError};

fn ordered() -> Source {
    Source::Query(Query::collection("tasks").order_by("order", Direction::Ascending))
}

fn stream_engine(store: &InMemoryStore, options: EntryOptions) -> (Engine, InstanceId, Target) {
    let mut engine = Engine::new(Arc::new(store.clone()));
    let instance = engine.create_instance();
    let target = engine.bind(instance, ordered(), options).unwrap();
    engine.flush();
    (engine, instance, target)
}

// ============================================================================
// STREAMS
// ============================================================================

#[tokio::test]
async fn test_stream_grows_until_exhausted() {
    let store = tasks_store(8);
    let (mut engine, instance, target) = stream_engine(&store, EntryOptions::new().stream(2, 2));
    assert_eq!(target.documents().len(), 2);

    for expected in [4, 6, 8] {
        let grown = engine.more(instance, &target, None).unwrap();
        engine.flush();
        let grown = grown.await.unwrap();
        assert!(grown.same(&target));
        assert_eq!(target.documents().len(), expected);
    }

    // the exact-fit page does not prove exhaustion; the empty one does
    assert!(engine.has_more(instance, &target));
    let empty = engine.more(instance, &target, None).unwrap();
    engine.flush();
    empty.await.unwrap();
    assert!(!engine.has_more(instance, &target));
    assert_eq!(target.documents().len(), 8);

    let done = engine.more(instance, &target, None).unwrap();
    assert_window_error(&done.await, WindowError::NoMoreResults);
}

#[tokio::test]
async fn test_stream_window_stays_live() {
    let store = tasks_store(6);
    let (mut engine, instance, target) = stream_engine(&store, EntryOptions::new().stream(3, 3));
    assert_ids(&target, &["t01", "t02", "t03"]);

    // inside the bound
    store.insert("tasks/t02", json!({"name": "renamed", "order": 2}));
    // past the bound
    store.insert("tasks/t07", json!({"name": "task 7", "order": 7}));
    engine.flush();
    assert_eq!(target.documents()[1].get("name"), Some(json!("renamed")));
    assert_eq!(target.documents().len(), 3);

    let grown = engine.more(instance, &target, Some(10)).unwrap();
    engine.flush();
    grown.await.unwrap();
    assert_eq!(target.documents().len(), 7);
    assert!(!engine.has_more(instance, &target));
}

#[tokio::test]
async fn test_refresh_resets_stream_window() {
    let store = tasks_store(5);
    let (mut engine, instance, target) = stream_engine(&store, EntryOptions::new().stream(2, 2));
    let grown = engine.more(instance, &target, None).unwrap();
    engine.flush();
    grown.await.unwrap();
    assert_eq!(target.documents().len(), 4);

    let refreshed = engine.refresh(instance, &target).unwrap();
    engine.flush();
    refreshed.await.unwrap();
    assert_ids(&target, &["t01", "t02"]);
    assert!(engine.has_more(instance, &target));
}

#[test]
fn test_streaming_uses_engine_page_sizes() {
    let store = tasks_store(10);
    let config = EngineConfig::default()
        .with_stream_initial(3)
        .with_stream_more(4);
    let mut engine = Engine::builder(Arc::new(store))
        .config(config)
        .build()
        .unwrap();
    let instance = engine.create_instance();
    let target = engine
        .bind(instance, ordered(), EntryOptions::new().streaming())
        .unwrap();
    engine.flush();
    assert_eq!(target.documents().len(), 3);

    let grown = engine.more(instance, &target, None).unwrap();
    drop(grown);
    engine.flush();
    assert_eq!(target.documents().len(), 7);
}

#[test]
fn test_stream_setup_errors() {
    let mut engine = Engine::new(Arc::new(tasks_store(2)));
    let instance = engine.create_instance();
    assert_setup_error(
        &engine.bind(instance, Source::doc("tasks/t01"), EntryOptions::new().stream(2, 2)),
        SetupError::StreamRequiresQuery,
    );
    assert_setup_error(
        &engine.bind(instance, ordered(), EntryOptions::new().stream(0, 2)),
        SetupError::StreamRequiresInitial,
    );
    assert_setup_error(
        &engine.bind(instance, ordered(), EntryOptions::new().stream(2, 0)),
        SetupError::StreamRequiresMore,
    );

    let stream = engine
        .bind(instance, ordered(), EntryOptions::new().stream(1, 1))
        .unwrap();
    assert_setup_error(&engine.pager(instance, &stream), SetupError::NotPaginated);
    assert_setup_error(
        &engine.more(instance, &stream, Some(0)).map(|_| ()),
        SetupError::StreamRequiresMore,
    );
}

// ============================================================================
// PAGING
// ============================================================================

#[tokio::test]
async fn test_pager_walks_forward_and_back() {
    let store = tasks_store(8);
    let mut engine = Engine::new(Arc::new(store.clone()));
    let instance = engine.create_instance();
    let target = engine
        .bind(
            instance,
            ordered(),
            EntryOptions::new().query(|q| q.limit(3)),
        )
        .unwrap();
    engine.flush();
    let mut pager = engine.pager(instance, &target).unwrap();
    assert!(!pager.has_prev(&engine));

    let mut pages = vec![tessera_test_utils::assertions::sequence_ids(&target)];
    while pager.has_next(&engine) {
        let turn = pager.next(&mut engine);
        engine.flush();
        turn.await.unwrap();
        pages.push(tessera_test_utils::assertions::sequence_ids(&target));
    }
    assert_eq!(
        pages,
        vec![
            vec!["t01", "t02", "t03"],
            vec!["t04", "t05", "t06"],
            vec!["t07", "t08"],
            vec![],
        ]
    );
    assert_eq!(pager.index(), 3);
    assert_window_error(&pager.next(&mut engine).await, WindowError::NoNextPage);

    let back = pager.prev(&mut engine);
    engine.flush();
    back.await.unwrap();
    assert_ids(&target, &["t07", "t08"]);

    let back = pager.prev(&mut engine);
    engine.flush();
    back.await.unwrap();
    assert_ids(&target, &["t04", "t05", "t06"]);

    // a live remote change lands on the visible page
    store.insert("tasks/t05", json!({"name": "five", "order": 5}));
    engine.flush();
    assert_eq!(target.documents()[1].get("name"), Some(json!("five")));

    let back = pager.prev(&mut engine);
    engine.flush();
    back.await.unwrap();
    assert_ids(&target, &["t01", "t02", "t03"]);
    assert_eq!(pager.index(), 0);
    assert_window_error(&pager.prev(&mut engine).await, WindowError::NoPreviousPage);
}
