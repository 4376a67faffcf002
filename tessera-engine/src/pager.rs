//! Cursor-based paging over an ordered query entry.
//!
//! Every page turn is a full requery of the same entry: `next` starts after
//! the last loaded document, `prev` returns to the first cursor recorded
//! when the previous page was left. With a `query_reverse` option, `prev`
//! instead runs the reversed query backwards from the current first
//! document and restarts at the earliest document it returns.

use crate::completion::Completion;
use crate::engine::ReadKind;
use crate::{Engine, Shape};
use tessera_core::{
    EntryId, InstanceId, OperationError, SetupError, Target, TesseraResult, WindowError,
};
use tessera_store::{DocumentSnapshot, Query, QuerySnapshot, Source};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Pager {
    entry: EntryId,
    base: Query,
    index: usize,
    history: Vec<DocumentSnapshot>,
}

impl Pager {
    pub fn entry(&self) -> EntryId {
        self.entry
    }

    /// Zero-based page number.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_query(&self, engine: &Engine) -> bool {
        engine
            .entries
            .get(&self.entry)
            .is_some_and(|entry| entry.active_query.is_some())
    }

    pub fn has_data(&self, engine: &Engine) -> bool {
        engine
            .entries
            .get(&self.entry)
            .and_then(|entry| entry.target.as_ref())
            .is_some_and(|target| !target.is_empty())
    }

    pub fn has_next(&self, engine: &Engine) -> bool {
        self.has_query(engine) && self.has_data(engine)
    }

    pub fn has_prev(&self, engine: &Engine) -> bool {
        self.has_query(engine) && self.index > 0
    }

    pub fn next(&mut self, engine: &mut Engine) -> Completion<Target> {
        if !self.has_next(engine) {
            return Completion::rejected(WindowError::NoNextPage);
        }
        let Some((first, last)) = engine
            .entries
            .get(&self.entry)
            .map(|entry| (entry.first.clone(), entry.last.clone()))
        else {
            return Completion::rejected(OperationError::UnknownTarget);
        };
        let Some(last) = last else {
            return Completion::rejected(WindowError::NoNextPage);
        };

        self.index += 1;
        if let Some(first) = first {
            self.history.push(first);
        }
        debug!(entry = %self.entry, page = self.index, "next page");
        engine.requery_entry(self.entry, self.base.clone().start_after(last));
        engine.entry_completion(self.entry)
    }

    pub fn prev(&mut self, engine: &mut Engine) -> Completion<Target> {
        if !self.has_prev(engine) {
            return Completion::rejected(WindowError::NoPreviousPage);
        }
        let Some((reverse, source, first)) = engine.entries.get(&self.entry).map(|entry| {
            (
                entry.options.query_reverse.clone(),
                entry.source.as_query().cloned(),
                entry.first.clone(),
            )
        }) else {
            return Completion::rejected(OperationError::UnknownTarget);
        };

        self.index -= 1;
        debug!(entry = %self.entry, page = self.index, "previous page");

        if let (Some(reverse), Some(source), Some(first)) = (reverse, source, first) {
            self.history.pop();
            engine.cancel_reads(self.entry);
            if let Some(entry) = engine.entries.get_mut(&self.entry) {
                entry.completion.begin();
            }
            engine.issue_read(
                self.entry,
                Source::Query(reverse(source).start_after(first)),
                ReadKind::ReversePage {
                    base: self.base.clone(),
                },
                false,
            );
            return engine.entry_completion(self.entry);
        }

        let cursor = self.history.pop();
        let query = match cursor {
            Some(cursor) if self.index > 0 => self.base.clone().start_at(cursor),
            _ => {
                self.history.clear();
                self.base.clone()
            }
        };
        engine.requery_entry(self.entry, query);
        engine.entry_completion(self.entry)
    }
}

impl Engine {
    /// Pager over the ordered query entry behind `target`.
    pub fn pager(&self, instance: InstanceId, target: &Target) -> TesseraResult<Pager> {
        let eid = self
            .entry_for(instance, target)
            .ok_or(OperationError::UnknownTarget)?;
        let entry = self.entries.get(&eid).ok_or(OperationError::UnknownTarget)?;
        if matches!(entry.shape, Shape::Document | Shape::Stream { .. }) {
            return Err(SetupError::NotPaginated.into());
        }
        let base = entry.query.clone().ok_or(SetupError::NotPaginated)?;
        Ok(Pager {
            entry: eid,
            base,
            index: 0,
            history: Vec::new(),
        })
    }

    /// Restarts the page at the earliest document the reversed read found.
    pub(crate) fn on_reverse_page(&mut self, eid: EntryId, base: Query, snapshot: &QuerySnapshot) {
        let query = match snapshot.last() {
            Some(earliest) => base.start_at(earliest.clone()),
            None => base,
        };
        self.requery_entry(eid, query);
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, EntryOptions};
    use std::sync::Arc;
    use tessera_core::{SetupError, WindowError};
    use tessera_store::{Direction, Query, Source};
    use tessera_test_utils::assertions::{assert_ids, assert_setup_error, assert_window_error};
    use tessera_test_utils::fixtures::tasks_store;

    fn pages() -> Source {
        Source::Query(
            Query::collection("tasks")
                .order_by("order", Direction::Ascending)
                .limit(3),
        )
    }

    #[tokio::test]
    async fn test_pages_forward_and_back() {
        let mut engine = Engine::new(Arc::new(tasks_store(7)));
        let instance = engine.create_instance();
        let target = engine.bind(instance, pages(), EntryOptions::new()).unwrap();
        engine.flush();
        let mut pager = engine.pager(instance, &target).unwrap();
        assert!(pager.has_next(&engine));
        assert!(!pager.has_prev(&engine));

        let turn = pager.next(&mut engine);
        engine.flush();
        assert!(turn.await.is_ok());
        assert_ids(&target, &["t04", "t05", "t06"]);

        let turn = pager.next(&mut engine);
        engine.flush();
        assert!(turn.await.is_ok());
        assert_ids(&target, &["t07"]);
        assert_eq!(pager.index(), 2);

        let turn = pager.prev(&mut engine);
        engine.flush();
        assert!(turn.await.is_ok());
        assert_ids(&target, &["t04", "t05", "t06"]);

        let turn = pager.prev(&mut engine);
        engine.flush();
        assert!(turn.await.is_ok());
        assert_ids(&target, &["t01", "t02", "t03"]);
        assert_window_error(&pager.prev(&mut engine).await, WindowError::NoPreviousPage);
    }

    #[tokio::test]
    async fn test_reverse_query_pages_back() {
        let mut engine = Engine::new(Arc::new(tasks_store(7)));
        let instance = engine.create_instance();
        let options = EntryOptions::new()
            .query(|q| q.order_by("order", Direction::Ascending).limit(3))
            .query_reverse(|q| q.order_by("order", Direction::Descending).limit(3));
        let target = engine
            .bind(instance, Source::collection("tasks"), options)
            .unwrap();
        engine.flush();
        let mut pager = engine.pager(instance, &target).unwrap();

        let turn = pager.next(&mut engine);
        engine.flush();
        assert!(turn.await.is_ok());
        let turn = pager.next(&mut engine);
        engine.flush();
        assert!(turn.await.is_ok());
        assert_ids(&target, &["t07"]);

        let turn = pager.prev(&mut engine);
        engine.flush();
        assert!(turn.await.is_ok());
        assert_ids(&target, &["t04", "t05", "t06"]);
    }

    #[test]
    fn test_document_entries_are_not_paginated() {
        let mut engine = Engine::new(Arc::new(tasks_store(1)));
        let instance = engine.create_instance();
        let target = engine
            .bind(instance, Source::doc("tasks/t01"), EntryOptions::new())
            .unwrap();
        assert_setup_error(&engine.pager(instance, &target), SetupError::NotPaginated);
    }

    #[tokio::test]
    async fn test_next_on_empty_page_is_rejected() {
        let mut engine = Engine::new(Arc::new(tasks_store(0)));
        let instance = engine.create_instance();
        let target = engine.bind(instance, pages(), EntryOptions::new()).unwrap();
        engine.flush();
        let mut pager = engine.pager(instance, &target).unwrap();
        assert_window_error(&pager.next(&mut engine).await, WindowError::NoNextPage);
    }
}
