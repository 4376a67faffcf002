//! Streaming windows.
//!
//! A stream entry fetches `stream_initial` documents once, then keeps a
//! live subscription bounded at the last loaded document. Each `more` call
//! fetches the next page after that cursor and moves the bound, so the
//! window only grows. The entry's completion settles when the re-bounded
//! subscription delivers the enlarged window.

use crate::completion::Completion;
use crate::engine::ReadKind;
use crate::entry::Phase;
use crate::{Engine, Shape};
use tessera_core::{
    EntryId, InstanceId, OperationError, SetupError, Target, TesseraResult, WindowError,
};
use tessera_store::{Query, QuerySnapshot, Source};
use tracing::debug;

impl Engine {
    pub(crate) fn stream_requery(&mut self, eid: EntryId, query: Query) {
        let Some(limit) = self
            .entries
            .get(&eid)
            .map(|e| e.options.stream_initial.unwrap_or(self.config.stream_initial))
        else {
            return;
        };

        self.cancel_reads(eid);
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.active_query = Some(query.clone());
            entry.has_more = true;
            entry.completion.begin();
        }
        debug!(entry = %eid, limit, "stream opened");
        self.issue_read(
            eid,
            Source::Query(query.limit(limit)),
            ReadKind::StreamPage {
                limit,
                initial: true,
            },
            false,
        );
    }

    pub(crate) fn on_stream_page(
        &mut self,
        eid: EntryId,
        limit: usize,
        initial: bool,
        snapshot: &QuerySnapshot,
    ) {
        let has_more = snapshot.size() >= limit;
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.has_more = has_more;
        }
        if initial {
            self.project_initial(eid, snapshot);
        } else if let Some(last) = snapshot.last() {
            if let Some(entry) = self.entries.get_mut(&eid) {
                entry.last = Some(last.clone());
            }
        }
        debug!(entry = %eid, size = snapshot.size(), has_more, "stream page loaded");
        self.bound_stream(eid, limit);
    }

    /// Re-opens the window's read bounded at the last loaded document.
    fn bound_stream(&mut self, eid: EntryId, limit: usize) {
        let Some((active, last, once)) = self
            .entries
            .get(&eid)
            .map(|e| (e.active_query.clone(), e.last.clone(), e.options.once))
        else {
            return;
        };
        let Some(active) = active else {
            return;
        };
        let bounded = match last {
            Some(last) => active.end_at(last),
            None => active.limit(limit),
        };

        self.cancel_subscription(eid);
        self.issue_read(
            eid,
            Source::Query(bounded),
            ReadKind::Collection {
                phase: Phase::Initial,
            },
            !once,
        );
    }

    /// Grows a stream entry by `count` documents, or by its configured
    /// page size when `count` is `None`.
    pub fn more(
        &mut self,
        instance: InstanceId,
        target: &Target,
        count: Option<usize>,
    ) -> TesseraResult<Completion<Target>> {
        let eid = self
            .entry_for(instance, target)
            .ok_or(OperationError::UnknownTarget)?;
        let entry = self.entries.get(&eid).ok_or(OperationError::UnknownTarget)?;
        if !matches!(entry.shape, Shape::Stream { .. }) {
            return Err(SetupError::NotStreaming.into());
        }
        let limit = count
            .or(entry.options.stream_more)
            .unwrap_or(self.config.stream_more);
        if limit == 0 {
            return Err(SetupError::StreamRequiresMore.into());
        }

        let (Some(active), Some(last)) = (entry.active_query.clone(), entry.last.clone()) else {
            return Ok(Completion::rejected(WindowError::NoMoreResults));
        };
        if !entry.has_more {
            return Ok(Completion::rejected(WindowError::NoMoreResults));
        }

        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.completion.begin();
        }
        debug!(entry = %eid, limit, after = %last.id(), "stream more");
        self.issue_read(
            eid,
            Source::Query(active.start_after(last).limit(limit)),
            ReadKind::StreamPage {
                limit,
                initial: false,
            },
            false,
        );
        Ok(self.entry_completion(eid))
    }

    /// Whether the stream behind `target` may have further documents.
    pub fn has_more(&self, instance: InstanceId, target: &Target) -> bool {
        self.entry_for(instance, target)
            .and_then(|eid| self.entries.get(&eid))
            .is_some_and(|entry| entry.has_more)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, EntryOptions};
    use std::sync::Arc;
    use tessera_core::{SetupError, WindowError};
    use tessera_store::{Direction, Query, Source};
    use tessera_test_utils::assertions::{assert_ids, assert_window_error};
    use tessera_test_utils::fixtures::tasks_store;

    fn ordered() -> Source {
        Source::Query(Query::collection("tasks").order_by("order", Direction::Ascending))
    }

    #[tokio::test]
    async fn test_stream_window_grows_until_exhausted() {
        let mut engine = Engine::new(Arc::new(tasks_store(5)));
        let instance = engine.create_instance();
        let target = engine
            .bind(instance, ordered(), EntryOptions::new().stream(2, 2))
            .unwrap();
        let first = engine.completion(instance, &target);
        engine.flush();
        assert!(first.await.is_ok());
        assert_ids(&target, &["t01", "t02"]);
        assert!(engine.has_more(instance, &target));

        let more = engine.more(instance, &target, None).unwrap();
        engine.flush();
        assert!(more.await.is_ok());
        assert_ids(&target, &["t01", "t02", "t03", "t04"]);

        let more = engine.more(instance, &target, None).unwrap();
        engine.flush();
        assert!(more.await.is_ok());
        assert_eq!(target.documents().len(), 5);
        assert!(!engine.has_more(instance, &target));

        let exhausted = engine.more(instance, &target, None).unwrap().await;
        assert_window_error(&exhausted, WindowError::NoMoreResults);
    }

    #[test]
    fn test_more_on_plain_entry_is_a_setup_error() {
        let mut engine = Engine::new(Arc::new(tasks_store(3)));
        let instance = engine.create_instance();
        let target = engine.bind(instance, ordered(), EntryOptions::new()).unwrap();
        engine.flush();
        let result = engine.more(instance, &target, Some(2));
        assert_eq!(result.err(), Some(SetupError::NotStreaming.into()));
    }

    #[test]
    fn test_stream_uses_config_page_size() {
        let mut engine = Engine::new(Arc::new(tasks_store(30)));
        let instance = engine.create_instance();
        let target = engine
            .bind(instance, ordered(), EntryOptions::new().streaming())
            .unwrap();
        engine.flush();
        assert_eq!(target.documents().len(), engine.config().stream_initial);
    }
}
