use crate::Engine;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_core::{EntryId, Mapping, Target};
use tessera_store::{ChangeKind, QuerySnapshot};
use tracing::trace;

impl Engine {
    pub(super) fn mapping_initial(&mut self, eid: EntryId, map: &Arc<Mapping>, snapshot: &QuerySnapshot) {
        let system = Arc::clone(&self.system);
        let mut missing = self.initial_missing(
            eid,
            map.to_map().values().filter_map(|doc| doc.uid().cloned()),
        );

        let incoming: BTreeSet<&str> = snapshot.docs.iter().map(|doc| doc.id()).collect();
        for key in map.keys() {
            if !incoming.contains(key.as_str()) {
                system.mapping_remove(map, &key);
            }
        }

        for doc in &snapshot.docs {
            let Some(data) = self.project_doc(eid, doc) else {
                continue;
            };
            missing.retain(|uid| Some(uid) != data.uid());
            let current = map.get(doc.id());
            if !current.is_some_and(|existing| Arc::ptr_eq(&existing, &data)) {
                system.mapping_set(map, doc.id(), data);
            }
        }

        self.detach_missing(eid, missing);
    }

    pub(super) fn mapping_incremental(
        &mut self,
        eid: EntryId,
        target: &Target,
        map: &Arc<Mapping>,
        snapshot: &QuerySnapshot,
    ) {
        let system = Arc::clone(&self.system);
        let callbacks = Arc::clone(&self.callbacks);

        for change in &snapshot.changes {
            let key = change.doc.id();
            trace!(entry = %eid, key = %key, kind = ?change.kind, "applying keyed change");
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    let Some(data) = self.project_doc(eid, &change.doc) else {
                        continue;
                    };
                    let present = map.get(key).is_some_and(|existing| Arc::ptr_eq(&existing, &data));
                    if !present {
                        system.mapping_set(map, key, Arc::clone(&data));
                    }
                    if change.kind == ChangeKind::Added {
                        callbacks.on_collection_added(target, &data);
                    } else {
                        callbacks.on_collection_modified(target, &data);
                    }
                }
                ChangeKind::Removed => {
                    if let Some(removed) = system.mapping_remove(map, key) {
                        callbacks.on_collection_removed(target, &removed);
                    }
                    self.release_removed(eid, &change.doc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, EntryOptions};
    use serde_json::json;
    use std::sync::Arc;
    use tessera_core::Target;
    use tessera_store::{DocumentChange, DocumentSnapshot, Source};
    use tessera_test_utils::fixtures::snapshot;
    use tessera_test_utils::ScriptedStore;

    #[test]
    fn test_mapping_keys_by_document_id() {
        let store = Arc::new(ScriptedStore::new("scripted"));
        let mut engine = Engine::new(store.clone());
        let instance = engine.create_instance();
        let target = engine
            .bind(instance, Source::collection("users"), EntryOptions::new().map())
            .unwrap();
        let Target::Mapping(map) = &target else {
            panic!("expected a mapping");
        };

        let call = store.last_call().unwrap();
        call.push_initial(vec![
            snapshot("users/ann", json!({"age": 30})),
            snapshot("users/bob", json!({"age": 40})),
        ]);
        engine.flush();
        assert_eq!(map.keys(), vec!["ann".to_string(), "bob".to_string()]);
        let ann = map.get("ann").unwrap();

        call.push_query(
            vec![snapshot("users/ann", json!({"age": 31}))],
            vec![
                DocumentChange::removed(DocumentSnapshot::missing("users/bob"), 1),
                DocumentChange::modified(snapshot("users/ann", json!({"age": 31})), 0, 0),
            ],
        );
        engine.flush();

        assert_eq!(map.keys(), vec!["ann".to_string()]);
        assert!(Arc::ptr_eq(&map.get("ann").unwrap(), &ann));
        assert_eq!(ann.get("age"), Some(json!(31)));
        assert!(engine.record_info(&engine.uid("users/bob")).is_none());
    }
}
