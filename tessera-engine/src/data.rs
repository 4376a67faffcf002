//! Translation between remote snapshots and local document fields.

use crate::options::EntryOptions;
use crate::Engine;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_core::{DocRef, Document, EntryId, Existence, Fields, RecordId};
use tessera_store::DocumentSnapshot;

/// Local field map for a remote snapshot.
pub(crate) fn parse_document(
    snapshot: &DocumentSnapshot,
    options: &EntryOptions,
    prop_value: &str,
) -> Fields {
    let mut fields = match snapshot.data() {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut fields = Fields::new();
            fields.insert(options.prop_value_or(prop_value).to_string(), other.clone());
            fields
        }
        None => Fields::new(),
    };
    if let Some(key) = &options.key {
        fields.insert(key.clone(), Value::String(snapshot.id().to_string()));
    }
    fields
}

/// Fields of `data` that a write sends to the store.
///
/// An explicit `fields` list wins over the options' include list. Without
/// either, every field is sent except excluded ones, the key, and the
/// value/existence mirrors.
pub(crate) fn encode_data(
    data: &Document,
    options: &EntryOptions,
    fields: Option<&[&str]>,
    prop_value: &str,
) -> Fields {
    let current = data.fields();
    let explicit: Option<Vec<String>> = match fields {
        Some(list) => Some(list.iter().map(|f| f.to_string()).collect()),
        None => options.include.clone(),
    };

    match explicit {
        Some(list) => list
            .into_iter()
            .filter_map(|field| current.get(&field).cloned().map(|value| (field, value)))
            .collect(),
        None => {
            let prop_value = options.prop_value_or(prop_value);
            current
                .into_iter()
                .filter(|(field, _)| {
                    !options.exclude.contains(field)
                        && options.key.as_deref() != Some(field.as_str())
                        && options.prop_exists.as_deref() != Some(field.as_str())
                        && field != prop_value
                })
                .collect()
        }
    }
}

impl Engine {
    /// Applies a remote snapshot to the record's document in place.
    pub(crate) fn refresh_record(
        &mut self,
        rid: RecordId,
        eid: EntryId,
        snapshot: &DocumentSnapshot,
    ) -> Option<DocRef> {
        let (options, parent) = self
            .entries
            .get(&eid)
            .map(|e| (Arc::clone(&e.options), e.parent))?;
        let incoming = parse_document(snapshot, &options, &self.config.prop_value);

        let record = self.cache.get_mut(rid)?;
        let stale: Vec<String> = record
            .remote_fields
            .iter()
            .filter(|field| !incoming.contains_key(field.as_str()))
            .cloned()
            .collect();
        record.remote_fields = incoming.keys().cloned().collect::<BTreeSet<_>>();
        record.exists = Existence::from_exists(snapshot.exists());
        let data = Arc::clone(&record.data);

        for field in stale {
            self.system.remove_field(&data, &field);
        }
        for (field, value) in incoming {
            if data.get(&field).as_ref() != Some(&value) {
                self.system.set_field(&data, &field, value);
            }
        }
        if let Some(prop) = &options.prop_exists {
            self.system
                .set_field(&data, prop, Value::Bool(snapshot.exists()));
        }
        if let Some(parent) = parent.and_then(|p| self.cache.data(p)) {
            data.set_parent(&parent);
        }
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> DocRef {
        match fields {
            Value::Object(map) => Document::detached(map),
            _ => Document::detached(Fields::new()),
        }
    }

    #[test]
    fn test_parse_object_adds_key() {
        let snap = DocumentSnapshot::existing("todos/4", json!({"name": "T4"}));
        let parsed = parse_document(&snap, &EntryOptions::new().key("id"), ".value");
        assert_eq!(parsed.get("id"), Some(&json!("4")));
        assert_eq!(parsed.get("name"), Some(&json!("T4")));
    }

    #[test]
    fn test_parse_scalar_uses_prop_value() {
        let snap = DocumentSnapshot::existing("counters/hits", json!(12));
        let parsed = parse_document(&snap, &EntryOptions::new(), ".value");
        assert_eq!(parsed.get(".value"), Some(&json!(12)));

        let parsed = parse_document(&snap, &EntryOptions::new().prop_value("count"), ".value");
        assert_eq!(parsed.get("count"), Some(&json!(12)));
    }

    #[test]
    fn test_encode_excludes_key_and_mirrors() {
        let data = doc(json!({"id": "1", "name": "T1", "$exists": true, "secret": 1}));
        let options = EntryOptions::new().key("id").prop_exists("$exists").exclude(["secret"]);
        let encoded = encode_data(&data, &options, None, ".value");
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded.get("name"), Some(&json!("T1")));
    }

    #[test]
    fn test_encode_explicit_fields_override_include() {
        let data = doc(json!({"name": "T1", "done": true, "rank": 2}));
        let options = EntryOptions::new().include(["name"]);
        assert_eq!(encode_data(&data, &options, None, ".value").len(), 1);

        let encoded = encode_data(&data, &options, Some(&["done", "rank", "missing"][..]), ".value");
        assert_eq!(encoded.len(), 2);
        assert!(encoded.contains_key("done") && encoded.contains_key("rank"));
    }
}
