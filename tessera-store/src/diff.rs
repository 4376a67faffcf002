//! Sequential change lists between two query results.
//!
//! Applying the returned changes in order to a list that matches `previous`
//! yields a list that matches `current`: removals first (each index taken
//! against the list with earlier removals applied), then additions and
//! moves walking `current` from the front.

use crate::snapshot::{DocumentChange, DocumentSnapshot};
use tessera_core::DocPath;

/// `removed_state` supplies the snapshot reported for a document that left
/// the result: its current state if it still exists outside the query.
pub fn diff_results<F>(
    previous: &[DocumentSnapshot],
    current: &[DocumentSnapshot],
    removed_state: F,
) -> Vec<DocumentChange>
where
    F: Fn(&DocPath) -> DocumentSnapshot,
{
    let mut changes = Vec::new();
    let mut working: Vec<DocumentSnapshot> = previous.to_vec();

    let mut index = 0;
    while index < working.len() {
        let path = working[index].path().clone();
        if current.iter().any(|doc| doc.path() == &path) {
            index += 1;
        } else {
            working.remove(index);
            changes.push(DocumentChange::removed(removed_state(&path), index));
        }
    }

    for (position, doc) in current.iter().enumerate() {
        match working.iter().position(|existing| existing.path() == doc.path()) {
            Some(found) if found == position => {
                if working[found].data() != doc.data() {
                    changes.push(DocumentChange::modified(doc.clone(), position, position));
                    working[found] = doc.clone();
                }
            }
            Some(found) => {
                working.remove(found);
                working.insert(position, doc.clone());
                changes.push(DocumentChange::modified(doc.clone(), found, position));
            }
            None => {
                working.insert(position, doc.clone());
                changes.push(DocumentChange::added(doc.clone(), position));
            }
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChangeKind;
    use proptest::prelude::*;
    use serde_json::json;

    fn snap(id: &str, v: i64) -> DocumentSnapshot {
        DocumentSnapshot::existing(format!("c/{id}").as_str(), json!({ "v": v }))
    }

    fn apply(previous: &[DocumentSnapshot], changes: &[DocumentChange]) -> Vec<DocumentSnapshot> {
        let mut list = previous.to_vec();
        for change in changes {
            match change.kind {
                ChangeKind::Removed => {
                    list.remove(change.old_index.unwrap());
                }
                ChangeKind::Added => list.insert(change.new_index.unwrap(), change.doc.clone()),
                ChangeKind::Modified => {
                    list.remove(change.old_index.unwrap());
                    list.insert(change.new_index.unwrap(), change.doc.clone());
                }
            }
        }
        list
    }

    #[test]
    fn test_unchanged_result_has_no_changes() {
        let docs = vec![snap("a", 1), snap("b", 2)];
        assert!(diff_results(&docs, &docs, |p| DocumentSnapshot::missing(p.clone())).is_empty());
    }

    #[test]
    fn test_add_modify_remove() {
        let previous = vec![snap("a", 1), snap("b", 2), snap("c", 3)];
        let current = vec![snap("z", 0), snap("a", 9), snap("b", 2)];
        let changes = diff_results(&previous, &current, |p| DocumentSnapshot::missing(p.clone()));

        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert_eq!(changes[0].old_index, Some(2));
        assert!(!changes[0].doc.exists());
        assert_eq!(changes[1].kind, ChangeKind::Added);
        assert_eq!(changes[1].new_index, Some(0));
        assert_eq!(changes[2].kind, ChangeKind::Modified);
        assert_eq!((changes[2].old_index, changes[2].new_index), (Some(1), Some(1)));
        assert_eq!(apply(&previous, &changes), current);
    }

    #[test]
    fn test_move_reports_indices() {
        let previous = vec![snap("a", 1), snap("b", 2)];
        let current = vec![snap("b", 2), snap("a", 1)];
        let changes = diff_results(&previous, &current, |p| DocumentSnapshot::missing(p.clone()));
        assert_eq!(changes.len(), 1);
        assert_eq!((changes[0].old_index, changes[0].new_index), (Some(1), Some(0)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_changes_transform_previous_into_current(
            before in proptest::sample::subsequence(vec!["a", "b", "c", "d", "e", "f"], 0..6),
            after in proptest::sample::subsequence(vec!["a", "b", "c", "d", "e", "f"], 0..6),
            shuffle in any::<bool>(),
            bump in any::<bool>(),
        ) {
            let previous: Vec<_> = before.iter().map(|id| snap(id, 1)).collect();
            let mut current: Vec<_> = after
                .iter()
                .map(|id| snap(id, if bump { 2 } else { 1 }))
                .collect();
            if shuffle {
                current.reverse();
            }
            let changes = diff_results(&previous, &current, |p| DocumentSnapshot::missing(p.clone()));
            prop_assert_eq!(apply(&previous, &changes), current);
        }
    }
}
