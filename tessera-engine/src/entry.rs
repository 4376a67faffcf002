//! Entries: one bound subscription each.

use crate::completion::CompletionSlot;
use crate::options::EntryOptions;
use crate::Engine;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{EntryId, InstanceId, RecordId, Target, Ticket, Uid};
use tessera_store::{DocumentSnapshot, Query, Source, Subscription};
use tracing::debug;

/// Which handler projects an entry's snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Document,
    Sequence,
    Mapping,
    Stream { keyed: bool },
}

impl Shape {
    pub fn select(source: &Source, options: &EntryOptions) -> Self {
        match source {
            Source::Document(_) => Shape::Document,
            Source::Query(_) if options.stream => Shape::Stream { keyed: options.map },
            Source::Query(_) if options.map => Shape::Mapping,
            Source::Query(_) => Shape::Sequence,
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, Shape::Mapping | Shape::Stream { keyed: true })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Initial,
    Incremental,
}

pub(crate) struct Entry {
    pub(crate) id: EntryId,
    pub(crate) instance: InstanceId,
    pub(crate) name: Option<String>,
    pub(crate) source: Source,
    pub(crate) options: Arc<EntryOptions>,
    pub(crate) shape: Shape,
    pub(crate) live: bool,
    pub(crate) target: Option<Target>,
    /// Source query with the options' modifier applied.
    pub(crate) query: Option<Query>,
    /// Query the current read was issued with.
    pub(crate) active_query: Option<Query>,
    pub(crate) first: Option<DocumentSnapshot>,
    pub(crate) last: Option<DocumentSnapshot>,
    pub(crate) off: Option<Subscription>,
    pub(crate) live_ticket: Option<Ticket>,
    pub(crate) reads: Vec<Ticket>,
    pub(crate) index: Option<usize>,
    pub(crate) children: BTreeMap<Uid, RecordId>,
    /// Record whose sub-collection this entry projects.
    pub(crate) parent: Option<RecordId>,
    pub(crate) has_more: bool,
    pub(crate) completion: CompletionSlot<Target>,
}

/// Read-only view of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub id: EntryId,
    pub instance: InstanceId,
    pub name: Option<String>,
    pub shape: Shape,
    pub live: bool,
    pub index: Option<usize>,
    pub children: Vec<Uid>,
    pub has_more: bool,
    pub first: Option<String>,
    pub last: Option<String>,
    pub pending: bool,
}

impl Entry {
    pub(crate) fn info(&self) -> EntryInfo {
        EntryInfo {
            id: self.id,
            instance: self.instance,
            name: self.name.clone(),
            shape: self.shape,
            live: self.live,
            index: self.index,
            children: self.children.keys().cloned().collect(),
            has_more: self.has_more,
            first: self.first.as_ref().map(|doc| doc.id().to_string()),
            last: self.last.as_ref().map(|doc| doc.id().to_string()),
            pending: self.completion.is_pending(),
        }
    }
}

pub(crate) struct EntrySpec {
    pub(crate) instance: InstanceId,
    pub(crate) source: Source,
    pub(crate) options: Arc<EntryOptions>,
    pub(crate) shape: Shape,
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<RecordId>,
}

impl Engine {
    /// Returns the entry for `spec`, reusing a same-named entry of the
    /// instance when one exists.
    pub(crate) fn open_entry(&mut self, spec: EntrySpec) -> EntryId {
        let existing = spec.name.as_ref().and_then(|name| {
            self.instances
                .get(&spec.instance)
                .and_then(|instance| instance.entry.get(name).copied())
        });

        if let Some(eid) = existing {
            if self.entries.contains_key(&eid) {
                self.close_entry(eid, false);
                let reshaped = self.entries.get(&eid).is_some_and(|e| e.shape != spec.shape);
                if reshaped {
                    self.detach_children(eid);
                }
                if let Some(entry) = self.entries.get_mut(&eid) {
                    if reshaped {
                        entry.target = None;
                        entry.first = None;
                        entry.last = None;
                    }
                    entry.source = spec.source;
                    entry.options = spec.options;
                    entry.shape = spec.shape;
                    entry.query = None;
                    entry.active_query = None;
                    entry.has_more = false;
                    entry.live = true;
                    if spec.parent.is_some() {
                        entry.parent = spec.parent;
                    }
                }
                debug!(entry = %eid, "entry rebound");
                return eid;
            }
        }

        let eid = EntryId::new(self.next_id());
        let index = self.instances.get_mut(&spec.instance).map(|instance| {
            instance.entry_list.push(Some(eid));
            if let Some(name) = &spec.name {
                instance.entry.insert(name.clone(), eid);
            }
            instance.entry_list.len() - 1
        });

        self.entries.insert(
            eid,
            Entry {
                id: eid,
                instance: spec.instance,
                name: spec.name,
                source: spec.source,
                options: spec.options,
                shape: spec.shape,
                live: true,
                target: None,
                query: None,
                active_query: None,
                first: None,
                last: None,
                off: None,
                live_ticket: None,
                reads: Vec::new(),
                index,
                children: BTreeMap::new(),
                parent: spec.parent,
                has_more: false,
                completion: CompletionSlot::default(),
            },
        );
        debug!(entry = %eid, instance = %spec.instance, "entry opened");
        eid
    }

    /// Stops the entry's reads. With `remove`, also releases its records,
    /// unlinks it from its parent record and forgets it.
    pub(crate) fn close_entry(&mut self, eid: EntryId, remove: bool) {
        let Some(entry) = self.entries.get(&eid) else {
            return;
        };
        if !entry.live && !remove {
            return;
        }

        self.cancel_reads(eid);
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.live = false;
        }
        if !remove {
            return;
        }

        let Some((instance, index, name, parent)) = self
            .entries
            .get(&eid)
            .map(|e| (e.instance, e.index, e.name.clone(), e.parent))
        else {
            return;
        };

        if let Some(inst) = self.instances.get_mut(&instance) {
            if let Some(slot) = index.and_then(|i| inst.entry_list.get_mut(i)) {
                *slot = None;
            }
            if let Some(name) = &name {
                if inst.entry.get(name) == Some(&eid) {
                    inst.entry.remove(name);
                }
            }
        }

        self.detach_children(eid);

        if let Some(parent) = parent {
            self.unlink_sub(parent, eid);
        }

        self.entries.remove(&eid);
        debug!(entry = %eid, "entry removed");
    }

    fn detach_children(&mut self, eid: EntryId) {
        let children: Vec<RecordId> = self
            .entries
            .get(&eid)
            .map(|e| e.children.values().copied().collect())
            .unwrap_or_default();
        for rid in children {
            self.detach(eid, rid);
        }
    }

    /// Drops `eid` from its parent record's sub-collections.
    fn unlink_sub(&mut self, parent: RecordId, eid: EntryId) {
        let Some(record) = self.cache.get_mut(parent) else {
            return;
        };
        let names: Vec<String> = record
            .sub
            .iter()
            .filter(|(_, sub)| **sub == eid)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            record.sub.remove(name);
        }
        let uid = record.uid.clone();
        let data = record.data.clone();

        for name in names {
            self.system.remove_sub(&data, &name);
            self.callbacks.on_sub_detached(&uid, &name);
            debug!(uid = %uid, sub = %name, "sub-collection detached");
        }
    }
}
