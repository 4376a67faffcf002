//! Instances: the lifecycle unit owning named entries and a per-instance
//! view of the cache records they hold.

use crate::completion::Completion;
use crate::entry::EntryInfo;
use crate::options::EntryOptions;
use crate::{Engine, Shape};
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{
    EntryId, InstanceId, OperationError, RecordId, SetupError, Target, TesseraResult, Uid,
};
use tracing::debug;

pub(crate) struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) entry: BTreeMap<String, EntryId>,
    /// Stable slots; removed entries leave `None` behind.
    pub(crate) entry_list: Vec<Option<EntryId>>,
    /// Records this instance is credited on.
    pub(crate) cache: BTreeMap<Uid, RecordId>,
    pub(crate) definitions: BTreeMap<String, Arc<EntryOptions>>,
}

impl Instance {
    fn new(id: InstanceId) -> Self {
        Self {
            id,
            entry: BTreeMap::new(),
            entry_list: Vec::new(),
            cache: BTreeMap::new(),
            definitions: BTreeMap::new(),
        }
    }
}

impl Engine {
    pub fn create_instance(&mut self) -> InstanceId {
        let id = InstanceId::new(self.next_id());
        self.instances.insert(id, Instance::new(id));
        self.callbacks.on_instance_created(id);
        debug!(instance = %id, "instance created");
        id
    }

    /// Registers named options visible only inside `instance`. They shadow
    /// engine-wide definitions of the same name.
    pub fn define_for(
        &mut self,
        instance: InstanceId,
        name: impl Into<String>,
        options: EntryOptions,
    ) -> TesseraResult<()> {
        let inst = self
            .instances
            .get_mut(&instance)
            .ok_or(SetupError::UnknownInstance)?;
        inst.definitions.insert(name.into(), Arc::new(options));
        Ok(())
    }

    /// Releases every record the instance holds and closes its entries.
    pub fn destroy_instance(&mut self, id: InstanceId) -> bool {
        let Some(inst) = self.instances.get_mut(&id) else {
            return false;
        };
        inst.definitions.clear();
        self.hand_over_shared_subs(id);
        let held: Vec<RecordId> = self
            .instances
            .get(&id)
            .map(|inst| inst.cache.values().copied().collect())
            .unwrap_or_default();

        for rid in held {
            self.release_from_instance(rid, id, true);
        }

        let entries: Vec<EntryId> = self
            .instances
            .get(&id)
            .map(|inst| inst.entry_list.iter().rev().flatten().copied().collect())
            .unwrap_or_default();
        for eid in entries {
            self.close_entry(eid, true);
        }

        if let Some(inst) = self.instances.remove(&id) {
            debug!(instance = %inst.id, "instance destroyed");
        }
        self.callbacks.on_instance_destroyed(id);
        true
    }

    /// Moves every sub entry of `id` that some other instance's entry still
    /// requires over to that instance, nested subs included.
    fn hand_over_shared_subs(&mut self, id: InstanceId) {
        while let Some((eid, heir)) = self.shared_sub(id) {
            self.hand_over(eid, id, heir);
        }
    }

    fn shared_sub(&self, id: InstanceId) -> Option<(EntryId, InstanceId)> {
        let inst = self.instances.get(&id)?;
        inst.entry_list.iter().flatten().find_map(|eid| {
            let record = self.cache.get(self.entries.get(eid)?.parent?)?;
            let (name, _) = record.sub.iter().find(|(_, sub)| *sub == eid)?;
            record.entries.iter().find_map(|holder| {
                let holder = self.entries.get(holder)?;
                (holder.instance != id && holder.options.sub.contains_key(name))
                    .then_some((*eid, holder.instance))
            })
        })
    }

    fn hand_over(&mut self, eid: EntryId, from: InstanceId, to: InstanceId) {
        let Some((name, index, children)) = self.entries.get(&eid).map(|entry| {
            let children: Vec<(Uid, RecordId)> =
                entry.children.iter().map(|(uid, rid)| (uid.clone(), *rid)).collect();
            (entry.name.clone(), entry.index, children)
        }) else {
            return;
        };

        if let Some(old) = self.instances.get_mut(&from) {
            if let Some(slot) = index.and_then(|i| old.entry_list.get_mut(i)) {
                *slot = None;
            }
            if let Some(name) = &name {
                if old.entry.get(name) == Some(&eid) {
                    old.entry.remove(name);
                }
            }
        }

        let Some(heir) = self.instances.get_mut(&to) else {
            return;
        };
        heir.entry_list.push(Some(eid));
        let new_index = heir.entry_list.len() - 1;
        if let Some(name) = &name {
            heir.entry.entry(name.clone()).or_insert(eid);
        }
        for (uid, rid) in children {
            if heir.cache.contains_key(&uid) {
                continue;
            }
            heir.cache.insert(uid, rid);
            if let Some(record) = self.cache.get_mut(rid) {
                record.uses += 1;
            }
        }

        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.instance = to;
            entry.index = Some(new_index);
        }
        debug!(entry = %eid, from = %from, to = %to, "sub-collection entry handed over");
    }

    /// Closes the entry behind `target` and releases what it held.
    pub fn free(&mut self, instance: InstanceId, target: &Target) -> bool {
        match self.entry_for(instance, target) {
            Some(eid) => {
                self.close_entry(eid, true);
                true
            }
            None => false,
        }
    }

    /// Requeries the entry behind `target` with its base query, or re-reads
    /// its document.
    pub fn refresh(
        &mut self,
        instance: InstanceId,
        target: &Target,
    ) -> TesseraResult<Completion<Target>> {
        let eid = self
            .entry_for(instance, target)
            .ok_or(OperationError::UnknownTarget)?;
        let entry = self.entries.get(&eid).ok_or(OperationError::UnknownTarget)?;
        match (entry.shape, entry.query.clone()) {
            (Shape::Document, _) => {
                self.start_document(eid)?;
            }
            (_, Some(query)) => self.requery_entry(eid, query),
            (_, None) => {
                self.start_collection(eid)?;
            }
        }
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.live = true;
        }
        Ok(self.entry_completion(eid))
    }

    pub fn entry_for(&self, instance: InstanceId, target: &Target) -> Option<EntryId> {
        let inst = self.instances.get(&instance)?;
        inst.entry_list.iter().flatten().copied().find(|eid| {
            self.entries
                .get(eid)
                .and_then(|entry| entry.target.as_ref())
                .is_some_and(|t| t.same(target))
        })
    }

    pub fn entry_named(&self, instance: InstanceId, name: &str) -> Option<EntryId> {
        self.instances.get(&instance)?.entry.get(name).copied()
    }

    /// Target currently bound under `name`.
    pub fn target_named(&self, instance: InstanceId, name: &str) -> Option<Target> {
        let eid = self.entry_named(instance, name)?;
        self.entries.get(&eid)?.target.clone()
    }

    pub fn entry_info(&self, eid: EntryId) -> Option<EntryInfo> {
        self.entries.get(&eid).map(|entry| entry.info())
    }

    /// The instance's entry slots in creation order, holes included.
    pub fn entry_slots(&self, instance: InstanceId) -> Vec<Option<EntryId>> {
        self.instances
            .get(&instance)
            .map(|inst| inst.entry_list.clone())
            .unwrap_or_default()
    }

    pub fn live_entries(&self) -> usize {
        self.entries.values().filter(|entry| entry.live).count()
    }

    /// UIDs of the records `instance` is credited on.
    pub fn instance_cache(&self, instance: InstanceId) -> Vec<Uid> {
        self.instances
            .get(&instance)
            .map(|inst| inst.cache.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn holds(&self, instance: InstanceId, uid: &Uid) -> bool {
        self.instances
            .get(&instance)
            .is_some_and(|inst| inst.cache.contains_key(uid))
    }

    /// Handle that settles when the entry behind `target` next settles.
    pub fn completion(&mut self, instance: InstanceId, target: &Target) -> Completion<Target> {
        match self.entry_for(instance, target) {
            Some(eid) => self.entry_completion(eid),
            None => Completion::rejected(OperationError::UnknownTarget),
        }
    }

    pub(crate) fn entry_completion(&mut self, eid: EntryId) -> Completion<Target> {
        match self.entries.get_mut(&eid) {
            Some(entry) => entry.completion.handle(),
            None => Completion::rejected(OperationError::UnknownTarget),
        }
    }
}
