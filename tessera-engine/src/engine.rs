//! The engine: owns the registry, every entry and instance, and the inbox
//! that store deliveries land in.
//!
//! Store listeners never touch engine state directly. They push a
//! [`StoreEvent`] tagged with the ticket of the read they answer, and the
//! engine applies events one at a time from [`Engine::flush`] or
//! [`Engine::process_next`]. A ticket that has since been cancelled (entry
//! closed, requeried, page turned) is dropped on arrival.

use crate::cache::CacheRegistry;
use crate::entry::{Entry, EntrySpec, Phase, Shape};
use crate::instance::Instance;
use crate::options::{EntryOptions, OptionsInput};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tessera_core::{
    Callbacks, DirectMutation, EngineConfig, EntryId, InstanceId, MutationSystem, NoopCallbacks,
    OperationError, SetupError, StoreError, Target, TesseraResult, Ticket,
};
use tessera_store::{
    DocumentStore, Query, Snapshot, SnapshotListener, Source, StoreEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub(crate) enum ReadKind {
    Document,
    Collection { phase: Phase },
    StreamPage { limit: usize, initial: bool },
    ReversePage { base: Query },
}

#[derive(Debug, Clone)]
pub(crate) struct PendingRead {
    pub(crate) entry: EntryId,
    pub(crate) kind: ReadKind,
    pub(crate) live: bool,
}

pub struct Engine {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) system: Arc<dyn MutationSystem>,
    pub(crate) callbacks: Arc<dyn Callbacks>,
    pub(crate) config: EngineConfig,
    pub(crate) cache: CacheRegistry,
    pub(crate) entries: HashMap<EntryId, Entry>,
    pub(crate) instances: HashMap<InstanceId, Instance>,
    pub(crate) definitions: BTreeMap<String, Arc<EntryOptions>>,
    pub(crate) pending: HashMap<Ticket, PendingRead>,
    events_tx: mpsc::UnboundedSender<StoreEvent>,
    events_rx: mpsc::UnboundedReceiver<StoreEvent>,
    next_id: u64,
    default_options: Arc<EntryOptions>,
}

/// Builder for an [`Engine`] with non-default collaborators.
pub struct EngineBuilder {
    store: Arc<dyn DocumentStore>,
    system: Arc<dyn MutationSystem>,
    callbacks: Arc<dyn Callbacks>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn mutation_system(mut self, system: Arc<dyn MutationSystem>) -> Self {
        self.system = system;
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn Callbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TesseraResult<Engine> {
        self.config.validate()?;
        Ok(Engine::assemble(self.store, self.system, self.callbacks, self.config))
    }
}

impl Engine {
    /// Engine over `store` with direct mutation, no callbacks and default config.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::assemble(
            store,
            Arc::new(DirectMutation),
            Arc::new(NoopCallbacks),
            EngineConfig::default(),
        )
    }

    pub fn builder(store: Arc<dyn DocumentStore>) -> EngineBuilder {
        EngineBuilder {
            store,
            system: Arc::new(DirectMutation),
            callbacks: Arc::new(NoopCallbacks),
            config: EngineConfig::default(),
        }
    }

    fn assemble(
        store: Arc<dyn DocumentStore>,
        system: Arc<dyn MutationSystem>,
        callbacks: Arc<dyn Callbacks>,
        config: EngineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            system,
            callbacks,
            config,
            cache: CacheRegistry::default(),
            entries: HashMap::new(),
            instances: HashMap::new(),
            definitions: BTreeMap::new(),
            pending: HashMap::new(),
            events_tx,
            events_rx,
            next_id: 0,
            default_options: Arc::new(EntryOptions::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ========================================================================
    // DEFINITIONS
    // ========================================================================

    /// Registers named options visible to every instance.
    pub fn define(&mut self, name: impl Into<String>, options: EntryOptions) {
        self.definitions.insert(name.into(), Arc::new(options));
    }

    pub(crate) fn resolve_options(
        &self,
        instance: InstanceId,
        input: &OptionsInput,
    ) -> TesseraResult<Arc<EntryOptions>> {
        match input {
            OptionsInput::Default => Ok(Arc::clone(&self.default_options)),
            OptionsInput::Inline(options) => Ok(Arc::clone(options)),
            OptionsInput::Named(name) => self
                .instances
                .get(&instance)
                .and_then(|inst| inst.definitions.get(name))
                .or_else(|| self.definitions.get(name))
                .cloned()
                .ok_or_else(|| SetupError::UnknownDefinition { name: name.clone() }.into()),
        }
    }

    /// Checks that every named sub definition reachable from `options` exists.
    fn validate_options(
        &self,
        instance: InstanceId,
        options: &EntryOptions,
        seen: &mut BTreeSet<String>,
    ) -> TesseraResult<()> {
        for input in options.sub.values() {
            if let OptionsInput::Named(name) = input {
                if !seen.insert(name.clone()) {
                    continue;
                }
            }
            let sub = self.resolve_options(instance, input)?;
            self.validate_options(instance, &sub, seen)?;
        }
        Ok(())
    }

    pub(crate) fn check_shape(&self, source: &Source, options: &EntryOptions) -> TesseraResult<()> {
        if !options.stream {
            return Ok(());
        }
        if !source.is_query() {
            return Err(SetupError::StreamRequiresQuery.into());
        }
        if options.stream_initial.unwrap_or(self.config.stream_initial) == 0 {
            return Err(SetupError::StreamRequiresInitial.into());
        }
        if options.stream_more == Some(0) {
            return Err(SetupError::StreamRequiresMore.into());
        }
        Ok(())
    }

    // ========================================================================
    // BINDING
    // ========================================================================

    /// Binds `source` in `instance` and returns the target it projects into.
    pub fn bind(
        &mut self,
        instance: InstanceId,
        source: Source,
        options: impl Into<OptionsInput>,
    ) -> TesseraResult<Target> {
        self.bind_entry(instance, source, options.into(), None)
    }

    /// Binds under `name`; rebinding the same name reuses the entry.
    pub fn bind_named(
        &mut self,
        instance: InstanceId,
        name: &str,
        source: Source,
        options: impl Into<OptionsInput>,
    ) -> TesseraResult<Target> {
        self.bind_entry(instance, source, options.into(), Some(name.to_string()))
    }

    fn bind_entry(
        &mut self,
        instance: InstanceId,
        source: Source,
        input: OptionsInput,
        name: Option<String>,
    ) -> TesseraResult<Target> {
        if !self.instances.contains_key(&instance) {
            return Err(SetupError::UnknownInstance.into());
        }
        let options = self.resolve_options(instance, &input)?;
        self.validate_options(instance, &options, &mut BTreeSet::new())?;
        self.check_shape(&source, &options)?;

        let shape = Shape::select(&source, &options);
        let eid = self.open_entry(EntrySpec {
            instance,
            source,
            options,
            shape,
            name,
            parent: None,
        });
        self.start_entry(eid)
    }

    pub(crate) fn start_entry(&mut self, eid: EntryId) -> TesseraResult<Target> {
        let shape = self
            .entries
            .get(&eid)
            .map(|e| e.shape)
            .ok_or(OperationError::UnknownTarget)?;
        match shape {
            Shape::Document => self.start_document(eid),
            Shape::Sequence | Shape::Mapping | Shape::Stream { .. } => self.start_collection(eid),
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Issues a read for `eid`. Live reads replace the entry's subscription.
    pub(crate) fn issue_read(&mut self, eid: EntryId, source: Source, kind: ReadKind, live: bool) {
        let ticket = Ticket::new(self.next_id());
        let Some(entry) = self.entries.get_mut(&eid) else {
            return;
        };
        if live {
            if let Some(previous) = entry.off.take() {
                previous.cancel();
            }
            if let Some(stale) = entry.live_ticket.replace(ticket) {
                self.pending.remove(&stale);
            }
        } else {
            entry.reads.push(ticket);
        }
        self.pending.insert(ticket, PendingRead { entry: eid, kind, live });
        trace!(entry = %eid, ticket = %ticket, live, "read issued");

        let listener = SnapshotListener::channel(self.events_tx.clone(), ticket);
        if live {
            let subscription = self.store.subscribe(&source, listener);
            if let Some(entry) = self.entries.get_mut(&eid) {
                entry.off = Some(subscription);
            }
        } else {
            self.store.get(&source, listener);
        }
    }

    /// Cancels the entry's live subscription.
    pub(crate) fn cancel_subscription(&mut self, eid: EntryId) {
        let Some(entry) = self.entries.get_mut(&eid) else {
            return;
        };
        if let Some(off) = entry.off.take() {
            off.cancel();
        }
        if let Some(ticket) = entry.live_ticket.take() {
            self.pending.remove(&ticket);
        }
    }

    /// Cancels the subscription and forgets every outstanding read.
    pub(crate) fn cancel_reads(&mut self, eid: EntryId) {
        self.cancel_subscription(eid);
        let Some(entry) = self.entries.get_mut(&eid) else {
            return;
        };
        for ticket in entry.reads.drain(..) {
            self.pending.remove(&ticket);
        }
    }

    /// Reads whose results have not arrived yet.
    pub fn pending_reads(&self) -> usize {
        self.pending.len()
    }

    // ========================================================================
    // EVENT LOOP
    // ========================================================================

    /// Applies every delivery already queued. Returns how many were handled.
    pub fn flush(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits for and applies the next delivery.
    pub async fn process_next(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    fn handle_event(&mut self, event: StoreEvent) {
        let system = Arc::clone(&self.system);
        let mut event = Some(event);
        system.batch(&mut || {
            if let Some(event) = event.take() {
                self.dispatch(event);
            }
        });
    }

    fn dispatch(&mut self, event: StoreEvent) {
        let ticket = event.ticket;
        let Some(pending) = self.pending.get(&ticket).cloned() else {
            trace!(ticket = %ticket, "dropping stale delivery");
            return;
        };
        if !pending.live {
            self.pending.remove(&ticket);
            if let Some(entry) = self.entries.get_mut(&pending.entry) {
                entry.reads.retain(|t| *t != ticket);
            }
        }

        match event.result {
            Ok(snapshot) => self.apply_snapshot(ticket, &pending, snapshot),
            Err(error) => self.fail_read(&pending, error),
        }
    }

    fn apply_snapshot(&mut self, ticket: Ticket, pending: &PendingRead, snapshot: Snapshot) {
        let eid = pending.entry;
        match (&pending.kind, snapshot) {
            (ReadKind::Document, Snapshot::Document(doc)) => self.project_document(eid, &doc),
            (ReadKind::Collection { phase }, Snapshot::Query(query)) => {
                match phase {
                    Phase::Initial => self.project_initial(eid, &query),
                    Phase::Incremental => self.project_incremental(eid, &query),
                }
                if pending.live {
                    if let Some(read) = self.pending.get_mut(&ticket) {
                        read.kind = ReadKind::Collection {
                            phase: Phase::Incremental,
                        };
                    }
                }
                self.settle_entry(eid);
            }
            (ReadKind::StreamPage { limit, initial }, Snapshot::Query(query)) => {
                self.on_stream_page(eid, *limit, *initial, &query)
            }
            (ReadKind::ReversePage { base }, Snapshot::Query(query)) => {
                self.on_reverse_page(eid, base.clone(), &query)
            }
            (kind, _) => {
                warn!(entry = %eid, ?kind, "store answered with the wrong snapshot kind");
                self.fail_read(
                    pending,
                    StoreError::Internal {
                        reason: "snapshot kind does not match the read".to_string(),
                    },
                );
            }
        }
    }

    fn fail_read(&mut self, pending: &PendingRead, error: StoreError) {
        let eid = pending.entry;
        warn!(entry = %eid, error = %error, "store read failed");
        self.callbacks.on_store_error(&error);
        if pending.live {
            self.cancel_subscription(eid);
        }

        let Some(hook) = self.entries.get(&eid).map(|e| e.options.on_error.clone()) else {
            return;
        };
        if let Some(hook) = hook {
            hook(&error);
        }
        if let Some(entry) = self.entries.get_mut(&eid) {
            entry.completion.settle(Err(error.into()));
        }
    }

    /// Settles the entry's completion with its target unless a page read
    /// it is waiting on is still outstanding.
    pub(crate) fn settle_entry(&mut self, eid: EntryId) {
        if let Some(entry) = self.entries.get_mut(&eid) {
            if !entry.reads.is_empty() {
                return;
            }
            if let Some(target) = entry.target.clone() {
                entry.completion.settle(Ok(target));
                debug!(entry = %eid, "entry settled");
            }
        }
    }
}
