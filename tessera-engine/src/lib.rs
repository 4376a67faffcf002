//! Tessera Engine - Document Cache and Live-Query Projection
//!
//! The engine binds store sources (one document, or a query over a
//! collection) to identity-stable targets that application code holds on
//! to. Every remote document is represented by exactly one cache record
//! per engine, shared by all entries and instances that reach it and
//! destroyed when the last instance lets go.
//!
//! ```text
//! Instance ──owns──▶ Entry ──projects into──▶ Target
//!                      │                        │
//!                      └──attaches──▶ CacheRecord ◀── holds data of
//!                                        │
//!                                        └──sub──▶ Entry (sub-collection)
//! ```
//!
//! Store deliveries are queued and applied by [`Engine::flush`] or
//! [`Engine::process_next`]; all projection work for one delivery runs
//! inside a single [`MutationSystem::batch`](tessera_core::MutationSystem::batch).

mod cache;
mod completion;
mod data;
mod engine;
mod entry;
mod instance;
mod operations;
mod options;
mod pager;
mod projection;
mod stream;

pub use cache::RecordInfo;
pub use completion::Completion;
pub use engine::{Engine, EngineBuilder};
pub use entry::{EntryInfo, Shape};
pub use operations::{Equality, RemoteChanges};
pub use options::{DefaultValue, DocumentFactory, EntryOptions, ErrorHook, OptionsInput, QueryFn};
pub use pager::Pager;

pub use tessera_core::{
    Callbacks, Document, DocRef, EngineConfig, EntryId, Existence, Fields, InstanceId, Mapping,
    MutationSystem, Sequence, Target, TesseraError, TesseraResult, Uid,
};
pub use tessera_store::{DocumentStore, InMemoryStore, Query, Source};
