//! Tessera Core - Shared Types
//!
//! Identity types, the identity-stable document containers handed to
//! application code, and the collaborator traits the engine calls into.
//! No projection logic lives here.

pub mod callbacks;
pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod mutation;

pub use callbacks::{Callbacks, NoopCallbacks};
pub use config::EngineConfig;
pub use document::{DocRef, Document, Existence, Fields, Mapping, Sequence, Target};
pub use error::{
    ConfigError, OperationError, SetupError, StoreError, StoreResult, TesseraError, TesseraResult,
    WindowError,
};
pub use identity::{
    CollectionPath, DocPath, EntryId, InstanceId, Operation, RecordId, Ticket, Uid,
    DEFAULT_PROP_VALUE, ENTRY_SEPARATOR, UID_SEPARATOR,
};
pub use mutation::{DirectMutation, MutationSystem};
