//! Lifecycle notifications. Every hook defaults to a no-op.

use crate::document::{Document, Target};
use crate::error::StoreError;
use crate::identity::{InstanceId, Operation, Uid};

pub trait Callbacks: Send + Sync {
    fn on_record_created(&self, _uid: &Uid) {}

    fn on_record_destroyed(&self, _uid: &Uid) {}

    fn on_sub_attached(&self, _uid: &Uid, _sub: &str) {}

    fn on_sub_detached(&self, _uid: &Uid, _sub: &str) {}

    fn on_collection_added(&self, _target: &Target, _doc: &Document) {}

    fn on_collection_removed(&self, _target: &Target, _doc: &Document) {}

    fn on_collection_modified(&self, _target: &Target, _doc: &Document) {}

    /// A collection snapshot has been fully applied.
    fn on_collection_settled(&self, _target: &Target) {}

    fn on_document_updated(&self, _doc: &Document) {}

    fn on_document_missing(&self, _uid: &Uid) {}

    fn on_instance_created(&self, _instance: InstanceId) {}

    fn on_instance_destroyed(&self, _instance: InstanceId) {}

    fn on_invalid_operation(&self, _operation: Operation, _data: &Document) {}

    fn on_store_error(&self, _error: &StoreError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}
