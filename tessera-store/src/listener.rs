//! Delivery side of the store boundary.
//!
//! Stores push results into a [`SnapshotListener`] instead of returning
//! them, which lets one trait cover both one-shot reads and live
//! subscriptions. The engine's listeners forward into its inbox channel
//! tagged with a [`Ticket`].

use crate::snapshot::Snapshot;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tessera_core::{StoreError, StoreResult, Ticket};
use tokio::sync::{mpsc, oneshot};

/// A store result tagged with the read it answers.
#[derive(Debug)]
pub struct StoreEvent {
    pub ticket: Ticket,
    pub result: StoreResult<Snapshot>,
}

type Deliver = dyn Fn(StoreResult<Snapshot>) + Send + Sync;

#[derive(Clone)]
pub struct SnapshotListener {
    deliver: Arc<Deliver>,
}

impl SnapshotListener {
    pub fn new(deliver: impl Fn(StoreResult<Snapshot>) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Forwards every delivery into `tx` under `ticket`.
    pub fn channel(tx: mpsc::UnboundedSender<StoreEvent>, ticket: Ticket) -> Self {
        Self::new(move |result| {
            // The receiver is gone once the engine is dropped.
            let _ = tx.send(StoreEvent { ticket, result });
        })
    }

    /// Listener that resolves a single receiver with the first delivery.
    pub fn oneshot() -> (Self, oneshot::Receiver<StoreResult<Snapshot>>) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let listener = Self::new(move |result| {
            let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(result);
            }
        });
        (listener, rx)
    }

    pub fn deliver(&self, result: StoreResult<Snapshot>) {
        (self.deliver)(result);
    }

    pub fn snapshot(&self, snapshot: Snapshot) {
        self.deliver(Ok(snapshot));
    }

    pub fn error(&self, error: StoreError) {
        self.deliver(Err(error));
    }
}

impl fmt::Debug for SnapshotListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotListener").finish_non_exhaustive()
    }
}

/// Handle to a live subscription. Cancels on drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to release.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DocumentSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_channel_listener_tags_ticket() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = SnapshotListener::channel(tx, Ticket::new(7));
        listener.snapshot(Snapshot::Document(DocumentSnapshot::missing("a/1")));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.ticket, Ticket::new(7));
        assert!(event.result.is_ok());
    }

    #[tokio::test]
    async fn test_oneshot_listener_takes_first_delivery() {
        let (listener, rx) = SnapshotListener::oneshot();
        listener.error(StoreError::Unavailable {
            reason: "offline".to_string(),
        });
        listener.snapshot(Snapshot::Document(DocumentSnapshot::missing("a/1")));
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
    }

    #[test]
    fn test_subscription_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
