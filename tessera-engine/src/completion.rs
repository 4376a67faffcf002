//! Completion handles.
//!
//! Every bind, requery, page turn and write hands back a [`Completion`]: a
//! future that settles once the corresponding store round trip has been
//! applied. Entry completions are fed from a [`CompletionSlot`] owned by
//! the entry; a slot that is dropped while pending settles its waiters with
//! [`OperationError::Closed`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tessera_core::{OperationError, TesseraError, TesseraResult};
use tokio::sync::oneshot;

type BoxedFuture<T> = Pin<Box<dyn Future<Output = TesseraResult<T>> + Send>>;

#[must_use = "a completion does nothing unless awaited"]
pub struct Completion<T> {
    future: BoxedFuture<T>,
}

impl<T: Send + 'static> Completion<T> {
    pub fn ready(result: TesseraResult<T>) -> Self {
        Self {
            future: Box::pin(std::future::ready(result)),
        }
    }

    pub fn rejected(error: impl Into<TesseraError>) -> Self {
        Self::ready(Err(error.into()))
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = TesseraResult<T>> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
        }
    }

    pub(crate) fn from_receiver(receiver: oneshot::Receiver<TesseraResult<T>>) -> Self {
        Self::from_future(async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(OperationError::Closed.into()))
        })
    }
}

impl<T> Future for Completion<T> {
    type Output = TesseraResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

enum SlotState<T> {
    Idle,
    Pending(Vec<oneshot::Sender<TesseraResult<T>>>),
    Settled(TesseraResult<T>),
}

/// Latest-outcome holder for an entry.
pub(crate) struct CompletionSlot<T> {
    state: SlotState<T>,
}

impl<T> Default for CompletionSlot<T> {
    fn default() -> Self {
        Self {
            state: SlotState::Idle,
        }
    }
}

impl<T: Clone + Send + 'static> CompletionSlot<T> {
    /// Starts a new round trip. Waiters from an unsettled round carry over.
    pub(crate) fn begin(&mut self) {
        self.state = match std::mem::replace(&mut self.state, SlotState::Idle) {
            SlotState::Pending(waiters) => SlotState::Pending(waiters),
            _ => SlotState::Pending(Vec::new()),
        };
    }

    pub(crate) fn settle(&mut self, result: TesseraResult<T>) {
        if let SlotState::Pending(waiters) = std::mem::replace(&mut self.state, SlotState::Idle) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
        self.state = SlotState::Settled(result);
    }

    pub(crate) fn handle(&mut self) -> Completion<T> {
        match &mut self.state {
            SlotState::Settled(result) => Completion::ready(result.clone()),
            SlotState::Pending(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Completion::from_receiver(rx)
            }
            SlotState::Idle => Completion::rejected(OperationError::UnknownTarget),
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.state, SlotState::Pending(_))
    }
}
