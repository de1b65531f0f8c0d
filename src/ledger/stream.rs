//! Live contract-set streams.
//!
//! Each subscription is backed by a `watch` channel: the ledger side always
//! publishes the whole current contract set, so a slow consumer only ever
//! sees the latest snapshot and never a partial merge of two. The sender
//! being dropped is the closure signal.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::StreamError;
use crate::ledger::types::{Contract, ContractPayload, ContractQuery};

/// Current contract set for one subscription.
///
/// While `loading` is true, `contracts` is not authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot<T = ContractPayload> {
    pub loading: bool,
    pub contracts: Vec<Contract<T>>,
    pub last_error: Option<String>,
}

impl<T> StreamSnapshot<T> {
    pub fn loading() -> Self {
        Self {
            loading: true,
            contracts: Vec::new(),
            last_error: None,
        }
    }

    pub fn loaded(contracts: Vec<Contract<T>>) -> Self {
        Self {
            loading: false,
            contracts,
            last_error: None,
        }
    }

    /// Snapshot used after an unexpected close: not loading, no data.
    pub fn stale(reason: impl Into<String>) -> Self {
        Self {
            loading: false,
            contracts: Vec::new(),
            last_error: Some(reason.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }
}

impl<T> Default for StreamSnapshot<T> {
    fn default() -> Self {
        Self::loading()
    }
}

pub type PayloadSnapshot = StreamSnapshot<ContractPayload>;

/// Invoked once when a stream closes without being unsubscribed.
pub type CloseHandler = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// What a subscription yields to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Snapshot(PayloadSnapshot),
    Closed(StreamError),
}

/// Consumer end of one contract stream.
///
/// Dropping it unsubscribes: no further snapshots and no close callback.
pub struct Subscription {
    query: ContractQuery,
    receiver: watch::Receiver<PayloadSnapshot>,
    on_close: Option<CloseHandler>,
}

impl Subscription {
    pub fn new(
        query: ContractQuery,
        receiver: watch::Receiver<PayloadSnapshot>,
        on_close: Option<CloseHandler>,
    ) -> Self {
        Self {
            query,
            receiver,
            on_close,
        }
    }

    pub fn query(&self) -> &ContractQuery {
        &self.query
    }

    /// Latest published snapshot, without waiting.
    pub fn current(&self) -> PayloadSnapshot {
        self.receiver.borrow().clone()
    }

    /// Turn the subscription into an event stream: the current snapshot,
    /// every later replacement, then a single `Closed` event if the ledger
    /// side goes away.
    pub fn into_events(self) -> BoxStream<'static, StreamEvent> {
        let Subscription {
            query,
            receiver,
            on_close,
        } = self;
        let last_seen = receiver.clone();
        let template = query.template;

        WatchStream::new(receiver)
            .map(StreamEvent::Snapshot)
            .chain(stream::once(async move {
                let reason = last_seen
                    .borrow()
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "stream ended".to_string());
                let error = StreamError::UnexpectedClose { template, reason };
                if let Some(handler) = on_close {
                    handler(&error);
                }
                StreamEvent::Closed(error)
            }))
            .boxed()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("query", &self.query)
            .field("has_close_handler", &self.on_close.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ledger::types::TemplateId;

    fn query() -> ContractQuery {
        ContractQuery::new(TemplateId::AssetDeposit)
    }

    #[tokio::test]
    async fn yields_latest_snapshot_then_close() {
        let (tx, rx) = watch::channel(PayloadSnapshot::loading());
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let handler: CloseHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut events = Subscription::new(query(), rx, Some(handler)).into_events();
        assert_eq!(
            events.next().await,
            Some(StreamEvent::Snapshot(PayloadSnapshot::loading()))
        );

        tx.send_replace(PayloadSnapshot::stale("connection reset"));
        drop(tx);

        match events.next().await {
            Some(StreamEvent::Snapshot(snapshot)) => {
                assert_eq!(snapshot.last_error.as_deref(), Some("connection reset"))
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        match events.next().await {
            Some(StreamEvent::Closed(StreamError::UnexpectedClose { reason, .. })) => {
                assert_eq!(reason, "connection reset")
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert!(events.next().await.is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_unsubscribes_without_callback() {
        let (tx, rx) = watch::channel(PayloadSnapshot::loaded(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let handler: CloseHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let events = Subscription::new(query(), rx, Some(handler)).into_events();
        drop(events);
        drop(tx);

        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_snapshot_is_not_loading() {
        let snapshot = PayloadSnapshot::stale("gone");
        assert!(!snapshot.loading);
        assert!(snapshot.is_empty());
    }
}
