//! Per-Subscription Delivery
//!
//! Each subscription owns a bounded queue. Upstream pumps enqueue with
//! `try_send` and never wait: when the queue is full the incoming record
//! is dropped and, the first time only, a backpressure notice is queued
//! for the consumer's next read.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::multiplexer::Inner;
use crate::application::ports::SourceError;
use crate::domain::market_data::{MarketRecord, Schema, Symbol};
use crate::domain::subscription::{InvalidTransition, SubscriptionId, SubscriptionState};
use crate::infrastructure::metrics;

// =============================================================================
// Events
// =============================================================================

/// Something delivered to a stream consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Acknowledgement sent once, before any record.
    Connected {
        /// Resolved symbol set.
        symbols: Vec<Symbol>,
        /// Active schema.
        schema: Schema,
    },
    /// A market data record.
    Record(MarketRecord),
    /// An error notification.
    Error(StreamError),
}

/// Error notifications carried on a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The consumer fell behind and records were dropped. Informational;
    /// the stream keeps going.
    #[error("consumer is falling behind; dropping events (queue capacity {capacity})")]
    Backpressure {
        /// Queue capacity of the subscription.
        capacity: usize,
    },

    /// The upstream feed failed. Terminal.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl StreamError {
    /// Whether the stream ends after this notification.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

// =============================================================================
// Shared Subscriber State
// =============================================================================

/// Outcome of offering a record to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Filtered,
    Dropped,
    Closed,
}

/// State shared between a subscription's handle and the feeds it reads.
#[derive(Debug)]
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) symbols: Vec<Symbol>,
    pub(crate) schema: Schema,
    symbol_set: HashSet<Symbol>,
    capacity: usize,
    tx: mpsc::Sender<MarketRecord>,
    lifecycle: Mutex<SubscriptionState>,
    overflowed: AtomicBool,
    notice_pending: AtomicBool,
    dropped: AtomicU64,
    failure: Mutex<Option<SourceError>>,
    pub(crate) closed: CancellationToken,
}

impl Subscriber {
    pub(crate) fn new(
        id: SubscriptionId,
        symbols: Vec<Symbol>,
        schema: Schema,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<MarketRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        let symbol_set = symbols.iter().cloned().collect();
        let subscriber = Self {
            id,
            symbols,
            schema,
            symbol_set,
            capacity,
            tx,
            lifecycle: Mutex::new(SubscriptionState::Opening),
            overflowed: AtomicBool::new(false),
            notice_pending: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            failure: Mutex::new(None),
            closed: CancellationToken::new(),
        };
        (subscriber, rx)
    }

    /// Offer a record without waiting.
    pub(crate) fn deliver(&self, record: &MarketRecord) -> Delivery {
        if self.closed.is_cancelled() {
            return Delivery::Closed;
        }
        if !record.matches_schema(self.schema) || !self.symbol_set.contains(record.symbol()) {
            return Delivery::Filtered;
        }

        match self.tx.try_send(record.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.overflowed.swap(true, Ordering::AcqRel) {
                    self.notice_pending.store(true, Ordering::Release);
                    metrics::record_backpressure_notice(self.schema);
                    tracing::warn!(
                        subscription_id = self.id,
                        capacity = self.capacity,
                        "Subscriber queue full, dropping events"
                    );
                }
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.lifecycle.lock()
    }

    pub(crate) fn transition(&self, next: SubscriptionState) -> Result<(), InvalidTransition> {
        let mut state = self.lifecycle.lock();
        *state = state.transition(next)?;
        tracing::trace!(subscription_id = self.id, state = %next, "Subscription state changed");
        Ok(())
    }

    /// Record a terminal upstream failure. The first failure wins.
    pub(crate) fn fail(&self, err: SourceError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    fn take_notice(&self) -> bool {
        self.notice_pending.swap(false, Ordering::AcqRel)
    }

    fn take_failure(&self) -> Option<SourceError> {
        self.failure.lock().take()
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Consumer side of a live subscription.
///
/// Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    shared: Arc<Subscriber>,
    rx: mpsc::Receiver<MarketRecord>,
    owner: Weak<Inner>,
    connected_sent: bool,
    finished: bool,
}

impl SubscriptionHandle {
    pub(crate) const fn new(
        shared: Arc<Subscriber>,
        rx: mpsc::Receiver<MarketRecord>,
        owner: Weak<Inner>,
    ) -> Self {
        Self {
            shared,
            rx,
            owner,
            connected_sent: false,
            finished: false,
        }
    }

    /// Subscription id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    /// Resolved symbol set.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.shared.symbols
    }

    /// Active schema.
    #[must_use]
    pub fn schema(&self) -> Schema {
        self.shared.schema
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// Records dropped because the queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Next event, or `None` once the subscription is closed.
    ///
    /// Yields `Connected` first. After an upstream failure, records already
    /// queued are drained, then a terminal `Error` is yielded, then `None`.
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        if !self.connected_sent {
            self.connected_sent = true;
            return Some(StreamEvent::Connected {
                symbols: self.shared.symbols.clone(),
                schema: self.shared.schema,
            });
        }

        if self.shared.take_notice() {
            return Some(StreamEvent::Error(StreamError::Backpressure {
                capacity: self.shared.capacity,
            }));
        }

        tokio::select! {
            biased;
            record = self.rx.recv() => {
                if let Some(record) = record {
                    return Some(StreamEvent::Record(record));
                }
            }
            () = self.shared.closed.cancelled() => {}
        }

        if let Ok(record) = self.rx.try_recv() {
            return Some(StreamEvent::Record(record));
        }

        self.finished = true;
        self.shared.take_failure().map(|err| {
            let message = match err {
                SourceError::Upstream(message) => message,
                other => other.to_string(),
            };
            StreamEvent::Error(StreamError::Upstream(message))
        })
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.shared.id)
            .field("symbols", &self.shared.symbols)
            .field("schema", &self.shared.schema)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.release(self.shared.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
