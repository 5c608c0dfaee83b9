//! Stream Multiplexer
//!
//! Owns every live subscription and routes source records to them.
//!
//! # Design
//!
//! - One upstream feed per (schema, symbol), opened by the first
//!   subscription that needs it and cancelled when the last one leaves.
//!   Reference counts live in [`SubscriptionManager`].
//! - Each feed runs in its own pump task that offers records to the
//!   attached subscribers with `try_send`, so a slow consumer never stalls
//!   the feed or its neighbours.
//! - An upstream failure closes every subscription attached to that feed,
//!   each one receiving a terminal error first.
//!
//! ```text
//!                      ┌──────────────┐
//! trades/ES.FUT feed ─►│  pump task   │──► sub 1 queue ──► handle 1
//!                      │ (fan-out)    │──► sub 2 queue ──► handle 2
//!                      └──────────────┘
//! ohlcv-1s/NQ.FUT ────►   pump task   ───► sub 3 queue ──► handle 3
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::subscriber::{Delivery, Subscriber, SubscriptionHandle};
use crate::application::ports::{LiveFeed, SharedDataSource, SourceError};
use crate::domain::market_data::{MarketRecord, Schema, Symbol};
use crate::domain::subscription::{
    SubscriptionId, SubscriptionManager, SubscriptionState, TotalSubscriptionStats,
};
use crate::infrastructure::metrics;

/// Default per-subscription queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Multiplexer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Bounded queue size of each subscription.
    pub queue_capacity: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FeedKey {
    schema: Schema,
    symbol: Symbol,
}

impl FeedKey {
    fn new(schema: Schema, symbol: &str) -> Self {
        Self {
            schema,
            symbol: symbol.to_string(),
        }
    }
}

type SubscriberMap = Arc<RwLock<HashMap<SubscriptionId, Arc<Subscriber>>>>;

struct UpstreamFeed {
    id: u64,
    subscribers: SubscriberMap,
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<SubscriptionId, Arc<Subscriber>>,
    feeds: HashMap<FeedKey, UpstreamFeed>,
}

pub(crate) struct Inner {
    source: SharedDataSource,
    config: MultiplexerConfig,
    next_id: AtomicU64,
    refcounts: SubscriptionManager,
    state: Mutex<State>,
}

impl Inner {
    /// Close a subscription and drop feeds nobody holds anymore.
    ///
    /// Returns `false` if the subscription is unknown or already closing.
    pub(crate) fn release(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let Some(subscriber) = state.subscriptions.remove(&id) else {
            return false;
        };

        if subscriber.transition(SubscriptionState::Closing).is_err() {
            return false;
        }

        for symbol in &subscriber.symbols {
            if let Some(feed) = state.feeds.get(&FeedKey::new(subscriber.schema, symbol)) {
                feed.subscribers.write().remove(&id);
            }
        }

        for (schema, changes) in self.refcounts.remove_subscriber(id) {
            for symbol in changes.unsubscribe {
                if let Some(feed) = state.feeds.remove(&FeedKey::new(schema, &symbol)) {
                    feed.cancel.cancel();
                    tracing::debug!(schema = %schema, symbol = %symbol, "Upstream feed closed");
                }
            }
        }

        if let Err(e) = subscriber.transition(SubscriptionState::Closed) {
            tracing::error!(subscription_id = id, error = %e, "Subscription close failed");
        }
        // Wakes the handle only once the subscription is fully released.
        subscriber.closed.cancel();

        metrics::set_active_subscriptions(state.subscriptions.len());
        metrics::set_upstream_feeds(state.feeds.len());
        tracing::info!(subscription_id = id, "Subscription closed");
        true
    }

    /// Detach a failed feed and close everything attached to it.
    fn fail_feed(&self, key: &FeedKey, feed_id: u64, err: &SourceError) {
        let affected: Vec<Arc<Subscriber>> = {
            let mut state = self.state.lock();
            if state.feeds.get(key).is_none_or(|feed| feed.id != feed_id) {
                return;
            }
            let Some(feed) = state.feeds.remove(key) else {
                return;
            };
            metrics::set_upstream_feeds(state.feeds.len());
            feed.subscribers.read().values().cloned().collect()
        };

        metrics::record_upstream_failure(key.schema);
        tracing::error!(
            schema = %key.schema,
            symbol = %key.symbol,
            subscribers = affected.len(),
            error = %err,
            "Upstream feed failed"
        );

        for subscriber in affected {
            subscriber.fail(err.clone());
            self.release(subscriber.id);
        }
    }
}

// =============================================================================
// Multiplexer
// =============================================================================

/// Fans live source data out to many subscriptions.
///
/// Cheap to clone; clones share the same subscriptions and feeds.
#[derive(Clone)]
pub struct StreamMultiplexer {
    inner: Arc<Inner>,
}

impl StreamMultiplexer {
    /// Create a multiplexer over a data source.
    #[must_use]
    pub fn new(source: SharedDataSource, config: MultiplexerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config: MultiplexerConfig {
                    queue_capacity: config.queue_capacity.max(1),
                },
                next_id: AtomicU64::new(1),
                refcounts: SubscriptionManager::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Subscribe to `symbols` in `schema`.
    ///
    /// Duplicate and blank symbols are removed. Feeds already open for a
    /// (schema, symbol) are shared; missing ones are opened on the source,
    /// which also validates the symbols.
    ///
    /// # Errors
    ///
    /// - `SourceError::InvalidSymbol` if the source does not recognize a
    ///   symbol; the subscription goes straight to `Closed`
    /// - `SourceError::Unsupported` if no symbols were given
    /// - `SourceError::Upstream` if a feed cannot be opened
    pub async fn subscribe(
        &self,
        symbols: &[Symbol],
        schema: Schema,
    ) -> Result<SubscriptionHandle, SourceError> {
        let symbols = normalize_symbols(symbols);
        if symbols.is_empty() {
            return Err(SourceError::Unsupported(
                "at least one symbol is required".to_string(),
            ));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (subscriber, rx) =
            Subscriber::new(id, symbols, schema, self.inner.config.queue_capacity);
        let subscriber = Arc::new(subscriber);

        tracing::debug!(
            subscription_id = id,
            schema = %schema,
            symbols = ?subscriber.symbols,
            "Opening subscription"
        );

        let mut opened: HashMap<Symbol, LiveFeed> = HashMap::new();
        loop {
            let missing = {
                let mut state = self.inner.state.lock();
                let missing: Vec<Symbol> = subscriber
                    .symbols
                    .iter()
                    .filter(|s| {
                        !opened.contains_key(*s)
                            && !state.feeds.contains_key(&FeedKey::new(schema, s))
                    })
                    .cloned()
                    .collect();

                if missing.is_empty() {
                    self.attach(&mut state, &subscriber, &mut opened);
                    break;
                }
                missing
            };

            for symbol in missing {
                match self
                    .inner
                    .source
                    .open_live_stream(std::slice::from_ref(&symbol), schema)
                    .await
                {
                    Ok(feed) => {
                        opened.insert(symbol, feed);
                    }
                    Err(err) => {
                        if let Err(e) = subscriber.transition(SubscriptionState::Closed) {
                            tracing::error!(subscription_id = id, error = %e, "Subscription close failed");
                        }
                        metrics::record_subscription_rejected(schema, err.kind());
                        tracing::warn!(
                            subscription_id = id,
                            schema = %schema,
                            symbol = %symbol,
                            error = %err,
                            "Subscription rejected"
                        );
                        return Err(err);
                    }
                }
            }
        }

        tracing::info!(
            subscription_id = id,
            schema = %schema,
            symbols = ?subscriber.symbols,
            "Subscription streaming"
        );

        Ok(SubscriptionHandle::new(
            subscriber,
            rx,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Close a subscription. Unknown or already closed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if !self.inner.release(id) {
            tracing::debug!(subscription_id = id, "Unsubscribe ignored");
        }
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    /// Number of open upstream feeds.
    #[must_use]
    pub fn upstream_feed_count(&self) -> usize {
        self.inner.state.lock().feeds.len()
    }

    /// Subscriptions holding the (schema, symbol) feed.
    #[must_use]
    pub fn feed_refcount(&self, schema: Schema, symbol: &str) -> usize {
        self.inner.refcounts.refcount(schema, symbol)
    }

    /// Feed and holder counts per schema.
    #[must_use]
    pub fn subscription_stats(&self) -> TotalSubscriptionStats {
        self.inner.refcounts.total_stats()
    }

    /// Lifecycle state of an open subscription.
    #[must_use]
    pub fn subscription_state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        self.inner
            .state
            .lock()
            .subscriptions
            .get(&id)
            .map(|s| s.state())
    }

    /// Queue capacity given to each subscription.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.inner.config.queue_capacity
    }

    /// Install missing feeds, register the subscriber and mark it streaming.
    fn attach(
        &self,
        state: &mut State,
        subscriber: &Arc<Subscriber>,
        opened: &mut HashMap<Symbol, LiveFeed>,
    ) {
        let schema = subscriber.schema;

        for symbol in &subscriber.symbols {
            let key = FeedKey::new(schema, symbol);
            if !state.feeds.contains_key(&key)
                && let Some(feed) = opened.remove(symbol)
            {
                let upstream = self.spawn_feed(key.clone(), feed);
                state.feeds.insert(key.clone(), upstream);
                tracing::debug!(schema = %schema, symbol = %symbol, "Upstream feed opened");
            }
            if let Some(upstream) = state.feeds.get(&key) {
                upstream
                    .subscribers
                    .write()
                    .insert(subscriber.id, Arc::clone(subscriber));
            }
        }

        let changes = self
            .inner
            .refcounts
            .add_subscriptions(subscriber.id, schema, &subscriber.symbols);
        if !changes.subscribe.is_empty() {
            tracing::debug!(
                subscription_id = subscriber.id,
                schema = %schema,
                first_holder_of = ?changes.subscribe,
                "Feed holders registered"
            );
        }
        state
            .subscriptions
            .insert(subscriber.id, Arc::clone(subscriber));

        if let Err(e) = subscriber.transition(SubscriptionState::Streaming) {
            tracing::error!(subscription_id = subscriber.id, error = %e, "Subscription start failed");
        }

        metrics::set_active_subscriptions(state.subscriptions.len());
        metrics::set_upstream_feeds(state.feeds.len());
    }

    fn spawn_feed(&self, key: FeedKey, feed: LiveFeed) -> UpstreamFeed {
        static NEXT_FEED_ID: AtomicU64 = AtomicU64::new(1);

        let id = NEXT_FEED_ID.fetch_add(1, Ordering::Relaxed);
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(pump(
            Arc::downgrade(&self.inner),
            key,
            id,
            feed,
            Arc::clone(&subscribers),
            cancel.clone(),
        ));

        UpstreamFeed {
            id,
            subscribers,
            cancel,
        }
    }
}

impl std::fmt::Debug for StreamMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("source", &self.inner.source.name())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Pump
// =============================================================================

async fn pump(
    owner: Weak<Inner>,
    key: FeedKey,
    feed_id: u64,
    mut feed: LiveFeed,
    subscribers: SubscriberMap,
    cancel: CancellationToken,
) {
    let failure = loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            item = feed.next() => match item {
                Some(Ok(record)) => fan_out(&key, &subscribers, &record),
                Some(Err(err)) => break err,
                None => break SourceError::Upstream("live feed ended".to_string()),
            },
        }
    };
    drop(feed);

    if let Some(owner) = owner.upgrade() {
        owner.fail_feed(&key, feed_id, &failure);
    }
}

fn fan_out(key: &FeedKey, subscribers: &SubscriberMap, record: &MarketRecord) {
    let mut delivered = 0u64;
    let mut dropped = 0u64;

    for subscriber in subscribers.read().values() {
        match subscriber.deliver(record) {
            Delivery::Delivered => delivered += 1,
            Delivery::Dropped => dropped += 1,
            Delivery::Filtered | Delivery::Closed => {}
        }
    }

    metrics::record_events_delivered(key.schema, delivered);
    if dropped > 0 {
        metrics::record_events_dropped(key.schema, dropped);
    }
}

fn normalize_symbols(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_string()))
        .map(ToString::to_string)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_dedupes_and_trims() {
        let input = vec![
            " ES.FUT".to_string(),
            "NQ.FUT".to_string(),
            "ES.FUT".to_string(),
            String::new(),
        ];
        assert_eq!(normalize_symbols(&input), vec!["ES.FUT", "NQ.FUT"]);
    }

    #[test]
    fn default_capacity() {
        assert_eq!(MultiplexerConfig::default().queue_capacity, 1024);
    }

    #[test]
    fn feed_keys_distinguish_schema() {
        assert_ne!(
            FeedKey::new(Schema::Trades, "ES.FUT"),
            FeedKey::new(Schema::Ohlcv1s, "ES.FUT")
        );
    }
}
