//! Subscription Bookkeeping
//!
//! Domain types for live stream subscriptions:
//!
//! - [`SubscriptionState`]: the `Opening -> Streaming -> Closing -> Closed`
//!   lifecycle of a single subscription
//! - [`SubscriptionManager`]: which symbols each subscription holds per
//!   schema, with reference counts per (schema, symbol) upstream feed
//!
//! Many subscriptions may want the same symbol while only one upstream
//! feed per (schema, symbol) is kept open. The manager reports the keys
//! whose count moved 0→1 (open a feed) or 1→0 (close it).

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

use super::market_data::{Schema, Symbol};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a live subscription.
pub type SubscriptionId = u64;

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Symbols are being validated and upstream feeds attached.
    Opening,
    /// Events are being delivered.
    Streaming,
    /// Resources are being released.
    Closing,
    /// Terminal.
    Closed,
}

impl SubscriptionState {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// `Opening -> Closed` covers a subscription that failed validation.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Opening, Self::Streaming | Self::Closed)
                | (Self::Streaming, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for any move not allowed by
    /// [`can_transition_to`](Self::can_transition_to).
    pub const fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid subscription transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State before.
    pub from: SubscriptionState,
    /// Requested state.
    pub to: SubscriptionState,
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream feeds.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChanges {
    /// Symbols whose feed must be opened.
    pub subscribe: HashSet<Symbol>,
    /// Symbols whose feed must be closed.
    pub unsubscribe: HashSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: HashSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: HashSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Per-Schema Reference Counts
// =============================================================================

#[derive(Debug, Default)]
struct SchemaRefcounts {
    holders: HashMap<SubscriptionId, HashSet<Symbol>>,
    refcount: HashMap<Symbol, usize>,
}

impl SchemaRefcounts {
    /// Returns symbols whose count went 0→1.
    fn add(&mut self, id: SubscriptionId, symbols: &[Symbol]) -> Vec<Symbol> {
        let held = self.holders.entry(id).or_default();
        let mut opened = Vec::new();

        for symbol in symbols {
            if !held.insert(symbol.clone()) {
                continue;
            }

            let count = self.refcount.entry(symbol.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                opened.push(symbol.clone());
            }
        }

        opened
    }

    /// Returns symbols whose count went 1→0.
    fn remove_subscriber(&mut self, id: SubscriptionId) -> Vec<Symbol> {
        let Some(held) = self.holders.remove(&id) else {
            return vec![];
        };

        let mut closed = Vec::new();
        for symbol in held {
            if let Some(count) = self.refcount.get_mut(&symbol) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.refcount.remove(&symbol);
                    closed.push(symbol);
                }
            }
        }

        closed
    }

    fn count(&self, symbol: &str) -> usize {
        self.refcount.get(symbol).copied().unwrap_or(0)
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Reference counts of upstream feeds, per schema.
///
/// # Example
///
/// ```rust
/// use market_data_server::domain::market_data::Schema;
/// use market_data_server::domain::subscription::SubscriptionManager;
///
/// let manager = SubscriptionManager::new();
/// let es = vec!["ES.FUT".to_string()];
///
/// // First holder opens the feed
/// let changes = manager.add_subscriptions(1, Schema::Trades, &es);
/// assert!(changes.subscribe.contains("ES.FUT"));
///
/// // Second holder shares it
/// let changes = manager.add_subscriptions(2, Schema::Trades, &es);
/// assert!(changes.subscribe.is_empty());
/// assert_eq!(manager.refcount(Schema::Trades, "ES.FUT"), 2);
///
/// // Feed closes only when the last holder leaves
/// assert!(manager.remove_subscriber(1).is_empty());
/// let changes = manager.remove_subscriber(2);
/// assert!(changes[&Schema::Trades].unsubscribe.contains("ES.FUT"));
/// ```
pub struct SubscriptionManager {
    trades: RwLock<SchemaRefcounts>,
    ohlcv_1s: RwLock<SchemaRefcounts>,
    ohlcv_1m: RwLock<SchemaRefcounts>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trades: RwLock::new(SchemaRefcounts::default()),
            ohlcv_1s: RwLock::new(SchemaRefcounts::default()),
            ohlcv_1m: RwLock::new(SchemaRefcounts::default()),
        }
    }

    /// Register `symbols` for a subscription.
    ///
    /// Returns feeds that need opening.
    pub fn add_subscriptions(
        &self,
        id: SubscriptionId,
        schema: Schema,
        symbols: &[Symbol],
    ) -> SubscriptionChanges {
        let opened = self.state(schema).write().add(id, symbols);
        SubscriptionChanges::subscribe_only(opened)
    }

    /// Release everything a subscription holds.
    ///
    /// Returns feeds that need closing, keyed by schema. Unknown ids yield
    /// an empty map, so repeated calls are harmless.
    pub fn remove_subscriber(&self, id: SubscriptionId) -> HashMap<Schema, SubscriptionChanges> {
        let mut changes = HashMap::new();

        for schema in Schema::all() {
            let closed = self.state(*schema).write().remove_subscriber(id);
            if !closed.is_empty() {
                changes.insert(*schema, SubscriptionChanges::unsubscribe_only(closed));
            }
        }

        changes
    }

    /// Number of subscriptions holding a (schema, symbol) feed.
    #[must_use]
    pub fn refcount(&self, schema: Schema, symbol: &str) -> usize {
        self.state(schema).read().count(symbol)
    }

    /// Statistics for a schema.
    #[must_use]
    pub fn stats(&self, schema: Schema) -> SubscriptionStats {
        let state = self.state(schema).read();
        SubscriptionStats {
            symbol_count: state.refcount.len(),
            subscriber_count: state.holders.len(),
        }
    }

    /// Statistics across all schemas.
    #[must_use]
    pub fn total_stats(&self) -> TotalSubscriptionStats {
        TotalSubscriptionStats {
            trades: self.stats(Schema::Trades),
            ohlcv_1s: self.stats(Schema::Ohlcv1s),
            ohlcv_1m: self.stats(Schema::Ohlcv1m),
        }
    }

    const fn state(&self, schema: Schema) -> &RwLock<SchemaRefcounts> {
        match schema {
            Schema::Trades => &self.trades,
            Schema::Ohlcv1s => &self.ohlcv_1s,
            Schema::Ohlcv1m => &self.ohlcv_1m,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for one schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of symbols with an open feed.
    pub symbol_count: usize,
    /// Number of subscriptions.
    pub subscriber_count: usize,
}

/// Statistics across all schemas, keyed by wire schema name when
/// serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TotalSubscriptionStats {
    /// Trades.
    pub trades: SubscriptionStats,
    /// One-second bars.
    #[serde(rename = "ohlcv-1s")]
    pub ohlcv_1s: SubscriptionStats,
    /// One-minute bars.
    #[serde(rename = "ohlcv-1m")]
    pub ohlcv_1m: SubscriptionStats,
}

impl TotalSubscriptionStats {
    /// Total open upstream feeds.
    #[must_use]
    pub const fn feed_count(&self) -> usize {
        self.trades.symbol_count + self.ohlcv_1s.symbol_count + self.ohlcv_1m.symbol_count
    }
}

// =============================================================================
// Tests
// =============================================================================
