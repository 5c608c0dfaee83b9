//! Historical Query Types
//!
//! A [`HistoricalQuery`] can only be built through [`HistoricalQuery::new`],
//! so every instance has a non-empty symbol set and `start < end`.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::market_data::{Schema, Symbol, UnixNanos};

// =============================================================================
// Symbology
// =============================================================================

/// Symbology of the requested symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbologyType {
    /// Product root with asset suffix, e.g. `ES.FUT`.
    #[default]
    Parent,
    /// Venue symbol, e.g. `ESH4`.
    RawSymbol,
    /// Continuous contract, e.g. `ES.c.0`.
    Continuous,
}

impl SymbologyType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::RawSymbol => "raw_symbol",
            Self::Continuous => "continuous",
        }
    }
}

impl fmt::Display for SymbologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbologyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parent" => Ok(Self::Parent),
            "raw_symbol" => Ok(Self::RawSymbol),
            "continuous" => Ok(Self::Continuous),
            other => Err(format!(
                "invalid stype_in: {other}. Expected: parent, raw_symbol, or continuous"
            )),
        }
    }
}

// =============================================================================
// Query
// =============================================================================

/// Reasons a query cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidQuery {
    /// No symbols were requested.
    #[error("at least one symbol is required")]
    EmptySymbols,

    /// The window is empty or inverted.
    #[error("start ({start}) must be before end ({end})")]
    InvalidRange {
        /// Requested start.
        start: UnixNanos,
        /// Requested end.
        end: UnixNanos,
    },
}

/// A validated request for records in `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalQuery {
    symbols: Vec<Symbol>,
    schema: Schema,
    stype_in: SymbologyType,
    start: UnixNanos,
    end: UnixNanos,
    limit: Option<NonZeroUsize>,
}

impl HistoricalQuery {
    /// Build a query. Duplicate symbols are removed, first occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery::EmptySymbols` for an empty (or all-blank)
    /// symbol list and `InvalidQuery::InvalidRange` when `start >= end`.
    pub fn new<I, S>(
        symbols: I,
        schema: Schema,
        start: UnixNanos,
        end: UnixNanos,
    ) -> Result<Self, InvalidQuery>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        if start >= end {
            return Err(InvalidQuery::InvalidRange { start, end });
        }

        let mut unique: Vec<Symbol> = Vec::new();
        for symbol in symbols {
            let symbol: Symbol = symbol.into();
            let symbol = symbol.trim();
            if !symbol.is_empty() && !unique.iter().any(|s| s == symbol) {
                unique.push(symbol.to_string());
            }
        }
        if unique.is_empty() {
            return Err(InvalidQuery::EmptySymbols);
        }

        Ok(Self {
            symbols: unique,
            schema,
            stype_in: SymbologyType::default(),
            start,
            end,
            limit: None,
        })
    }

    /// Set the maximum number of records to return.
    #[must_use]
    pub const fn with_limit(mut self, limit: NonZeroUsize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the symbology of the requested symbols.
    #[must_use]
    pub const fn with_stype_in(mut self, stype_in: SymbologyType) -> Self {
        self.stype_in = stype_in;
        self
    }

    /// Requested symbols, deduplicated, in request order.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Requested schema.
    #[must_use]
    pub const fn schema(&self) -> Schema {
        self.schema
    }

    /// Symbology of the requested symbols.
    #[must_use]
    pub const fn stype_in(&self) -> SymbologyType {
        self.stype_in
    }

    /// Inclusive start (ns since epoch).
    #[must_use]
    pub const fn start(&self) -> UnixNanos {
        self.start
    }

    /// Exclusive end (ns since epoch).
    #[must_use]
    pub const fn end(&self) -> UnixNanos {
        self.end
    }

    /// Optional record limit.
    #[must_use]
    pub const fn limit(&self) -> Option<NonZeroUsize> {
        self.limit
    }

    /// Whether `event_time` falls inside `[start, end)`.
    #[must_use]
    pub const fn contains(&self, event_time: UnixNanos) -> bool {
        self.start <= event_time && event_time < self.end
    }
}

// =============================================================================
// Tests
// =============================================================================
