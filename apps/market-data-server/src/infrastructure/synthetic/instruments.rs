//! Instruments known to the synthetic source.

use rust_decimal::Decimal;

use crate::domain::market_data::{PRICE_SCALE, price_to_decimal};

/// Anchor price and minimum price increment of a synthetic instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instrument {
    /// Symbol in parent symbology.
    pub symbol: &'static str,
    /// Starting price, fixed-point.
    pub anchor: i64,
    /// Minimum price increment, fixed-point.
    pub tick_size: i64,
}

/// Walks stay within this fraction (in basis points) of the anchor.
const BAND_BPS: i64 = 500;

const INSTRUMENTS: &[Instrument] = &[
    Instrument {
        symbol: "ES.FUT",
        anchor: 5_000 * PRICE_SCALE,
        tick_size: PRICE_SCALE / 4,
    },
    Instrument {
        symbol: "NQ.FUT",
        anchor: 17_500 * PRICE_SCALE,
        tick_size: PRICE_SCALE / 4,
    },
    Instrument {
        symbol: "YM.FUT",
        anchor: 38_000 * PRICE_SCALE,
        tick_size: PRICE_SCALE,
    },
    Instrument {
        symbol: "RTY.FUT",
        anchor: 2_000 * PRICE_SCALE,
        tick_size: PRICE_SCALE / 10,
    },
    Instrument {
        symbol: "CL.FUT",
        anchor: 75 * PRICE_SCALE,
        tick_size: PRICE_SCALE / 100,
    },
    Instrument {
        symbol: "GC.FUT",
        anchor: 2_050 * PRICE_SCALE,
        tick_size: PRICE_SCALE / 10,
    },
    Instrument {
        symbol: "ZN.FUT",
        anchor: 110 * PRICE_SCALE,
        tick_size: PRICE_SCALE / 64,
    },
    Instrument {
        symbol: "6E.FUT",
        anchor: 1_090_000_000,
        tick_size: 50_000,
    },
];

impl Instrument {
    /// Look up an instrument by symbol.
    #[must_use]
    pub fn lookup(symbol: &str) -> Option<&'static Self> {
        INSTRUMENTS.iter().find(|i| i.symbol == symbol)
    }

    /// All known instruments.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        INSTRUMENTS
    }

    /// Lowest price the walk may reach, on the tick grid.
    #[must_use]
    pub const fn floor(&self) -> i64 {
        self.anchor - self.band()
    }

    /// Highest price the walk may reach, on the tick grid.
    #[must_use]
    pub const fn ceiling(&self) -> i64 {
        self.anchor + self.band()
    }

    const fn band(&self) -> i64 {
        let raw = self.anchor / 10_000 * BAND_BPS;
        raw - raw % self.tick_size
    }

    /// Anchor price as a decimal, for logging.
    #[must_use]
    pub fn anchor_decimal(&self) -> Decimal {
        price_to_decimal(self.anchor)
    }
}
