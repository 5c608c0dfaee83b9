//! Random-walk trade generation.
//!
//! Prices move by whole ticks and reflect off the instrument's band.
//! Sizes follow a heavy-tailed (Pareto) distribution: mostly one to three
//! lots with the occasional block.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::instruments::Instrument;
use crate::domain::market_data::{PriceTick, UnixNanos};

/// Largest generated trade size.
const MAX_SIZE: u32 = 250;

/// Pareto shape for trade sizes.
const SIZE_ALPHA: f64 = 1.6;

/// Tick moves and their relative weights.
const STEPS: &[(i64, u32)] = &[(-2, 1), (-1, 4), (0, 6), (1, 4), (2, 1)];

/// Stable 64-bit FNV-1a hash, used to derive per-symbol seeds.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Trade generator for one instrument.
#[derive(Debug)]
pub struct TradeGenerator {
    instrument: &'static Instrument,
    price: i64,
    rng: StdRng,
}

impl TradeGenerator {
    /// Create a generator starting at the instrument's anchor.
    #[must_use]
    pub fn new(instrument: &'static Instrument, seed: u64) -> Self {
        Self {
            instrument,
            price: instrument.anchor,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Symbol being generated.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        self.instrument.symbol
    }

    /// Produce a trade at `event_time`.
    pub fn trade_at(&mut self, event_time: UnixNanos) -> PriceTick {
        let price = self.next_price();
        let size = self.next_size();
        PriceTick {
            event_time,
            symbol: self.instrument.symbol.to_string(),
            price,
            size,
        }
    }

    /// Random gap in `[min, max]` nanoseconds.
    pub fn gap(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min.max(1);
        }
        self.rng.random_range(min..=max).max(1)
    }

    fn next_price(&mut self) -> i64 {
        let total: u32 = STEPS.iter().map(|(_, w)| w).sum();
        let mut pick = self.rng.random_range(0..total);
        let mut step = 0;
        for (ticks, weight) in STEPS {
            if pick < *weight {
                step = *ticks;
                break;
            }
            pick -= weight;
        }

        let delta = step * self.instrument.tick_size;
        let mut next = self.price + delta;
        if next > self.instrument.ceiling() || next < self.instrument.floor() {
            next = self.price - delta;
        }
        self.price = next.clamp(self.instrument.floor(), self.instrument.ceiling());
        self.price
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn next_size(&mut self) -> u32 {
        let u: f64 = self.rng.random();
        let size = (1.0 - u).powf(-1.0 / SIZE_ALPHA).floor();
        (size as u32).clamp(1, MAX_SIZE)
    }
}
