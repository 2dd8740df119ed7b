use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The tracked quantities a symbol can carry, each with its own gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    /// Latest trade or order-book deal price.
    Market,
    /// Cross-rate derived from an AMM pool's reserves.
    SwapPool,
}

impl fmt::Display for QuantityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::SwapPool => write!(f, "swap"),
        }
    }
}

/// Movement of a fresh value relative to the last notified one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Unchanged,
}

impl Direction {
    pub fn classify(current: f64, previous: f64) -> Self {
        if current > previous {
            Self::Up
        } else if current < previous {
            Self::Down
        } else {
            Self::Unchanged
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Unchanged => "unchanged",
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            Self::Up => "🔺",
            Self::Down => "🔻",
            Self::Unchanged => "⏸",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a liquidity pool: an amount tagged with its currency code.
#[derive(Debug, Clone, PartialEq)]
pub struct Reserve {
    pub amount: f64,
    pub code: String,
}

impl Reserve {
    /// Parse an on-chain asset string such as `"1234.5678 WAX"`.
    pub fn parse(quantity: &str) -> Option<Self> {
        let (amount, code) = quantity.trim().split_once(' ')?;
        let amount = amount.parse::<f64>().ok()?;
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        Some(Self {
            amount,
            code: code.to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolReserves {
    pub first: Reserve,
    pub second: Reserve,
}

/// Price of one token expressed in the anchor currency, plus its reciprocal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossRate {
    pub rate: f64,
    pub inverse: f64,
}

impl CrossRate {
    /// Wrap a direct quote; `None` for a zero or non-finite price.
    pub fn from_price(price: f64) -> Option<Self> {
        if price == 0.0 || !price.is_finite() {
            return None;
        }
        Some(Self {
            rate: price,
            inverse: 1.0 / price,
        })
    }
}

impl PoolReserves {
    /// Derive the cross-rate with `anchor` as the quote currency.
    ///
    /// The anchor side is picked by currency code, never by position. Returns
    /// `None` when neither side holds the anchor or a reserve is zero, so a
    /// non-finite rate never reaches the gate.
    pub fn cross_rate(&self, anchor: &str) -> Option<CrossRate> {
        let (anchor_side, other_side) = if self.first.code.eq_ignore_ascii_case(anchor) {
            (&self.first, &self.second)
        } else if self.second.code.eq_ignore_ascii_case(anchor) {
            (&self.second, &self.first)
        } else {
            return None;
        };

        if anchor_side.amount == 0.0 || other_side.amount == 0.0 {
            return None;
        }

        let rate = anchor_side.amount / other_side.amount;
        let inverse = other_side.amount / anchor_side.amount;
        (rate.is_finite() && inverse.is_finite()).then_some(CrossRate { rate, inverse })
    }
}

/// A single trade pushed by a stream source.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Events forwarded from a stream source to the push driver.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection is open and the subscribe request has been sent.
    Connected { streams: Vec<String> },
    /// The server acknowledged the subscription.
    Subscribed,
    Trade(Trade),
    /// The connection dropped; the source will reconnect on its own.
    Disconnected,
}
