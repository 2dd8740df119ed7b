use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::{Direction, QuantityKind};

/// Default window after which a quantity is re-announced even if it has not moved.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 3600;

/// Gate state for one tracked quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEntry {
    threshold: f64,
    last_notified_at: DateTime<Utc>,
    last_notified_value: f64,
}

impl WatchEntry {
    /// A fresh entry that has never notified.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last_notified_at: DateTime::<Utc>::UNIX_EPOCH,
            last_notified_value: 0.0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn last_notified_at(&self) -> DateTime<Utc> {
        self.last_notified_at
    }

    pub fn last_notified_value(&self) -> f64 {
        self.last_notified_value
    }

    #[cfg(test)]
    pub fn with_last(mut self, at: DateTime<Utc>, value: f64) -> Self {
        self.last_notified_at = at;
        self.last_notified_value = value;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    Stale,
    Moved,
    StaleAndMoved,
}

/// Outcome of a gate check that decided to notify.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fired {
    pub previous_value: f64,
    pub value: f64,
    pub direction: Direction,
    pub reason: FireReason,
}

/// Decides whether a fresh observation is worth a notification.
#[derive(Debug, Clone, Copy)]
pub struct NotificationGate {
    stale_after_secs: i64,
}

impl NotificationGate {
    pub fn new(stale_after_secs: u64) -> Self {
        Self {
            stale_after_secs: i64::try_from(stale_after_secs).unwrap_or(i64::MAX),
        }
    }

    /// Pure decision: never touches `entry`.
    ///
    /// Fires when the last notification is at least `stale_after` old (elapsed
    /// time rounded to whole seconds) or when the value moved by at least the
    /// entry's threshold.
    pub fn evaluate(&self, entry: &WatchEntry, observed: f64, now: DateTime<Utc>) -> Option<Fired> {
        let stale = self.is_stale(entry.last_notified_at, now);
        let moved = (observed - entry.last_notified_value).abs() >= entry.threshold;

        let reason = match (stale, moved) {
            (true, true) => FireReason::StaleAndMoved,
            (true, false) => FireReason::Stale,
            (false, true) => FireReason::Moved,
            (false, false) => return None,
        };

        Some(Fired {
            previous_value: entry.last_notified_value,
            value: observed,
            direction: Direction::classify(observed, entry.last_notified_value),
            reason,
        })
    }

    /// Evaluate and, on fire, record `(now, observed)` on the entry.
    pub fn should_notify(
        &self,
        entry: &mut WatchEntry,
        observed: f64,
        now: DateTime<Utc>,
    ) -> Option<Fired> {
        let fired = self.evaluate(entry, observed, now)?;
        entry.last_notified_at = now;
        entry.last_notified_value = observed;
        Some(fired)
    }

    fn is_stale(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed_ms = (now - last).num_milliseconds();
        let elapsed_secs = (elapsed_ms as f64 / 1000.0).round() as i64;
        elapsed_secs >= self.stale_after_secs
    }

    pub fn stale_after(&self) -> Duration {
        Duration::seconds(self.stale_after_secs)
    }
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER_SECS)
    }
}

/// Everything tracked for one configured symbol.
#[derive(Debug, Clone)]
pub struct SymbolWatch {
    pub symbol: String,
    pub icon: String,
    pub market: Option<WatchEntry>,
    pub swap_pool: Option<WatchEntry>,
}

impl SymbolWatch {
    pub fn entry_mut(&mut self, kind: QuantityKind) -> Option<&mut WatchEntry> {
        match kind {
            QuantityKind::Market => self.market.as_mut(),
            QuantityKind::SwapPool => self.swap_pool.as_mut(),
        }
    }
}

/// Symbol-keyed watch state owned by a single driver.
///
/// The key set is fixed at construction; only entry state changes afterwards.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    watches: BTreeMap<String, SymbolWatch>,
}

impl Registry {
    pub fn new(watches: impl IntoIterator<Item = SymbolWatch>) -> Self {
        Self {
            watches: watches
                .into_iter()
                .map(|watch| (watch.symbol.clone(), watch))
                .collect(),
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.watches.keys().map(String::as_str)
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolWatch> {
        self.watches.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut SymbolWatch> {
        self.watches.get_mut(symbol)
    }

    pub fn entry_mut(&mut self, symbol: &str, kind: QuantityKind) -> Option<&mut WatchEntry> {
        self.watches.get_mut(symbol)?.entry_mut(kind)
    }
}
