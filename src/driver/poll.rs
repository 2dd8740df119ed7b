use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike, Utc};
use error_stack::Report;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::error::{DriverError, SourceError};
use crate::format;
use crate::model::{CrossRate, QuantityKind};
use crate::notifier::{Notifier, deliver};
use crate::source::{PoolSource, TradeSource};
use crate::watch::{Fired, NotificationGate, Registry, SymbolWatch, WatchEntry};

const TICK: Duration = Duration::from_secs(1);

/// Source ids for one polled symbol, in configuration order.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub symbol: String,
    pub market_id: Option<u64>,
    pub pool_id: Option<u64>,
}

impl PollTarget {
    fn quantities(&self) -> impl Iterator<Item = (QuantityKind, u64)> + '_ {
        [
            self.market_id.map(|id| (QuantityKind::Market, id)),
            self.pool_id.map(|id| (QuantityKind::SwapPool, id)),
        ]
        .into_iter()
        .flatten()
    }
}

/// Fires once per matching wall-clock minute, and always on the first tick.
#[derive(Debug, Clone)]
pub struct Schedule {
    modulus: u32,
    last_run: Option<u32>,
}

impl Schedule {
    pub fn new(modulus: u32) -> Self {
        Self {
            modulus: modulus.max(1),
            last_run: None,
        }
    }

    pub fn due(&mut self, minute: u32) -> bool {
        let due = match self.last_run {
            None => true,
            Some(last) => minute % self.modulus == 0 && last != minute,
        };
        if due {
            self.last_run = Some(minute);
        }
        due
    }
}

/// What one sweep over the registry did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub notified: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub abandoned: bool,
}

struct Feeds {
    gate: NotificationGate,
    market: Arc<dyn TradeSource>,
    pools: Arc<dyn PoolSource>,
    notifier: Arc<dyn Notifier>,
    anchor: String,
}

/// Timer-driven driver over order-book deals and AMM pools.
pub struct Poller {
    registry: Registry,
    targets: Vec<PollTarget>,
    feeds: Feeds,
    schedule: Schedule,
    symbol_delay: Duration,
}

impl Poller {
    pub fn new(
        config: &PollerConfig,
        gate: NotificationGate,
        market: Arc<dyn TradeSource>,
        pools: Arc<dyn PoolSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let registry = Registry::new(config.watches.iter().map(|watch| SymbolWatch {
            symbol: watch.symbol.clone(),
            icon: watch.icon.clone(),
            market: watch.market.map(|q| WatchEntry::new(q.threshold)),
            swap_pool: watch.swap.map(|q| WatchEntry::new(q.threshold)),
        }));
        let targets = config
            .watches
            .iter()
            .map(|watch| PollTarget {
                symbol: watch.symbol.clone(),
                market_id: watch.market.map(|q| q.id),
                pool_id: watch.swap.map(|q| q.id),
            })
            .collect();

        Self {
            registry,
            targets,
            feeds: Feeds {
                gate,
                market,
                pools,
                notifier,
                anchor: config.anchor_currency.clone(),
            },
            schedule: Schedule::new(config.minute_modulus),
            symbol_delay: Duration::from_millis(config.symbol_delay_ms),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Tick every second and sweep whenever the schedule says so, until
    /// `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), Report<DriverError>> {
        info!(symbols = ?self.registry.symbols().collect::<Vec<_>>(), "poller started");
        let started = format::poller_started(self.targets.iter().map(|t| t.symbol.as_str()));
        deliver(self.feeds.notifier.as_ref(), &started).await;

        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.schedule.due(Local::now().minute()) {
                        continue;
                    }
                    let report = self.sweep(&cancel).await;
                    info!(
                        notified = report.notified,
                        unavailable = report.unavailable,
                        failed = report.failed,
                        abandoned = report.abandoned,
                        "poll sweep finished"
                    );
                }
            }
        }

        info!("poller stopping");
        deliver(self.feeds.notifier.as_ref(), format::STOPPED).await;
        Ok(())
    }

    /// Check every configured quantity once, in configuration order.
    ///
    /// A transport failure abandons the remaining symbols; any other failure
    /// only skips the quantity that hit it.
    pub async fn sweep(&mut self, cancel: &CancellationToken) -> SweepReport {
        let mut report = SweepReport::default();

        for (index, target) in self.targets.iter().enumerate() {
            if index > 0 && !self.symbol_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return report,
                    _ = tokio::time::sleep(self.symbol_delay) => {}
                }
            }

            for (kind, id) in target.quantities() {
                match self.feeds.check(&mut self.registry, target, kind, id).await {
                    Ok(Some(_)) => report.notified += 1,
                    Ok(None) => {}
                    Err(CheckError::Unavailable) => report.unavailable += 1,
                    Err(CheckError::Source(e)) if e.current_context().is_transport() => {
                        warn!(
                            symbol = %target.symbol,
                            %kind,
                            error = ?e,
                            "transport failure, abandoning sweep"
                        );
                        let text = format::transport_failed(
                            self.feeds.feed_name(kind),
                            &target.symbol,
                            &e.current_context().to_string(),
                        );
                        deliver(self.feeds.notifier.as_ref(), &text).await;
                        report.failed += 1;
                        report.abandoned = true;
                        return report;
                    }
                    Err(CheckError::Source(e)) => {
                        warn!(symbol = %target.symbol, %kind, error = ?e, "price fetch failed");
                        let what = match kind {
                            QuantityKind::Market => "market",
                            QuantityKind::SwapPool => "pair",
                        };
                        let text = format::fetch_failed(what, &target.symbol);
                        deliver(self.feeds.notifier.as_ref(), &text).await;
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }
}

#[derive(Debug)]
enum CheckError {
    /// The feed answered with nothing usable.
    Unavailable,
    Source(Report<SourceError>),
}

impl From<Report<SourceError>> for CheckError {
    fn from(report: Report<SourceError>) -> Self {
        Self::Source(report)
    }
}

impl Feeds {
    fn feed_name(&self, kind: QuantityKind) -> &str {
        match kind {
            QuantityKind::Market => self.market.name(),
            QuantityKind::SwapPool => self.pools.name(),
        }
    }

    async fn observe(&self, kind: QuantityKind, id: u64) -> Result<CrossRate, CheckError> {
        let cross = match kind {
            QuantityKind::Market => self
                .market
                .latest_trade_price(&id.to_string())
                .await?
                .and_then(CrossRate::from_price),
            QuantityKind::SwapPool => self
                .pools
                .fetch_pool(id)
                .await?
                .and_then(|pool| pool.cross_rate(&self.anchor)),
        };
        cross.ok_or(CheckError::Unavailable)
    }

    async fn check(
        &self,
        registry: &mut Registry,
        target: &PollTarget,
        kind: QuantityKind,
        id: u64,
    ) -> Result<Option<Fired>, CheckError> {
        let cross = match self.observe(kind, id).await {
            Err(CheckError::Unavailable) => {
                debug!(symbol = %target.symbol, %kind, id, "no usable data this cycle");
                return Err(CheckError::Unavailable);
            }
            other => other?,
        };

        let Some(watch) = registry.get_mut(&target.symbol) else {
            return Ok(None);
        };
        let Some(entry) = watch.entry_mut(kind) else {
            return Ok(None);
        };
        let Some(fired) = self.gate.should_notify(entry, cross.rate, Utc::now()) else {
            debug!(
                symbol = %target.symbol,
                %kind,
                value = cross.rate,
                last = entry.last_notified_value(),
                threshold = entry.threshold(),
                "below threshold"
            );
            return Ok(None);
        };

        info!(
            symbol = %target.symbol,
            %kind,
            value = fired.value,
            previous = fired.previous_value,
            direction = %fired.direction,
            reason = ?fired.reason,
            "notifying"
        );
        let text = match kind {
            QuantityKind::Market => {
                format::market_alert(&target.symbol, &watch.icon, cross, &fired)
            }
            QuantityKind::SwapPool => {
                format::swap_alert(&target.symbol, &watch.icon, cross, &fired)
            }
        };
        deliver(self.notifier.as_ref(), &text).await;
        Ok(Some(fired))
    }
}
