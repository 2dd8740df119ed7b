use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use error_stack::Report;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamerConfig;
use crate::error::DriverError;
use crate::format::{self, TradeLabels};
use crate::model::{QuantityKind, StreamEvent, Trade};
use crate::notifier::{Notifier, deliver};
use crate::source::TradeSource;
use crate::watch::{Fired, NotificationGate, Registry, SymbolWatch, WatchEntry};

const DRIVER: &str = "streamer";

/// Display metadata for one streamed pair.
#[derive(Debug, Clone)]
struct StreamPair {
    base: String,
    quote: String,
    quote_icon: String,
}

/// Push-driven driver: reacts to trades forwarded by a stream source.
pub struct Streamer {
    registry: Registry,
    pairs: HashMap<String, StreamPair>,
    fiat: String,
    gate: NotificationGate,
    pricing: Arc<dyn TradeSource>,
    notifier: Arc<dyn Notifier>,
}

impl Streamer {
    pub fn new(
        config: &StreamerConfig,
        gate: NotificationGate,
        pricing: Arc<dyn TradeSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let registry = Registry::new(config.watches.iter().map(|watch| SymbolWatch {
            symbol: watch.symbol(),
            icon: watch.icon.clone(),
            market: Some(WatchEntry::new(watch.threshold)),
            swap_pool: None,
        }));
        let pairs = config
            .watches
            .iter()
            .map(|watch| {
                let pair = StreamPair {
                    base: watch.base.to_uppercase(),
                    quote: watch.quote.to_uppercase(),
                    quote_icon: watch.quote_icon.clone(),
                };
                (watch.symbol(), pair)
            })
            .collect();

        Self {
            registry,
            pairs,
            fiat: config.fiat.to_uppercase(),
            gate,
            pricing,
            notifier,
        }
    }

    /// Symbols to subscribe to.
    pub fn symbols(&self) -> Vec<String> {
        self.registry.symbols().map(str::to_owned).collect()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Consume events until `cancel` fires.
    ///
    /// The channel closing while not cancelled means the stream task died;
    /// that is reported to the operator and returned as a fatal error.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), Report<DriverError>> {
        info!(symbols = ?self.symbols(), "streamer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        self.handle(event).await;
                    }
                    None if cancel.is_cancelled() => break,
                    None => {
                        let report =
                            Report::new(DriverError::ChannelClosed { driver: DRIVER.into() });
                        tracing::error!(error = ?report, "stream ended unexpectedly");
                        let text = format::fatal(&format!("{report:?}"));
                        deliver(self.notifier.as_ref(), &text).await;
                        return Err(report);
                    }
                },
            }
        }

        info!("streamer stopping");
        deliver(self.notifier.as_ref(), format::STOPPED).await;
        Ok(())
    }

    /// React to one stream event; returns the gate outcome for trades that fired.
    pub async fn handle(&mut self, event: StreamEvent) -> Option<Fired> {
        match event {
            StreamEvent::Connected { streams } => {
                deliver(self.notifier.as_ref(), &format::stream_started(&streams)).await;
                None
            }
            StreamEvent::Subscribed => {
                deliver(self.notifier.as_ref(), format::STREAM_READY).await;
                None
            }
            StreamEvent::Disconnected => {
                deliver(self.notifier.as_ref(), format::STREAM_OFF).await;
                None
            }
            StreamEvent::Trade(trade) => self.on_trade(trade).await,
        }
    }

    async fn on_trade(&mut self, trade: Trade) -> Option<Fired> {
        let Some(entry) = self.registry.entry_mut(&trade.symbol, QuantityKind::Market) else {
            warn!(symbol = %trade.symbol, "trade for unwatched symbol");
            return None;
        };
        if !trade.price.is_finite() {
            return None;
        }
        let Some(fired) = self.gate.should_notify(entry, trade.price, Utc::now()) else {
            debug!(
                symbol = %trade.symbol,
                price = trade.price,
                trade_time = %trade.timestamp,
                last_notified_at = %entry.last_notified_at(),
                threshold = entry.threshold(),
                "below threshold"
            );
            return None;
        };

        let (Some(pair), Some(watch)) = (
            self.pairs.get(&trade.symbol),
            self.registry.get(&trade.symbol),
        ) else {
            return Some(fired);
        };

        info!(
            symbol = %trade.symbol,
            price = trade.price,
            previous = fired.previous_value,
            direction = %fired.direction,
            reason = ?fired.reason,
            "notifying"
        );

        let quote_fiat = self.quote_fiat_price(&pair.quote).await;
        let labels = TradeLabels {
            base: &pair.base,
            quote: &pair.quote,
            fiat: &self.fiat,
            icon: &watch.icon,
            quote_icon: &pair.quote_icon,
        };
        let text = format::trade_alert(&labels, trade.price, quote_fiat, &fired);
        deliver(self.notifier.as_ref(), &text).await;
        Some(fired)
    }

    async fn quote_fiat_price(&self, quote: &str) -> Option<f64> {
        let symbol = format!("{quote}{}", self.fiat);
        match self.pricing.latest_trade_price(&symbol).await {
            Ok(price) => price.filter(|p| p.is_finite() && *p > 0.0),
            Err(e) => {
                warn!(symbol = %symbol, error = ?e, "fiat price unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::model::Direction;
    use crate::notifier::testing::RecordingNotifier;
    use crate::source::testing::{FakeFeed, Reply};

    const CONFIG: &str = r#"
fiat = "BIDR"
notifier = { kind = "terminal" }

[[watches]]
base = "AXS"
quote = "BNB"
threshold = 0.005
icon = "🔷"
quote_icon = "🍁"

[[watches]]
base = "SLP"
quote = "ETH"
threshold = 0.0000001
icon = "👛"
quote_icon = "💰"
"#;

    fn streamer(feed: &Arc<FakeFeed>, notifier: &RecordingNotifier) -> Streamer {
        let config: StreamerConfig = toml::from_str(CONFIG).unwrap();
        Streamer::new(
            &config,
            NotificationGate::default(),
            feed.clone(),
            Arc::new(notifier.clone()),
        )
    }

    fn trade(symbol: &str, price: f64) -> StreamEvent {
        StreamEvent::Trade(Trade {
            symbol: symbol.into(),
            price,
            timestamp: DateTime::from_timestamp_millis(1_704_067_200_000).unwrap(),
        })
    }

    #[test]
    fn subscribes_to_every_configured_pair() {
        let feed = Arc::new(FakeFeed::default());
        let streamer = streamer(&feed, &RecordingNotifier::default());
        assert_eq!(streamer.symbols(), ["AXSBNB", "SLPETH"]);
    }

    #[tokio::test]
    async fn first_trade_fires_with_fiat_conversion() {
        let feed = Arc::new(FakeFeed::default());
        feed.set_price("BNBBIDR", Reply::Data(5_000_000.0));
        let notifier = RecordingNotifier::default();
        let mut streamer = streamer(&feed, &notifier);

        let fired = streamer.handle(trade("AXSBNB", 0.02)).await.unwrap();

        assert_eq!(fired.value, 0.02);
        assert_eq!(fired.direction, Direction::Up);
        assert_eq!(feed.calls(), ["trade:BNBBIDR"]);
        assert_eq!(
            notifier.messages(),
            ["🔷 AXS_BNB: 0.02 🔺\n💵 AXS_BIDR: 100,000\n🍁 BNB_BIDR: 5,000,000"]
        );
    }

    #[tokio::test]
    async fn small_moves_are_suppressed() {
        let feed = Arc::new(FakeFeed::default());
        feed.set_price("BNBBIDR", Reply::Data(5_000_000.0));
        let notifier = RecordingNotifier::default();
        let mut streamer = streamer(&feed, &notifier);

        assert!(streamer.handle(trade("AXSBNB", 0.020)).await.is_some());
        assert!(streamer.handle(trade("AXSBNB", 0.022)).await.is_none());
        assert!(streamer.handle(trade("AXSBNB", 0.026)).await.is_some());

        assert_eq!(notifier.messages().len(), 2);
        let entry = streamer.registry().get("AXSBNB").unwrap().market.clone().unwrap();
        assert_eq!(entry.last_notified_value(), 0.026);
    }

    #[tokio::test]
    async fn missing_fiat_price_still_notifies() {
        let feed = Arc::new(FakeFeed::default());
        feed.set_price("ETHBIDR", Reply::Unreachable);
        let notifier = RecordingNotifier::default();
        let mut streamer = streamer(&feed, &notifier);

        assert!(streamer.handle(trade("SLPETH", 0.0000123)).await.is_some());
        assert!(notifier.messages()[0].contains("SLP_BIDR: n/a"));
    }

    #[tokio::test]
    async fn unknown_symbol_is_ignored() {
        let feed = Arc::new(FakeFeed::default());
        let notifier = RecordingNotifier::default();
        let mut streamer = streamer(&feed, &notifier);

        assert!(streamer.handle(trade("BTCUSDT", 42_000.0)).await.is_none());
        assert!(notifier.messages().is_empty());
        assert!(feed.calls().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_events_are_announced() {
        let feed = Arc::new(FakeFeed::default());
        let notifier = RecordingNotifier::default();
        let mut streamer = streamer(&feed, &notifier);

        streamer
            .handle(StreamEvent::Connected {
                streams: vec!["axsbnb@aggTrade".into()],
            })
            .await;
        streamer.handle(StreamEvent::Subscribed).await;
        streamer.handle(StreamEvent::Disconnected).await;

        assert_eq!(
            notifier.messages(),
            [
                "BOT STARTED\n\n- axsbnb@aggTrade",
                format::STREAM_READY,
                format::STREAM_OFF
            ]
        );
    }

    #[tokio::test]
    async fn run_processes_events_then_stops_on_cancel() {
        let feed = Arc::new(FakeFeed::default());
        feed.set_price("BNBBIDR", Reply::Data(5_000_000.0));
        let notifier = RecordingNotifier::default();
        let streamer = streamer(&feed, &notifier);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(streamer.run(rx, cancel.clone()));
        tx.send(trade("AXSBNB", 0.02)).await.unwrap();
        tx.send(StreamEvent::Subscribed).await.unwrap();

        // wait until both events are handled
        for _ in 0..100 {
            if notifier.messages().len() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let messages = notifier.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], format::STOPPED);
    }

    #[tokio::test]
    async fn closed_channel_without_cancel_is_fatal() {
        let feed = Arc::new(FakeFeed::default());
        let notifier = RecordingNotifier::default();
        let streamer = streamer(&feed, &notifier);
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let result = streamer.run(rx, CancellationToken::new()).await;

        assert!(result.is_err());
        assert!(notifier.messages()[0].starts_with("[BOT ERROR]"));
    }
}
