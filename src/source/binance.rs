use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use governor::DefaultDirectRateLimiter;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::model::{StreamEvent, Trade};
use crate::source::{TradeSource, TradeStream, check_status, http_client, rate_limiter, send_error};

const FEED: &str = "binance";
/// Only trades from this recent window count as "latest".
const AGG_TRADES_WINDOW_MS: i64 = 30 * 60 * 1000;
// Reconnect before 24-hour auto-disconnect (23 hours)
const WS_SESSION_SECS: u64 = 23 * 60 * 60;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF_SECS: u64 = 60;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Binance spot market: REST aggregate trades and the raw websocket stream.
pub struct Binance {
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
    subscription_id: u64,
    session_ttl: Duration,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl Binance {
    pub fn new(
        rest_url: &str,
        ws_url: &str,
        subscription_id: u64,
        timeout: Duration,
    ) -> Result<Self, Report<SourceError>> {
        Ok(Self {
            client: http_client(FEED, timeout)?,
            rest_url: rest_url.trim_end_matches('/').to_owned(),
            ws_url: ws_url.to_owned(),
            subscription_id,
            session_ttl: Duration::from_secs(WS_SESSION_SECS),
            rate_limiter: rate_limiter(nonzero!(10u32)),
        })
    }

    #[cfg(test)]
    fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

impl TradeSource for Binance {
    fn name(&self) -> &str {
        FEED
    }

    fn latest_trade_price(
        &self,
        id: &str,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<SourceError>>> {
        let symbol = id.to_uppercase();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            // Without a time range Binance answers with the newest trades
            let params = [("symbol", symbol.as_str()), ("limit", "1")];

            let url = format!("{}/api/v3/aggTrades", self.rest_url);
            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .map_err(|e| send_error(FEED, e))
                .attach_with(|| format!("symbol: {symbol}"))?;

            check_status(FEED, &response).attach_with(|| format!("symbol: {symbol}"))?;

            let trades: Vec<AggTrade> = response
                .json()
                .await
                .change_context(SourceError::ResponseParse { feed: FEED.into() })?;

            let Some(trade) = trades.first() else {
                return Ok(None);
            };
            let age_ms = Utc::now().timestamp_millis() - trade.trade_time;
            if age_ms > AGG_TRADES_WINDOW_MS {
                debug!(symbol = %symbol, age_ms, "latest binance trade is too old");
                return Ok(None);
            }

            trade
                .price()
                .map(Some)
                .attach_with(|| format!("symbol: {symbol}"))
        })
    }
}

impl TradeStream for Binance {
    fn stream_trades(
        &self,
        symbols: &[String],
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<SourceError>>> {
        let streams = stream_names(symbols);
        Box::pin(async move {
            let mut backoff = INITIAL_BACKOFF;
            // Whether the driver has been told the stream is up
            let mut live = false;

            while !cancel.is_cancelled() {
                let attempt = connect_trade_ws(&self.ws_url, self.subscription_id, &streams).await;
                let error = match attempt {
                    Ok(ws) => {
                        backoff = INITIAL_BACKOFF;
                        let announce = !live;
                        if announce {
                            info!(streams = ?streams, "binance trade ws connected");
                            let connected = StreamEvent::Connected {
                                streams: streams.clone(),
                            };
                            if tx.send(connected).await.is_err() {
                                break;
                            }
                            live = true;
                        }

                        let session = Session {
                            subscription_id: self.subscription_id,
                            announce,
                            ttl: self.session_ttl,
                        };
                        match session.pump(ws, &tx, &cancel).await {
                            Ok(SessionEnd::Stopped) => break,
                            Ok(SessionEnd::Rotate) => continue,
                            Err(e) => e,
                        }
                    }
                    Err(e) => e,
                };

                warn!(
                    error = %error,
                    backoff_secs = backoff.as_secs(),
                    "binance trade ws disconnected, retrying..."
                );
                if live {
                    live = false;
                    if tx.send(StreamEvent::Disconnected).await.is_err() {
                        break;
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
            }
            Ok(())
        })
    }
}

/// Stream names for the aggregate-trade channel of each symbol.
fn stream_names(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .map(|s| format!("{}@aggTrade", s.to_lowercase()))
        .collect()
}

/// Connect and send the subscribe request.
///
/// The request goes out before the first read, so the handshake is complete
/// by the time any event reaches the driver.
async fn connect_trade_ws(
    ws_url: &str,
    subscription_id: u64,
    streams: &[String],
) -> Result<WsStream, Report<SourceError>> {
    let (mut ws, _) = connect_async(ws_url)
        .await
        .change_context(SourceError::Connection { feed: FEED.into() })
        .attach_with(|| format!("url: {ws_url}"))?;

    let request = SubscribeRequest {
        method: "SUBSCRIBE",
        id: subscription_id,
        params: streams,
    };
    let payload = serde_json::to_string(&request)
        .change_context(SourceError::Request { feed: FEED.into() })?;
    ws.send(Message::Text(payload.into()))
        .await
        .change_context(SourceError::Connection { feed: FEED.into() })?;

    Ok(ws)
}

enum SessionEnd {
    /// Cancelled, or the driver went away.
    Stopped,
    /// Session lifetime reached; reconnect right away.
    Rotate,
}

/// One connected websocket session.
struct Session {
    subscription_id: u64,
    /// Forward the subscription ack; off for silent rotations.
    announce: bool,
    ttl: Duration,
}

impl Session {
    /// Forward events until cancelled, rotated or disconnected.
    async fn pump(
        &self,
        ws: WsStream,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, Report<SourceError>> {
        let (mut write, mut read) = ws.split();

        let rotate_timer = sleep(self.ttl);
        tokio::pin!(rotate_timer);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("binance trade ws cancelled");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Stopped);
                }
                _ = &mut rotate_timer => {
                    info!("binance trade ws session limit reached, rotating");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Rotate);
                }
                msg = read.next() => match msg {
                    None => {
                        return Err(Report::new(SourceError::Connection { feed: FEED.into() })
                            .attach("stream ended"));
                    }
                    Some(Err(e)) => {
                        return Err(Report::new(e)
                            .change_context(SourceError::Connection { feed: FEED.into() }));
                    }
                    Some(Ok(Message::Text(text))) => {
                        let Some(event) = parse_stream_message(&text, self.subscription_id) else {
                            continue;
                        };
                        if matches!(event, StreamEvent::Subscribed) && !self.announce {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            debug!("binance trade ws receiver dropped");
                            return Ok(SessionEnd::Stopped);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        // Server sends ping every 20s; must pong within 60s
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(Report::new(SourceError::Connection { feed: FEED.into() })
                            .attach(format!("closed by server: {frame:?}")));
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

fn parse_stream_message(text: &str, subscription_id: u64) -> Option<StreamEvent> {
    match serde_json::from_str::<StreamMessage>(text) {
        Ok(StreamMessage::AggTrade(data)) => match data.into_trade() {
            Ok(trade) => Some(StreamEvent::Trade(trade)),
            Err(e) => {
                warn!(error = ?e, raw = %text, "binance trade price unparseable");
                None
            }
        },
        Ok(StreamMessage::Ack { id, .. }) if id == subscription_id => Some(StreamEvent::Subscribed),
        Ok(StreamMessage::Ack { id, .. }) => {
            debug!(id, "ignoring ack for unknown request");
            None
        }
        Ok(StreamMessage::Error { code, msg }) => {
            warn!(code, msg = %msg, "binance rejected stream request");
            None
        }
        Err(e) => {
            warn!(error = %e, raw = %text, "binance stream parse error");
            None
        }
    }
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AggTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

impl AggTrade {
    fn price(&self) -> Result<f64, Report<SourceError>> {
        self.price
            .parse::<f64>()
            .change_context(SourceError::ResponseParse { feed: FEED.into() })
    }
}

// ── WebSocket message types ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    method: &'static str,
    id: u64,
    params: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamMessage {
    AggTrade(AggTradeData),
    /// `{"result": null, "id": 1}`
    Ack {
        #[allow(dead_code)]
        result: serde_json::Value,
        id: u64,
    },
    Error {
        code: i64,
        msg: String,
    },
}

#[derive(Debug, Deserialize)]
struct AggTradeData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

impl AggTradeData {
    fn into_trade(self) -> Result<Trade, Report<SourceError>> {
        let price = self
            .price
            .parse::<f64>()
            .change_context(SourceError::ResponseParse { feed: FEED.into() })?;
        let timestamp = DateTime::from_timestamp_millis(self.trade_time).unwrap_or_else(Utc::now);

        Ok(Trade {
            symbol: self.symbol,
            price,
            timestamp,
        })
    }
}
