pub mod alcor;
pub mod binance;
pub mod wax;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::model::{PoolReserves, StreamEvent};

/// A REST feed that reports the latest traded price of an instrument.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn TradeSource`).
pub trait TradeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Most recent trade price for `id`.
    ///
    /// `Ok(None)` means the feed answered but had nothing to report.
    fn latest_trade_price(
        &self,
        id: &str,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<SourceError>>>;
}

/// A REST feed that reports AMM pool reserves.
pub trait PoolSource: Send + Sync {
    fn name(&self) -> &str;

    /// Snapshot of the pool with exactly `pool_id`, or `Ok(None)` if absent.
    fn fetch_pool(
        &self,
        pool_id: u64,
    ) -> BoxFuture<'_, Result<Option<PoolReserves>, Report<SourceError>>>;
}

/// A push feed of trades.
pub trait TradeStream: Send + Sync {
    /// Subscribe to trades for `symbols`.
    ///
    /// Sends `StreamEvent` values into `tx` until `cancel` is triggered,
    /// reconnecting on its own when the connection drops.
    fn stream_trades(
        &self,
        symbols: &[String],
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<SourceError>>>;
}

pub(crate) fn http_client(
    feed: &str,
    timeout: Duration,
) -> Result<reqwest::Client, Report<SourceError>> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .change_context(SourceError::Connection { feed: feed.into() })
}

pub(crate) fn rate_limiter(per_second: NonZeroU32) -> Arc<DefaultDirectRateLimiter> {
    Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
}

/// Connect failures and timeouts are transport errors; anything else is a
/// failed request.
pub(crate) fn send_error(feed: &str, err: reqwest::Error) -> Report<SourceError> {
    let context = if err.is_connect() || err.is_timeout() {
        SourceError::Connection { feed: feed.into() }
    } else {
        SourceError::Request { feed: feed.into() }
    };
    Report::new(err).change_context(context)
}

pub(crate) fn check_status(
    feed: &str,
    response: &reqwest::Response,
) -> Result<(), Report<SourceError>> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(Report::new(SourceError::Status {
        feed: feed.into(),
        status: status.as_u16(),
    }))
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Scripted answer of a fake feed.
    #[derive(Debug, Clone)]
    pub enum Reply<T> {
        Data(T),
        Empty,
        Status(u16),
        Unreachable,
    }

    impl<T: Clone> Reply<T> {
        fn resolve(&self, feed: &str) -> Result<Option<T>, Report<SourceError>> {
            match self {
                Self::Data(value) => Ok(Some(value.clone())),
                Self::Empty => Ok(None),
                Self::Status(status) => Err(Report::new(SourceError::Status {
                    feed: feed.into(),
                    status: *status,
                })),
                Self::Unreachable => {
                    Err(Report::new(SourceError::Connection { feed: feed.into() }))
                }
            }
        }
    }

    /// In-memory feed answering both trade and pool lookups from a script.
    #[derive(Default)]
    pub struct FakeFeed {
        prices: Mutex<HashMap<String, Reply<f64>>>,
        pools: Mutex<HashMap<u64, Reply<PoolReserves>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFeed {
        pub fn set_price(&self, id: &str, reply: Reply<f64>) {
            self.prices.lock().unwrap().insert(id.to_owned(), reply);
        }

        pub fn set_pool(&self, id: u64, reply: Reply<PoolReserves>) {
            self.pools.lock().unwrap().insert(id, reply);
        }

        /// Every lookup made so far, as `trade:<id>` or `pool:<id>`.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TradeSource for FakeFeed {
        fn name(&self) -> &str {
            "fake"
        }

        fn latest_trade_price(
            &self,
            id: &str,
        ) -> BoxFuture<'_, Result<Option<f64>, Report<SourceError>>> {
            let id = id.to_owned();
            Box::pin(async move {
                self.calls.lock().unwrap().push(format!("trade:{id}"));
                let reply = self.prices.lock().unwrap().get(&id).cloned();
                reply.unwrap_or(Reply::Empty).resolve("fake")
            })
        }
    }

    impl PoolSource for FakeFeed {
        fn name(&self) -> &str {
            "fake"
        }

        fn fetch_pool(
            &self,
            pool_id: u64,
        ) -> BoxFuture<'_, Result<Option<PoolReserves>, Report<SourceError>>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(format!("pool:{pool_id}"));
                let reply = self.pools.lock().unwrap().get(&pool_id).cloned();
                reply.unwrap_or(Reply::Empty).resolve("fake")
            })
        }
    }
}
