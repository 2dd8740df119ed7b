use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::DefaultDirectRateLimiter;
use nonzero_ext::nonzero;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::source::{TradeSource, check_status, http_client, rate_limiter, send_error};

const FEED: &str = "alcor";
const DEALS_LIMIT: &str = "10";

/// Order-book deals from the Alcor exchange, keyed by numeric market id.
pub struct AlcorMarkets {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl AlcorMarkets {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Report<SourceError>> {
        Ok(Self {
            client: http_client(FEED, timeout)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            rate_limiter: rate_limiter(nonzero!(2u32)),
        })
    }
}

impl TradeSource for AlcorMarkets {
    fn name(&self) -> &str {
        FEED
    }

    fn latest_trade_price(
        &self,
        id: &str,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<SourceError>>> {
        let id = id.to_owned();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{}/api/markets/{}/deals", self.base_url, id);
            let response = self
                .client
                .get(&url)
                .query(&[("limit", DEALS_LIMIT)])
                .send()
                .await
                .map_err(|e| send_error(FEED, e))
                .attach_with(|| format!("market id: {id}"))?;

            check_status(FEED, &response).attach_with(|| format!("market id: {id}"))?;

            let deals: Vec<AlcorDeal> = response
                .json()
                .await
                .change_context(SourceError::ResponseParse { feed: FEED.into() })?;

            debug!(market_id = %id, deals = deals.len(), "alcor deals fetched");
            Ok(latest_price(&deals))
        })
    }
}

// ── REST response types ───────────────────────────────────────────────────────

/// Deals are returned newest-first.
#[derive(Debug, Deserialize)]
struct AlcorDeal {
    unit_price: f64,
}

fn latest_price(deals: &[AlcorDeal]) -> Option<f64> {
    deals.first().map(|deal| deal.unit_price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_price_takes_newest_deal() {
        let deals: Vec<AlcorDeal> = serde_json::from_str(
            r#"[
                {"_id": "a", "unit_price": 0.1234, "bid": 10.0, "ask": 81.0, "type": "buymatch"},
                {"_id": "b", "unit_price": 0.1200, "bid": 5.0, "ask": 41.6, "type": "sellmatch"}
            ]"#,
        )
        .unwrap();
        assert_eq!(latest_price(&deals), Some(0.1234));
    }

    #[test]
    fn empty_deals_mean_no_price() {
        let deals: Vec<AlcorDeal> = serde_json::from_str("[]").unwrap();
        assert_eq!(latest_price(&deals), None);
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_latest_trade_price() {
        let source =
            AlcorMarkets::new("https://wax.alcor.exchange", Duration::from_secs(10)).unwrap();
        let price = source.latest_trade_price("26").await.unwrap();
        assert!(price.is_some_and(|p| p > 0.0));
    }
}
