use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::DefaultDirectRateLimiter;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;
use crate::model::{PoolReserves, Reserve};
use crate::source::{PoolSource, check_status, http_client, rate_limiter, send_error};

const FEED: &str = "wax-chain";
const PAIRS_TABLE: &str = "pairs";

/// AMM pool reserves read from a contract's `pairs` table on a WAX chain node.
pub struct WaxPools {
    client: reqwest::Client,
    endpoint: String,
    contract: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl WaxPools {
    pub fn new(
        base_url: &str,
        contract: &str,
        timeout: Duration,
    ) -> Result<Self, Report<SourceError>> {
        Ok(Self {
            client: http_client(FEED, timeout)?,
            endpoint: format!("{}/v1/chain/get_table_rows", base_url.trim_end_matches('/')),
            contract: contract.to_owned(),
            rate_limiter: rate_limiter(nonzero!(2u32)),
        })
    }
}

impl PoolSource for WaxPools {
    fn name(&self) -> &str {
        FEED
    }

    fn fetch_pool(
        &self,
        pool_id: u64,
    ) -> BoxFuture<'_, Result<Option<PoolReserves>, Report<SourceError>>> {
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let request = TableRowsRequest::exact(&self.contract, pool_id);
            let response = self
                .client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await
                .map_err(|e| send_error(FEED, e))
                .attach_with(|| format!("pool id: {pool_id}"))?;

            check_status(FEED, &response).attach_with(|| format!("pool id: {pool_id}"))?;

            let table: TableRows = response
                .json()
                .await
                .change_context(SourceError::ResponseParse { feed: FEED.into() })?;

            debug!(pool_id, rows = table.rows.len(), "wax pool rows fetched");
            table.into_reserves(pool_id)
        })
    }
}

// ── Chain API types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TableRowsRequest<'a> {
    json: bool,
    code: &'a str,
    scope: &'a str,
    table: &'a str,
    index_position: u32,
    key_type: &'a str,
    lower_bound: u64,
    upper_bound: u64,
    limit: u32,
}

impl<'a> TableRowsRequest<'a> {
    /// Lookup of the single row whose primary key is `id`.
    fn exact(contract: &'a str, id: u64) -> Self {
        Self {
            json: true,
            code: contract,
            scope: contract,
            table: PAIRS_TABLE,
            index_position: 1,
            key_type: "",
            lower_bound: id,
            upper_bound: id,
            limit: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableRows {
    rows: Vec<PairRow>,
}

#[derive(Debug, Deserialize)]
struct PairRow {
    #[serde(default)]
    id: Option<u64>,
    pool1: PoolAsset,
    pool2: PoolAsset,
}

#[derive(Debug, Deserialize)]
struct PoolAsset {
    /// e.g. `"1234.56789012 WAX"`
    quantity: String,
}

impl TableRows {
    fn into_reserves(self, pool_id: u64) -> Result<Option<PoolReserves>, Report<SourceError>> {
        let Some(row) = self
            .rows
            .into_iter()
            .find(|row| row.id.is_none_or(|id| id == pool_id))
        else {
            return Ok(None);
        };

        let parse = |asset: &PoolAsset| {
            Reserve::parse(&asset.quantity).ok_or_else(|| {
                Report::new(SourceError::ResponseParse { feed: FEED.into() })
                    .attach(format!("unparseable pool quantity: {:?}", asset.quantity))
            })
        };

        Ok(Some(PoolReserves {
            first: parse(&row.pool1)?,
            second: parse(&row.pool2)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_targets_exactly_one_row() {
        let json = serde_json::to_value(TableRowsRequest::exact("alcorammswap", 532)).unwrap();
        assert_eq!(json["code"], "alcorammswap");
        assert_eq!(json["scope"], "alcorammswap");
        assert_eq!(json["table"], "pairs");
        assert_eq!(json["lower_bound"], 532);
        assert_eq!(json["upper_bound"], 532);
        assert_eq!(json["limit"], 1);
        assert_eq!(json["json"], true);
    }

    #[test]
    fn rows_parse_into_reserves() {
        let table: TableRows = serde_json::from_str(
            r#"{
                "rows": [{
                    "id": 532,
                    "supply": "100 LEEFWAX",
                    "pool1": {"quantity": "1500.00000000 WAX", "contract": "eosio.token"},
                    "pool2": {"quantity": "9000000.0000 LEEF", "contract": "leefmaincorp"},
                    "fee": 30
                }],
                "more": false
            }"#,
        )
        .unwrap();

        let reserves = table.into_reserves(532).unwrap().unwrap();
        assert_eq!(reserves.first.code, "WAX");
        assert_eq!(reserves.first.amount, 1500.0);
        assert_eq!(reserves.second.code, "LEEF");
        assert_eq!(reserves.second.amount, 9_000_000.0);
    }

    #[test]
    fn empty_rows_mean_no_pool() {
        let table: TableRows = serde_json::from_str(r#"{"rows": [], "more": false}"#).unwrap();
        assert!(table.into_reserves(7).unwrap().is_none());
    }

    #[test]
    fn row_for_another_pool_is_ignored() {
        let table: TableRows = serde_json::from_str(
            r#"{"rows": [{"id": 8, "pool1": {"quantity": "1.0 WAX"}, "pool2": {"quantity": "2.0 TLM"}}]}"#,
        )
        .unwrap();
        assert!(table.into_reserves(7).unwrap().is_none());
    }

    #[test]
    fn malformed_quantity_is_a_parse_error() {
        let table: TableRows = serde_json::from_str(
            r#"{"rows": [{"pool1": {"quantity": "WAX"}, "pool2": {"quantity": "2.0 TLM"}}]}"#,
        )
        .unwrap();
        assert!(table.into_reserves(7).is_err());
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_pool() {
        let source = WaxPools::new(
            "https://wax.blokcrafters.io",
            "alcorammswap",
            Duration::from_secs(10),
        )
        .unwrap();
        let pool = source.fetch_pool(532).await.unwrap();
        assert!(pool.is_some());
    }
}
