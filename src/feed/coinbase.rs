//! Coinbase spot price feed.
//!
//! API: `GET https://api.coinbase.com/v2/prices/{pair}/spot`
//! Auth: none.
//! Response: `{"data": {"base": "BTC", "currency": "USD", "amount": "67123.45"}}`

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{ensure_submittable, PriceFeed};
use crate::types::OracleError;

#[derive(Debug, Deserialize)]
struct SpotResponse {
    #[serde(default)]
    data: Option<SpotData>,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    /// Coinbase sends a decimal string; a bare number is accepted too.
    #[serde(default)]
    amount: serde_json::Value,
}

pub struct CoinbaseSpotFeed {
    http: Client,
    url: String,
}

impl CoinbaseSpotFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("flash-oracle/0.1.0")
            .build()
            .context("Failed to build Coinbase HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PriceFeed for CoinbaseSpotFeed {
    async fn fetch_price(&self) -> Result<f64, OracleError> {
        let resp = self
            .http
            .get(&self.url)
            .header(header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| OracleError::Feed(format!("Coinbase request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OracleError::Feed(format!("Coinbase request failed: {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| OracleError::Feed(format!("Failed to read Coinbase response: {e}")))?;

        let price = parse_spot_payload(&body)?;
        debug!(url = %self.url, price, "Coinbase spot price");
        Ok(price)
    }
}

/// Extract a positive, submittable price from a spot response body.
pub fn parse_spot_payload(body: &str) -> Result<f64, OracleError> {
    let payload: SpotResponse = serde_json::from_str(body)
        .map_err(|e| OracleError::Feed(format!("Unexpected Coinbase payload: {e}")))?;

    let amount = payload
        .data
        .map(|d| d.amount)
        .unwrap_or(serde_json::Value::Null);

    let price = match &amount {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };

    match price {
        Some(p) if p.is_finite() => ensure_submittable(p),
        _ => Err(OracleError::Feed(format!("Unexpected Coinbase payload: amount={amount}"))),
    }
}
