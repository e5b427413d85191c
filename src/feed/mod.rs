//! Reference price source.
//!
//! Defines the `PriceFeed` trait, the Coinbase spot implementation, and the
//! fixed-delay retry wrapper used by the round machine.

pub mod coinbase;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{to_fixed_point, OracleError};

/// Abstraction over external quote endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch the current reference price in USD.
    ///
    /// Fails with [`OracleError::Feed`] when the endpoint is unreachable,
    /// answers with a non-success status, or returns no finite price.
    async fn fetch_price(&self) -> Result<f64, OracleError>;
}

/// Bounded retry with a fixed pause between attempts. No jitter, no growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

/// Reject prices that cannot be submitted: zero, negative, or too large for
/// the scaled `u64` encoding.
pub fn ensure_submittable(price: f64) -> Result<f64, OracleError> {
    if price.is_nan() || price <= 0.0 {
        return Err(OracleError::Feed(format!("price {price} is not positive")));
    }
    to_fixed_point(price)?;
    Ok(price)
}

/// Fetch a price, retrying per `policy`.
///
/// Returns as soon as one attempt yields a submittable price; after the
/// last failed attempt the error from that attempt is returned.
pub async fn fetch_price_with_retry(
    feed: &dyn PriceFeed,
    policy: &RetryPolicy,
) -> Result<f64, OracleError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match feed.fetch_price().await.and_then(ensure_submittable) {
            Ok(price) => {
                debug!(attempt, price, "Price fetched");
                return Ok(price);
            }
            Err(e) if attempt >= attempts => {
                warn!(attempts, error = %e, "Price feed exhausted all attempts");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    attempt,
                    attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Price fetch failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
