//! Marketplace gateway.
//!
//! Defines the `MarketGateway` trait the engine drives and the filter
//! model shared by all fetches. The REST implementation for the Bondora
//! marketplace lives in `bondora`.

pub mod bondora;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::config::{DayWindow, RunConfig};
use crate::types::{BidOrder, InvestError, LoanOffer, SaleListing, SellOrder};

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Loan status code for current (performing) loans.
pub const LOAN_STATUS_CURRENT: u8 = 2;

/// Sales status for holdings that are not currently listed for sale.
pub const SALES_STATUS_NOT_ON_SALE: u8 = 3;

/// Query filters for market and account fetches.
///
/// Day windows from the run config are converted to absolute timestamps
/// here, at call time, so the gateway only ever sees concrete bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketFilters {
    pub min_verification_tier: Option<u8>,
    pub next_payment_from: Option<DateTime<Utc>>,
    pub next_payment_to: Option<DateTime<Utc>>,
    /// Restrict a secondary-market listing query to this account's items.
    pub show_my_items: bool,
    pub sales_status: Option<u8>,
    pub loan_status_code: Option<u8>,
}

impl MarketFilters {
    /// Filters for a buy-side run: verification floor plus the base day
    /// window from the run config.
    pub fn for_run(config: &RunConfig) -> Self {
        let mut filters = Self::from_window(config.payment_window());
        if config.min_verification_tier > 0 {
            filters.min_verification_tier = Some(config.min_verification_tier);
        }
        filters
    }

    /// Convert a relative day window into absolute next-payment bounds.
    pub fn from_window(window: DayWindow) -> Self {
        Self {
            next_payment_from: window.min_days.map(|d| Utc::now() + Duration::days(d)),
            next_payment_to: window.max_days.map(|d| Utc::now() + Duration::days(d)),
            ..Self::default()
        }
    }

    pub fn my_items(mut self) -> Self {
        self.show_my_items = true;
        self
    }

    pub fn sales_status(mut self, status: u8) -> Self {
        self.sales_status = Some(status);
        self
    }

    pub fn loan_status(mut self, code: u8) -> Self {
        self.loan_status_code = Some(code);
        self
    }
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Abstraction over the lending marketplace.
///
/// Reads return poll-cycle snapshots; writes submit one prepared batch
/// each and are never retried here (see `engine` for batch isolation and
/// the idempotency-key handling in the REST client).
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Fetch active primary-market auctions.
    async fn list_active_primary(&self, filters: &MarketFilters) -> Result<Vec<LoanOffer>>;

    /// Fetch active secondary-market listings.
    async fn list_active_secondary(&self, filters: &MarketFilters) -> Result<Vec<SaleListing>>;

    /// Fetch the loan parts held by this account.
    async fn list_account_holdings(&self, filters: &MarketFilters) -> Result<Vec<LoanOffer>>;

    /// Submit one batch of primary-market bids.
    async fn submit_bids(&self, bids: &[BidOrder]) -> Result<()>;

    /// Buy one batch of secondary-market listings outright.
    async fn submit_buys(&self, listing_ids: &[String]) -> Result<()>;

    /// List one batch of loan parts for sale.
    async fn submit_sells(&self, sells: &[SellOrder]) -> Result<()>;

    /// Cancel one batch of this account's listings.
    async fn submit_cancels(&self, listing_ids: &[String]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Read retry
// ---------------------------------------------------------------------------

/// Retry budget for idempotent reads.
const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_RETRY_DELAY_MS: u64 = 500;

/// Run an idempotent fetch with bounded retry and exponential backoff.
///
/// Only reads go through here — writes must not be blindly retried.
pub async fn fetch_with_retry<T, F, Fut>(endpoint: &str, mut fetch: F) -> Result<T, InvestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = String::new();

    for attempt in 1..=MAX_FETCH_ATTEMPTS {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = e.to_string();
                if attempt < MAX_FETCH_ATTEMPTS {
                    let delay = BASE_RETRY_DELAY_MS * 2u64.pow(attempt - 1);
                    warn!(
                        endpoint,
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "Fetch failed — retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
            }
        }
    }

    Err(InvestError::Fetch {
        endpoint: endpoint.to_string(),
        message: last_error,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
