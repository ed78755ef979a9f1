//! Bondora marketplace REST integration.
//!
//! Implements `MarketGateway` against the Bondora API v1. Reads pull the
//! primary auctions, secondary-market listings and account holdings;
//! writes submit bid/buy/sell/cancel batches. Each write request carries
//! a UUID idempotency key so an operator-level retry of a failed batch
//! cannot double-invest.
//!
//! Base URL: https://api.bondora.com
//! Auth: `Authorization: Bearer {token}` on every request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{MarketFilters, MarketGateway};
use crate::auth::TokenProvider;
use crate::strategy::pricing;
use crate::types::{BidOrder, LoanOffer, SaleListing, SellOrder, VerificationTier};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const AUCTIONS_PATH: &str = "/api/v1/auctions";
const SECONDARY_PATH: &str = "/api/v1/secondarymarket";
const HOLDINGS_PATH: &str = "/api/v1/account/investments";
const BID_PATH: &str = "/api/v1/bid";
const BUY_PATH: &str = "/api/v1/secondarymarket/buy";
const SELL_PATH: &str = "/api/v1/secondarymarket/sell";
const CANCEL_PATH: &str = "/api/v1/secondarymarket/cancel";

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

// ---------------------------------------------------------------------------
// API response types (Bondora JSON → Rust)
// ---------------------------------------------------------------------------

/// Envelope wrapping every Bondora response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    #[serde(default)]
    payload: Option<T>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Option<Vec<ApiError>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

/// Primary-market auction row. Only the fields we act on.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuctionDto {
    auction_id: String,
    #[serde(default)]
    auction_number: Option<i64>,
    #[serde(default)]
    auction_bid_number: Option<i64>,
    #[serde(default)]
    user_name: String,
    /// Requested loan amount.
    #[serde(default)]
    applied_amount: Decimal,
    /// This account's existing bids into the auction.
    #[serde(default)]
    user_bid_amount: Decimal,
    #[serde(default)]
    interest: Decimal,
    #[serde(default)]
    income_verification_status: u8,
    #[serde(default)]
    next_payment_date: Option<DateTime<Utc>>,
}

/// Secondary-market listing row.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecondMarketItemDto {
    /// Listing identifier (cancellations address this).
    id: String,
    loan_part_id: String,
    #[serde(default)]
    auction_number: Option<i64>,
    #[serde(default)]
    auction_bid_number: Option<i64>,
    #[serde(default)]
    user_name: String,
    /// Outstanding principal of the part.
    #[serde(default)]
    amount: Decimal,
    #[serde(default)]
    interest: Decimal,
    #[serde(default)]
    desired_discount_rate: Decimal,
    #[serde(default)]
    income_verification_status: u8,
    #[serde(default)]
    next_payment_nr: u32,
    #[serde(default)]
    next_payment_date: Option<DateTime<Utc>>,
}

/// Account holding (an owned loan part).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvestmentDto {
    loan_part_id: String,
    #[serde(default)]
    auction_number: Option<i64>,
    #[serde(default)]
    auction_bid_number: Option<i64>,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    principal_remaining: Decimal,
    #[serde(default)]
    interest: Decimal,
    #[serde(default)]
    income_verification_status: u8,
    #[serde(default)]
    next_payment_nr: u32,
    #[serde(default)]
    next_payment_date: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Write request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BidRequestDto {
    bids: Vec<BidDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BidDto {
    auction_id: String,
    amount: Decimal,
    min_amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ItemIdsDto {
    item_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SaleRequestDto {
    items: Vec<SaleItemDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SaleItemDto {
    loan_part_id: String,
    desired_discount_rate: i64,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn days_until(date: Option<DateTime<Utc>>) -> i64 {
    date.map(|d| (d - Utc::now()).num_days()).unwrap_or(0)
}

impl From<AuctionDto> for LoanOffer {
    fn from(dto: AuctionDto) -> Self {
        let verification = VerificationTier::from(dto.income_verification_status);
        LoanOffer {
            id: dto.auction_id,
            user_name: dto.user_name,
            amount_invested: dto.user_bid_amount,
            principal: dto.applied_amount,
            interest: dto.interest,
            verification,
            desired_discount_rate: Decimal::ZERO,
            next_payment_nr: 1,
            days_until_payment: days_until(dto.next_payment_date),
            risk_score: pricing::risk_score(dto.interest, verification),
            auction_number: dto.auction_number,
            auction_bid_number: dto.auction_bid_number,
        }
    }
}

impl From<SecondMarketItemDto> for SaleListing {
    fn from(dto: SecondMarketItemDto) -> Self {
        let verification = VerificationTier::from(dto.income_verification_status);
        SaleListing {
            listing_id: dto.id,
            offer: LoanOffer {
                id: dto.loan_part_id,
                user_name: dto.user_name,
                amount_invested: Decimal::ZERO,
                principal: dto.amount,
                interest: dto.interest,
                verification,
                desired_discount_rate: dto.desired_discount_rate,
                next_payment_nr: dto.next_payment_nr,
                days_until_payment: days_until(dto.next_payment_date),
                risk_score: pricing::risk_score(dto.interest, verification),
                auction_number: dto.auction_number,
                auction_bid_number: dto.auction_bid_number,
            },
        }
    }
}

impl From<InvestmentDto> for LoanOffer {
    fn from(dto: InvestmentDto) -> Self {
        let verification = VerificationTier::from(dto.income_verification_status);
        LoanOffer {
            id: dto.loan_part_id,
            user_name: dto.user_name,
            amount_invested: dto.principal_remaining,
            principal: dto.principal_remaining,
            interest: dto.interest,
            verification,
            desired_discount_rate: Decimal::ZERO,
            next_payment_nr: dto.next_payment_nr,
            days_until_payment: days_until(dto.next_payment_date),
            risk_score: pricing::risk_score(dto.interest, verification),
            auction_number: dto.auction_number,
            auction_bid_number: dto.auction_bid_number,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Bondora REST gateway.
pub struct BondoraGateway {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl BondoraGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout_secs: u64,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("autovest/0.1.0")
            .build()
            .context("Failed to build HTTP client for Bondora")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            tokens,
        })
    }

    // -- Internal helpers ------------------------------------------------

    /// Render filters as a query string. Day windows are already absolute
    /// timestamps; they are serialised as ISO-8601.
    fn query_string(filters: &MarketFilters) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();

        if let Some(tier) = filters.min_verification_tier {
            pairs.push(("IncomeVerificationStatus", tier.to_string()));
        }
        if let Some(from) = filters.next_payment_from {
            pairs.push(("NextPaymentDateFrom", from.to_rfc3339()));
        }
        if let Some(to) = filters.next_payment_to {
            pairs.push(("NextPaymentDateTo", to.to_rfc3339()));
        }
        if filters.show_my_items {
            pairs.push(("ShowMyItems", "true".to_string()));
        }
        if let Some(status) = filters.sales_status {
            pairs.push(("SalesStatus", status.to_string()));
        }
        if let Some(code) = filters.loan_status_code {
            pairs.push(("LoanStatusCode", code.to_string()));
        }

        if pairs.is_empty() {
            return String::new();
        }

        let encoded: Vec<String> = pairs
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect();
        format!("?{}", encoded.join("&"))
    }

    async fn get_payload<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &MarketFilters,
    ) -> Result<T> {
        let url = format!("{}{path}{}", self.base_url, Self::query_string(filters));
        debug!(url = %url, "Fetching from Bondora");

        let token = self.tokens.bearer_token().await?;
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .with_context(|| format!("Bondora request failed: {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bondora API error {status} on {path}: {body}");
        }

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Bondora response from {path}"))?;

        Self::unwrap_payload(envelope, path)
    }

    fn unwrap_payload<T>(envelope: ApiResponse<T>, path: &str) -> Result<T> {
        if !envelope.success {
            anyhow::bail!(
                "Bondora reported failure on {path}: {}",
                Self::error_summary(&envelope.errors)
            );
        }
        envelope
            .payload
            .with_context(|| format!("Bondora response from {path} carried no payload"))
    }

    fn error_summary(errors: &Option<Vec<ApiError>>) -> String {
        errors
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|e| {
                format!(
                    "[{}] {}",
                    e.code.unwrap_or_default(),
                    e.message.as_deref().unwrap_or("unknown")
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// POST one write batch. A fresh idempotency key is attached so a
    /// deliberate retry of this exact batch can be deduplicated server
    /// side; the engine itself never auto-retries writes.
    async fn post_write<B: Serialize>(&self, path: &str, body: &B, count: usize) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let key = uuid::Uuid::new_v4().to_string();
        info!(path, count, idempotency_key = %key, "Submitting batch");

        let token = self.tokens.bearer_token().await?;
        let response = self
            .http
            .post(&url)
            .bearer_auth(token.expose_secret())
            .header(IDEMPOTENCY_HEADER, &key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Bondora submission failed: {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Bondora API error {status} on {path}: {text}");
        }

        let envelope: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Bondora response from {path}"))?;

        if !envelope.success {
            anyhow::bail!(
                "Bondora rejected batch on {path}: {}",
                Self::error_summary(&envelope.errors)
            );
        }

        Ok(())
    }
}

#[async_trait]
impl MarketGateway for BondoraGateway {
    async fn list_active_primary(&self, filters: &MarketFilters) -> Result<Vec<LoanOffer>> {
        let auctions: Vec<AuctionDto> = self.get_payload(AUCTIONS_PATH, filters).await?;
        Ok(auctions.into_iter().map(LoanOffer::from).collect())
    }

    async fn list_active_secondary(&self, filters: &MarketFilters) -> Result<Vec<SaleListing>> {
        let items: Vec<SecondMarketItemDto> = self.get_payload(SECONDARY_PATH, filters).await?;
        Ok(items.into_iter().map(SaleListing::from).collect())
    }

    async fn list_account_holdings(&self, filters: &MarketFilters) -> Result<Vec<LoanOffer>> {
        let holdings: Vec<InvestmentDto> = self.get_payload(HOLDINGS_PATH, filters).await?;
        Ok(holdings.into_iter().map(LoanOffer::from).collect())
    }

    async fn submit_bids(&self, bids: &[BidOrder]) -> Result<()> {
        let body = BidRequestDto {
            bids: bids
                .iter()
                .map(|b| BidDto {
                    auction_id: b.auction_id.clone(),
                    amount: b.amount,
                    min_amount: b.min_amount,
                })
                .collect(),
        };
        self.post_write(BID_PATH, &body, bids.len()).await
    }

    async fn submit_buys(&self, listing_ids: &[String]) -> Result<()> {
        let body = ItemIdsDto {
            item_ids: listing_ids.to_vec(),
        };
        self.post_write(BUY_PATH, &body, listing_ids.len()).await
    }

    async fn submit_sells(&self, sells: &[SellOrder]) -> Result<()> {
        let body = SaleRequestDto {
            items: sells
                .iter()
                .map(|s| SaleItemDto {
                    loan_part_id: s.loan_part_id.clone(),
                    desired_discount_rate: s.rate,
                })
                .collect(),
        };
        self.post_write(SELL_PATH, &body, sells.len()).await
    }

    async fn submit_cancels(&self, listing_ids: &[String]) -> Result<()> {
        let body = ItemIdsDto {
            item_ids: listing_ids.to_vec(),
        };
        self.post_write(CANCEL_PATH, &body, listing_ids.len()).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
