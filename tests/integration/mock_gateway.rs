//! Mock marketplace for integration testing.
//!
//! Provides a deterministic `MarketGateway` implementation backed by
//! in-memory state: auctions, listings and holdings are fully
//! controllable from test code, and submitted writes are both recorded
//! and applied, so a second run observes the marketplace state the first
//! run produced.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Mutex;

use autovest::gateway::{MarketFilters, MarketGateway, SALES_STATUS_NOT_ON_SALE};
use autovest::notify::NotificationSink;
use autovest::types::{
    BidOrder, InvestError, LoanOffer, SaleListing, SellOrder, VerificationTier,
};

/// A deterministic in-memory marketplace.
pub struct MockGateway {
    auctions: Vec<LoanOffer>,
    market_listings: Vec<SaleListing>,
    my_listings: Mutex<Vec<SaleListing>>,
    holdings: Mutex<Vec<LoanOffer>>,
    pub submitted_bids: Mutex<Vec<BidOrder>>,
    pub submitted_buys: Mutex<Vec<String>>,
    pub submitted_sells: Mutex<Vec<SellOrder>>,
    pub submitted_cancels: Mutex<Vec<String>>,
    pub sell_call_sizes: Mutex<Vec<usize>>,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            auctions: Vec::new(),
            market_listings: Vec::new(),
            my_listings: Mutex::new(Vec::new()),
            holdings: Mutex::new(Vec::new()),
            submitted_bids: Mutex::new(Vec::new()),
            submitted_buys: Mutex::new(Vec::new()),
            submitted_sells: Mutex::new(Vec::new()),
            submitted_cancels: Mutex::new(Vec::new()),
            sell_call_sizes: Mutex::new(Vec::new()),
            force_error: Mutex::new(None),
        }
    }

    pub fn with_auctions(mut self, auctions: Vec<LoanOffer>) -> Self {
        self.auctions = auctions;
        self
    }

    pub fn with_market_listings(mut self, listings: Vec<SaleListing>) -> Self {
        self.market_listings = listings;
        self
    }

    pub fn with_holdings(self, holdings: Vec<LoanOffer>) -> Self {
        *self.holdings.lock().unwrap() = holdings;
        self
    }

    pub fn with_my_listings(self, listings: Vec<SaleListing>) -> Self {
        *self.my_listings.lock().unwrap() = listings;
        self
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn my_listing_rates(&self) -> Vec<(String, Decimal)> {
        self.my_listings
            .lock()
            .unwrap()
            .iter()
            .map(|l| (l.offer.id.clone(), l.offer.desired_discount_rate))
            .collect()
    }

    pub fn total_sells_submitted(&self) -> usize {
        self.submitted_sells.lock().unwrap().len()
    }

    fn check_error(&self) -> Result<()> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketGateway for MockGateway {
    async fn list_active_primary(&self, _filters: &MarketFilters) -> Result<Vec<LoanOffer>> {
        self.check_error()?;
        Ok(self.auctions.clone())
    }

    async fn list_active_secondary(&self, filters: &MarketFilters) -> Result<Vec<SaleListing>> {
        self.check_error()?;
        if filters.show_my_items {
            Ok(self.my_listings.lock().unwrap().clone())
        } else {
            Ok(self.market_listings.clone())
        }
    }

    async fn list_account_holdings(&self, filters: &MarketFilters) -> Result<Vec<LoanOffer>> {
        self.check_error()?;
        let holdings = self.holdings.lock().unwrap().clone();

        // "Not on sale" excludes parts with a live listing of ours.
        if filters.sales_status == Some(SALES_STATUS_NOT_ON_SALE) {
            let listed: Vec<String> = self
                .my_listings
                .lock()
                .unwrap()
                .iter()
                .map(|l| l.offer.id.clone())
                .collect();
            return Ok(holdings
                .into_iter()
                .filter(|h| !listed.contains(&h.id))
                .collect());
        }

        Ok(holdings)
    }

    async fn submit_bids(&self, bids: &[BidOrder]) -> Result<()> {
        self.check_error()?;
        self.submitted_bids.lock().unwrap().extend_from_slice(bids);
        Ok(())
    }

    async fn submit_buys(&self, listing_ids: &[String]) -> Result<()> {
        self.check_error()?;
        self.submitted_buys
            .lock()
            .unwrap()
            .extend_from_slice(listing_ids);
        Ok(())
    }

    async fn submit_sells(&self, sells: &[SellOrder]) -> Result<()> {
        self.check_error()?;
        self.sell_call_sizes.lock().unwrap().push(sells.len());
        self.submitted_sells
            .lock()
            .unwrap()
            .extend_from_slice(sells);

        // Apply: each sold part becomes a live listing of ours.
        let holdings = self.holdings.lock().unwrap();
        let mut listings = self.my_listings.lock().unwrap();
        for sell in sells {
            let Some(held) = holdings.iter().find(|h| h.id == sell.loan_part_id) else {
                continue;
            };
            let mut offer = held.clone();
            offer.desired_discount_rate = Decimal::from(sell.rate);
            listings.push(SaleListing {
                listing_id: format!("listing-{}", sell.loan_part_id),
                offer,
            });
        }
        Ok(())
    }

    async fn submit_cancels(&self, listing_ids: &[String]) -> Result<()> {
        self.check_error()?;
        self.submitted_cancels
            .lock()
            .unwrap()
            .extend_from_slice(listing_ids);

        // Apply: cancelled listings disappear.
        self.my_listings
            .lock()
            .unwrap()
            .retain(|l| !listing_ids.contains(&l.listing_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notification recorder
// ---------------------------------------------------------------------------

/// Records every (subject, body) pair the engine sends.
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, subject: &str, body: &str) -> Result<(), InvestError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Offer builders
// ---------------------------------------------------------------------------

/// A fully-verified offer on its first payment, suitable for most tests.
pub fn make_offer(id: &str, user: &str, interest: Decimal) -> LoanOffer {
    LoanOffer {
        id: id.to_string(),
        user_name: user.to_string(),
        amount_invested: Decimal::ZERO,
        principal: Decimal::from(25),
        interest,
        verification: VerificationTier::FullyVerified,
        desired_discount_rate: Decimal::ZERO,
        next_payment_nr: 1,
        days_until_payment: 35,
        risk_score: Decimal::ZERO,
        auction_number: Some(9000),
        auction_bid_number: Some(1),
    }
}

pub fn make_listing(id: &str, user: &str, interest: Decimal, asking: Decimal) -> SaleListing {
    let mut offer = make_offer(id, user, interest);
    offer.desired_discount_rate = asking;
    SaleListing {
        listing_id: format!("listing-{id}"),
        offer,
    }
}
