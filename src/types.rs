//! Shared types for the autovest agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that gateway, strategy,
//! and engine modules can depend on them without circular references.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Income verification
// ---------------------------------------------------------------------------

/// Income verification tier reported by the marketplace.
///
/// Wire values 0–4; tier 4 means income and expenses are fully verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum VerificationTier {
    NotSet,
    Unverified,
    CrossReferenced,
    Verified,
    FullyVerified,
}

impl From<u8> for VerificationTier {
    fn from(value: u8) -> Self {
        match value {
            1 => VerificationTier::Unverified,
            2 => VerificationTier::CrossReferenced,
            3 => VerificationTier::Verified,
            4 => VerificationTier::FullyVerified,
            _ => VerificationTier::NotSet,
        }
    }
}

impl From<VerificationTier> for u8 {
    fn from(tier: VerificationTier) -> u8 {
        tier.level()
    }
}

impl VerificationTier {
    /// Numeric tier as reported on the wire.
    pub fn level(self) -> u8 {
        match self {
            VerificationTier::NotSet => 0,
            VerificationTier::Unverified => 1,
            VerificationTier::CrossReferenced => 2,
            VerificationTier::Verified => 3,
            VerificationTier::FullyVerified => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Loan offer
// ---------------------------------------------------------------------------

/// A loan offer snapshot from the marketplace.
///
/// On the primary market `id` is the auction identifier; on the secondary
/// market and in account holdings it is the loan part identifier. The
/// snapshot is immutable for the duration of one poll cycle and is
/// discarded afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanOffer {
    pub id: String,
    /// Borrower username owning the loan.
    pub user_name: String,
    /// Principal this account has already bid into / holds of the loan.
    pub amount_invested: Decimal,
    /// Outstanding principal of the loan part (secondary market) or the
    /// auction's requested amount (primary market).
    pub principal: Decimal,
    /// Annual interest rate, percent.
    pub interest: Decimal,
    pub verification: VerificationTier,
    /// Seller's asking discount, percent. Zero for primary auctions.
    pub desired_discount_rate: Decimal,
    /// Ordinal of the next scheduled payment (1 = first payment pending).
    pub next_payment_nr: u32,
    /// Days until the next scheduled payment.
    pub days_until_payment: i64,
    /// Risk score computed at snapshot creation, see `strategy::pricing`.
    pub risk_score: Decimal,
    /// Auction bookkeeping numbers used to build the investment URL.
    pub auction_number: Option<i64>,
    pub auction_bid_number: Option<i64>,
}

impl LoanOffer {
    /// Human-facing marketplace URL for this investment, when the auction
    /// numbers are known.
    pub fn investment_url(&self) -> Option<String> {
        let (auction, bid) = (self.auction_number?, self.auction_bid_number?);
        Some(format!(
            "https://www.bondora.com/en/investments?search=search&InvestmentSearch.InvestmentNumberOnly={auction}-{bid}"
        ))
    }

    /// Estimated annualized return after paying the asking discount.
    pub fn estimated_return(&self) -> Decimal {
        self.interest * (dec!(100) - self.desired_discount_rate) / dec!(100)
    }
}

impl fmt::Display for LoanOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} | {:.1}% interest | asking {:.1}% | tier {})",
            self.id,
            self.user_name,
            self.interest,
            self.desired_discount_rate,
            self.verification.level(),
        )
    }
}

/// A live secondary-market listing.
///
/// The marketplace identifies the listing and the underlying loan part
/// separately: cancellations address the listing id, sales address the
/// loan part id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleListing {
    pub listing_id: String,
    pub offer: LoanOffer,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// A loan offer that passed pricing: the policy's target discount and the
/// gain over the seller's asking discount.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub offer: LoanOffer,
    /// Policy-computed fair discount, integer percent.
    pub target_discount: i64,
    /// `target_discount - desired_discount_rate`.
    pub gain: Decimal,
}

// ---------------------------------------------------------------------------
// Per-run exposure tracking
// ---------------------------------------------------------------------------

/// Cumulative amount invested per borrower during a single run.
///
/// Mutated monotonically as candidates are accepted; used to enforce the
/// per-user/per-loan investment cap. One value per run, dropped at run end.
#[derive(Debug, Default)]
pub struct UserExposure {
    invested: HashMap<String, Decimal>,
}

impl UserExposure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount accepted for this user so far in the current run.
    pub fn total_for(&self, user: &str) -> Decimal {
        self.invested.get(user).copied().unwrap_or(Decimal::ZERO)
    }

    /// Record an accepted amount for a user.
    pub fn add(&mut self, user: &str, amount: Decimal) {
        *self
            .invested
            .entry(user.to_string())
            .or_insert(Decimal::ZERO) += amount;
    }
}

// ---------------------------------------------------------------------------
// Orders and actions
// ---------------------------------------------------------------------------

/// A primary-market bid to be submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidOrder {
    pub auction_id: String,
    pub amount: Decimal,
    pub min_amount: Decimal,
}

/// A secondary-market sale order to be submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellOrder {
    pub loan_part_id: String,
    /// Desired discount rate, integer percent.
    pub rate: i64,
}

/// An order-book mutation produced by the selector or reconciler and
/// consumed by the market gateway. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Bid(BidOrder),
    Buy { listing_id: String },
    Sell(SellOrder),
    Cancel { listing_id: String },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Bid(bid) => write!(
                f,
                "bid {} on auction {} (min {})",
                bid.amount, bid.auction_id, bid.min_amount
            ),
            Action::Buy { listing_id } => write!(f, "buy listing {listing_id}"),
            Action::Sell(sell) => {
                write!(f, "sell part {} at {}%", sell.loan_part_id, sell.rate)
            }
            Action::Cancel { listing_id } => write!(f, "cancel listing {listing_id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain-specific error taxonomy for the agent.
#[derive(Debug, thiserror::Error)]
pub enum InvestError {
    /// Token fetch or refresh failed. Fatal, aborts the run.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A gateway read failed after exhausting the retry budget. Fatal.
    #[error("Market fetch failed ({endpoint}): {message}")]
    Fetch { endpoint: String, message: String },

    /// A batch of writes failed. Isolated per batch; surfaced in the run
    /// summary, does not abort sibling batches.
    #[error("Submission of {count} {kind} orders failed: {message}")]
    Submission {
        kind: String,
        count: usize,
        message: String,
    },

    /// Email delivery failed. Logged only, never propagated.
    #[error("Notification failed: {0}")]
    Notification(String),

    /// Missing or malformed configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_offer(id: &str, user: &str, interest: Decimal) -> LoanOffer {
        LoanOffer {
            id: id.to_string(),
            user_name: user.to_string(),
            amount_invested: Decimal::ZERO,
            principal: dec!(25),
            interest,
            verification: VerificationTier::FullyVerified,
            desired_discount_rate: Decimal::ZERO,
            next_payment_nr: 1,
            days_until_payment: 30,
            risk_score: Decimal::ZERO,
            auction_number: Some(1234),
            auction_bid_number: Some(1),
        }
    }

    #[test]
    fn test_verification_tier_roundtrip() {
        for level in 0u8..=4 {
            let tier = VerificationTier::from(level);
            assert_eq!(tier.level(), level);
        }
        // Unknown wire values collapse to NotSet
        assert_eq!(VerificationTier::from(9), VerificationTier::NotSet);
    }

    #[test]
    fn test_verification_tier_ordering() {
        assert!(VerificationTier::FullyVerified > VerificationTier::Verified);
        assert!(VerificationTier::Unverified < VerificationTier::CrossReferenced);
    }

    #[test]
    fn test_investment_url() {
        let offer = make_offer("p1", "alice", dec!(30));
        let url = offer.investment_url().unwrap();
        assert!(url.ends_with("InvestmentSearch.InvestmentNumberOnly=1234-1"));

        let mut anon = offer.clone();
        anon.auction_number = None;
        assert!(anon.investment_url().is_none());
    }

    #[test]
    fn test_estimated_return_discounts_yield() {
        let mut offer = make_offer("p1", "alice", dec!(40));
        assert_eq!(offer.estimated_return(), dec!(40));

        offer.desired_discount_rate = dec!(10);
        assert_eq!(offer.estimated_return(), dec!(36));
    }

    #[test]
    fn test_user_exposure_accumulates() {
        let mut exposure = UserExposure::new();
        assert_eq!(exposure.total_for("alice"), Decimal::ZERO);

        exposure.add("alice", dec!(10));
        exposure.add("alice", dec!(5));
        exposure.add("bob", dec!(3));

        assert_eq!(exposure.total_for("alice"), dec!(15));
        assert_eq!(exposure.total_for("bob"), dec!(3));
    }

    #[test]
    fn test_action_display() {
        let sell = Action::Sell(SellOrder {
            loan_part_id: "part-1".into(),
            rate: 4,
        });
        assert_eq!(sell.to_string(), "sell part part-1 at 4%");

        let cancel = Action::Cancel {
            listing_id: "list-1".into(),
        };
        assert_eq!(cancel.to_string(), "cancel listing list-1");
    }
}
