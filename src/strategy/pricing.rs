//! Discount pricing policy.
//!
//! Computes the fair selling/asking discount for a loan offer from its
//! interest rate and income-verification tier. This is the single source
//! of truth for pricing: primary-market bidding and secondary-market
//! selling decisions both go through `target_discount`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{LoanOffer, VerificationTier};

/// Fair discount for an offer, integer percent. Always ≥ 1.
///
/// Tiered in the interest rate, then bumped by a verification bonus:
/// fully verified income reads as a safer part and therefore supports a
/// larger asking discount.
pub fn target_discount(offer: &LoanOffer) -> i64 {
    let interest = offer.interest;

    let base = if interest > dec!(100) {
        (interest / dec!(20)).floor()
    } else if interest > dec!(50) {
        (interest / dec!(15)).floor()
    } else {
        (interest / dec!(10)).floor().max(Decimal::ONE)
    };
    let base = base.to_i64().unwrap_or(1);

    let bonus = match offer.verification {
        VerificationTier::FullyVerified => 2,
        VerificationTier::CrossReferenced | VerificationTier::Verified => 1,
        VerificationTier::NotSet | VerificationTier::Unverified => 0,
    };

    base + bonus
}

/// Risk score attached to each snapshot: interest weighted up by the
/// verification shortfall. Used for reporting only.
pub fn risk_score(interest: Decimal, verification: VerificationTier) -> Decimal {
    let shortfall = Decimal::from(4u32.saturating_sub(u32::from(verification.level())));
    interest * (Decimal::ONE + shortfall / dec!(10))
}

/// How the reconciler prices a listing.
///
/// `Computed` is the full policy rate; `Fixed` overrides it outright
/// (0 for stale liquidation); `Scaled` applies a liquidation-tier
/// multiplier to the policy rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscountPolicy {
    Computed,
    Fixed(i64),
    Scaled(f64),
}

impl DiscountPolicy {
    /// Desired listing rate for an offer under this policy, integer percent.
    pub fn rate_for(&self, offer: &LoanOffer) -> i64 {
        match *self {
            DiscountPolicy::Computed => target_discount(offer),
            DiscountPolicy::Fixed(rate) => rate,
            DiscountPolicy::Scaled(multiplier) => {
                ((target_discount(offer) as f64) * multiplier).round() as i64
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
