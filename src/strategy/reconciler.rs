//! Offer reconciliation.
//!
//! Makes the secondary-market listings for this account match the pricing
//! policy exactly, with minimum churn: parts already listed at the desired
//! rate are left alone, mismatched listings are cancelled (and re-listed
//! unless running a cancel-only liquidation), unlisted parts are listed.
//! Running the reconciler twice with no external change yields an empty
//! plan — idempotence is the key correctness property here.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info};

use crate::strategy::pricing::DiscountPolicy;
use crate::types::{LoanOffer, SaleListing, SellOrder};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The minimal set of cancel/sell operations that brings the live listings
/// in line with the policy. Consumed by the engine's batched submitter.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcilePlan {
    /// Listing ids to cancel.
    pub cancels: Vec<String>,
    /// Sale orders to place.
    pub sells: Vec<SellOrder>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.cancels.is_empty() && self.sells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cancels.len() + self.sells.len()
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Diff the held loan parts against the live listings under a pricing
/// policy.
///
/// `relist_mismatched` controls what happens to a listing whose rate
/// disagrees with the policy: re-list at the desired rate (normal
/// operation) or cancel outright (stale liquidation).
pub fn reconcile(
    held: &[LoanOffer],
    listed: &[SaleListing],
    policy: DiscountPolicy,
    relist_mismatched: bool,
) -> ReconcilePlan {
    let by_part: HashMap<&str, &SaleListing> =
        listed.iter().map(|l| (l.offer.id.as_str(), l)).collect();

    let mut plan = ReconcilePlan::default();

    for part in held {
        let desired = policy.rate_for(part);

        match by_part.get(part.id.as_str()) {
            None => {
                debug!(part = %part.id, rate = desired, "Not listed — selling");
                plan.sells.push(SellOrder {
                    loan_part_id: part.id.clone(),
                    rate: desired,
                });
            }
            Some(listing) => {
                let advertised = listing
                    .offer
                    .desired_discount_rate
                    .trunc()
                    .to_i64()
                    .unwrap_or(0);

                if advertised == desired {
                    debug!(part = %part.id, rate = desired, "Correctly listed — no action");
                    continue;
                }

                debug!(
                    part = %part.id,
                    advertised,
                    desired,
                    relist = relist_mismatched,
                    "Rate mismatch — cancelling"
                );
                plan.cancels.push(listing.listing_id.clone());
                if relist_mismatched {
                    plan.sells.push(SellOrder {
                        loan_part_id: part.id.clone(),
                        rate: desired,
                    });
                }
            }
        }
    }

    info!(
        held = held.len(),
        listed = listed.len(),
        cancels = plan.cancels.len(),
        sells = plan.sells.len(),
        "Reconciliation complete"
    );

    plan
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
