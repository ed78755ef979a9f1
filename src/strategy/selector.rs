//! Order selection.
//!
//! Filters and ranks candidate loan parts against the configured buy/sell
//! thresholds and the per-user/per-loan investment cap, producing the
//! actions to submit. Every rejected candidate is logged with a structured
//! reason and returned in the decision log — no silent drops.

use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::strategy::pricing::target_discount;
use crate::types::{Action, BidOrder, LoanOffer, SaleListing, ScoredCandidate, SellOrder, UserExposure};

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Why a candidate was passed over.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Gain (target minus asking discount) below the configured minimum.
    BelowMinGain { gain: Decimal, min_gain: Decimal },
    /// Borrower income verification below the configured floor.
    VerificationBelowFloor { tier: u8, floor: u8 },
    /// Loan already mid-schedule (first payment no longer pending).
    MidSchedule { next_payment_nr: u32 },
    /// Per-user/per-loan cap leaves no investable headroom.
    CapExhausted { user: String, headroom: Decimal },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::BelowMinGain { gain, min_gain } => {
                write!(f, "gain {gain} below minimum {min_gain}")
            }
            RejectionReason::VerificationBelowFloor { tier, floor } => {
                write!(f, "verification tier {tier} below floor {floor}")
            }
            RejectionReason::MidSchedule { next_payment_nr } => {
                write!(f, "next payment nr {next_payment_nr} already mid-schedule")
            }
            RejectionReason::CapExhausted { user, headroom } => {
                write!(f, "cap exhausted for {user} (headroom {headroom})")
            }
        }
    }
}

/// A rejected candidate and the reason.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub offer_id: String,
    pub reason: RejectionReason,
}

/// Outcome of one selection pass: the actions to submit, the scored
/// candidates behind them (for reporting), and the full rejection log.
#[derive(Debug, Default)]
pub struct Selection {
    pub actions: Vec<Action>,
    pub accepted: Vec<ScoredCandidate>,
    pub rejections: Vec<Rejection>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Buy/sell candidate selection against a `RunConfig`.
pub struct OrderSelector<'a> {
    config: &'a RunConfig,
}

impl<'a> OrderSelector<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    /// Select primary-market auctions to bid on.
    ///
    /// Candidates failing the gain or verification thresholds are excluded
    /// first; survivors are ranked ascending by (estimated annualized
    /// return, asking discount) so that when the cap forces partial
    /// admission the safer/cheaper offers are admitted from the front.
    /// Accepted bids carry `min(max_bid, remaining headroom)`; a headroom
    /// below `min_bid` drops the candidate rather than breach the cap.
    pub fn select_bids(
        &self,
        offers: &[LoanOffer],
        exposure: &mut UserExposure,
    ) -> Selection {
        let mut selection = Selection::default();
        let mut eligible = Vec::new();

        for offer in offers {
            let scored = self.score(offer);
            match self
                .check_gain(&scored)
                .or_else(|| self.check_verification(offer))
            {
                Some(reason) => selection.reject(offer, reason),
                None => eligible.push(scored),
            }
        }

        Self::rank(&mut eligible);

        for scored in eligible {
            let offer = &scored.offer;
            let headroom = self.headroom(offer, exposure);
            let amount = self.config.max_bid.min(headroom);
            if amount < self.config.min_bid {
                selection.reject(
                    offer,
                    RejectionReason::CapExhausted {
                        user: offer.user_name.clone(),
                        headroom,
                    },
                );
                continue;
            }

            exposure.add(&offer.user_name, amount);
            info!(
                offer = %offer.id,
                amount = %amount,
                target = scored.target_discount,
                "Bid selected"
            );
            selection.actions.push(Action::Bid(BidOrder {
                auction_id: offer.id.clone(),
                amount,
                min_amount: self.config.min_bid,
            }));
            selection.accepted.push(scored);
        }

        Self::log_summary("primary bids", offers.len(), &selection);
        selection
    }

    /// Select secondary-market listings to buy outright.
    ///
    /// In addition to the bid checks, only loans whose first payment is
    /// still pending are eligible — buying into a loan mid-schedule is
    /// never worth the discount.
    pub fn select_buys(
        &self,
        listings: &[SaleListing],
        exposure: &mut UserExposure,
    ) -> Selection {
        let mut selection = Selection::default();
        let mut by_part: std::collections::HashMap<&str, &SaleListing> =
            listings.iter().map(|l| (l.offer.id.as_str(), l)).collect();

        let mut eligible = Vec::new();
        for listing in listings {
            let offer = &listing.offer;
            let scored = self.score(offer);
            let reason = self
                .check_gain(&scored)
                .or_else(|| self.check_verification(offer))
                .or_else(|| Self::check_schedule(offer));
            match reason {
                Some(reason) => selection.reject(offer, reason),
                None => eligible.push(scored),
            }
        }

        Self::rank(&mut eligible);

        for scored in eligible {
            let offer = &scored.offer;
            let headroom = self.headroom(offer, exposure);
            if offer.principal > headroom {
                selection.reject(
                    offer,
                    RejectionReason::CapExhausted {
                        user: offer.user_name.clone(),
                        headroom,
                    },
                );
                continue;
            }

            // Eligibility preserved the part ids, so the lookup is total.
            let Some(listing) = by_part.remove(offer.id.as_str()) else {
                continue;
            };

            exposure.add(&offer.user_name, offer.principal);
            info!(
                listing = %listing.listing_id,
                asking = %offer.desired_discount_rate,
                gain = %scored.gain,
                "Buy selected"
            );
            selection.actions.push(Action::Buy {
                listing_id: listing.listing_id.clone(),
            });
            selection.accepted.push(scored);
        }

        Self::log_summary("secondary buys", listings.len(), &selection);
        selection
    }

    /// Emit a sale order for every held loan part at its policy rate.
    /// No caps apply on the sell side.
    pub fn select_sells(&self, held: &[LoanOffer]) -> Selection {
        let mut selection = Selection::default();

        for offer in held {
            let scored = self.score(offer);
            info!(
                part = %offer.id,
                rate = scored.target_discount,
                "Sell selected"
            );
            selection.actions.push(Action::Sell(SellOrder {
                loan_part_id: offer.id.clone(),
                rate: scored.target_discount,
            }));
            selection.accepted.push(scored);
        }

        Self::log_summary("sells", held.len(), &selection);
        selection
    }

    // -- Internal helpers ------------------------------------------------

    fn score(&self, offer: &LoanOffer) -> ScoredCandidate {
        let target = target_discount(offer);
        ScoredCandidate {
            offer: offer.clone(),
            target_discount: target,
            gain: Decimal::from(target) - offer.desired_discount_rate,
        }
    }

    fn check_gain(&self, scored: &ScoredCandidate) -> Option<RejectionReason> {
        (scored.gain < self.config.min_gain).then(|| RejectionReason::BelowMinGain {
            gain: scored.gain,
            min_gain: self.config.min_gain,
        })
    }

    fn check_verification(&self, offer: &LoanOffer) -> Option<RejectionReason> {
        let floor = self.config.min_verification_tier;
        (floor > 0 && offer.verification.level() < floor).then(|| {
            RejectionReason::VerificationBelowFloor {
                tier: offer.verification.level(),
                floor,
            }
        })
    }

    fn check_schedule(offer: &LoanOffer) -> Option<RejectionReason> {
        (offer.next_payment_nr > 1).then(|| RejectionReason::MidSchedule {
            next_payment_nr: offer.next_payment_nr,
        })
    }

    /// Remaining investable amount for this offer's borrower: the cap less
    /// what is already held in the loan and what this run has accepted.
    fn headroom(&self, offer: &LoanOffer, exposure: &UserExposure) -> Decimal {
        self.config.max_investment_per_loan
            - offer.amount_invested
            - exposure.total_for(&offer.user_name)
    }

    /// Ascending (estimated annualized return, asking discount): safer and
    /// cheaper offers first.
    fn rank(candidates: &mut [ScoredCandidate]) {
        candidates.sort_by_key(|c| (c.offer.estimated_return(), c.offer.desired_discount_rate));
    }

    fn log_summary(kind: &str, candidates: usize, selection: &Selection) {
        if candidates == 0 {
            info!(kind, "No candidates to select from");
            return;
        }
        info!(
            kind,
            candidates,
            selected = selection.actions.len(),
            rejected = selection.rejections.len(),
            "Selection complete"
        );
    }
}

impl Selection {
    fn reject(&mut self, offer: &LoanOffer, reason: RejectionReason) {
        info!(offer = %offer.id, reason = %reason, "Candidate rejected");
        debug!(offer = %offer, "Rejected candidate detail");
        self.rejections.push(Rejection {
            offer_id: offer.id.clone(),
            reason,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
