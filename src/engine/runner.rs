//! Run coordination.
//!
//! One `RunCoordinator` drives one polling cycle for one entry point:
//! fetch the relevant market snapshots, score and select candidates,
//! reconcile listings, submit the resulting orders in rate-limited
//! batches, and persist the run-config snapshot. Reads go through the
//! bounded retry in `gateway`; writes are submitted exactly once per
//! batch and failures are isolated so one bad batch never blocks the
//! rest.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{RunConfig, SubmissionConfig};
use crate::gateway::{
    fetch_with_retry, MarketFilters, MarketGateway, LOAN_STATUS_CURRENT, SALES_STATUS_NOT_ON_SALE,
};
use crate::notify::NotificationSink;
use crate::storage;
use crate::strategy::pricing::DiscountPolicy;
use crate::strategy::reconciler::{reconcile, ReconcilePlan};
use crate::strategy::selector::{OrderSelector, Selection};
use crate::types::{Action, BidOrder, InvestError, LoanOffer, SellOrder, UserExposure};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Which policy variant a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVariant {
    /// Bid on primary-market auctions.
    Primary,
    /// Buy undervalued secondary-market parts and list unlisted holdings.
    Secondary,
    /// Walk the liquidation tiers and reconcile stale listings.
    Liquidation,
}

impl RunVariant {
    pub fn name(self) -> &'static str {
        match self {
            RunVariant::Primary => "invest-primary",
            RunVariant::Secondary => "invest-secondary",
            RunVariant::Liquidation => "liquidate-stale",
        }
    }
}

/// A write batch that was rejected by the gateway.
#[derive(Debug, Clone)]
pub struct FailedBatch {
    pub kind: &'static str,
    pub count: usize,
    pub message: String,
}

impl FailedBatch {
    /// The taxonomy error this failure surfaces as in logs and in the
    /// notification body.
    pub fn to_error(&self) -> InvestError {
        InvestError::Submission {
            kind: self.kind.to_string(),
            count: self.count,
            message: self.message.clone(),
        }
    }
}

/// Result of submitting one sequence of write batches.
#[derive(Debug, Default)]
pub struct SubmissionOutcome {
    pub submitted_actions: usize,
    pub failed: Vec<FailedBatch>,
    /// Batches skipped because the run deadline elapsed.
    pub aborted_batches: usize,
}

/// Summary of one complete run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub offers_scanned: usize,
    pub candidates_rejected: usize,
    pub actions_submitted: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub aborted_batches: usize,
}

impl RunReport {
    fn absorb(&mut self, outcome: SubmissionOutcome) {
        self.actions_submitted += outcome.submitted_actions;
        self.failed_batches.extend(outcome.failed);
        self.aborted_batches += outcome.aborted_batches;
    }
}

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// One gateway write request. Batches are prepared up front so the
/// submitter can treat all four write kinds uniformly.
#[derive(Debug, Clone)]
enum WriteBatch {
    Bids(Vec<BidOrder>),
    Buys(Vec<String>),
    Sells(Vec<SellOrder>),
    Cancels(Vec<String>),
}

impl WriteBatch {
    fn kind(&self) -> &'static str {
        match self {
            WriteBatch::Bids(_) => "bid",
            WriteBatch::Buys(_) => "buy",
            WriteBatch::Sells(_) => "sell",
            WriteBatch::Cancels(_) => "cancel",
        }
    }

    fn len(&self) -> usize {
        match self {
            WriteBatch::Bids(items) => items.len(),
            WriteBatch::Buys(items) => items.len(),
            WriteBatch::Sells(items) => items.len(),
            WriteBatch::Cancels(items) => items.len(),
        }
    }
}

fn chunked<T: Clone>(items: &[T], size: usize, wrap: fn(Vec<T>) -> WriteBatch) -> Vec<WriteBatch> {
    items.chunks(size.max(1)).map(|c| wrap(c.to_vec())).collect()
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct RunCoordinator {
    gateway: Arc<dyn MarketGateway>,
    notifier: Arc<dyn NotificationSink>,
    submission: SubmissionConfig,
}

impl RunCoordinator {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        notifier: Arc<dyn NotificationSink>,
        submission: SubmissionConfig,
    ) -> Self {
        Self {
            gateway,
            notifier,
            submission,
        }
    }

    /// Execute one full cycle: load the run config, run the variant, and
    /// persist the normalized snapshot. Submission failures are surfaced
    /// in the report, not as errors — only auth/fetch/config problems
    /// abort the run.
    pub async fn execute(
        &self,
        variant: RunVariant,
        config_path: &str,
    ) -> Result<RunReport, InvestError> {
        let config = storage::load_run_config(config_path)?;

        info!(variant = variant.name(), config = config_path, "Run starting");

        let report = match variant {
            RunVariant::Primary => self.run_primary(&config).await?,
            RunVariant::Secondary => self.run_secondary(&config).await?,
            RunVariant::Liquidation => self.run_liquidation(&config).await?,
        };

        storage::save_run_config(&config, config_path)?;

        info!(
            variant = variant.name(),
            scanned = report.offers_scanned,
            submitted = report.actions_submitted,
            rejected = report.candidates_rejected,
            failed_batches = report.failed_batches.len(),
            aborted_batches = report.aborted_batches,
            "Run complete"
        );

        Ok(report)
    }

    // -- Variants --------------------------------------------------------

    /// Bid on primary-market auctions that clear the gain threshold.
    async fn run_primary(&self, config: &RunConfig) -> Result<RunReport, InvestError> {
        let deadline = self.deadline();
        let filters = MarketFilters::for_run(config);

        let offers = fetch_with_retry("primary auctions", || {
            self.gateway.list_active_primary(&filters)
        })
        .await?;

        let mut exposure = UserExposure::new();
        let selection = OrderSelector::new(config).select_bids(&offers, &mut exposure);

        let mut report = RunReport {
            offers_scanned: offers.len(),
            candidates_rejected: selection.rejections.len(),
            ..RunReport::default()
        };

        if selection.is_empty() {
            info!("No item to bid for in primary");
            return Ok(report);
        }

        let bids: Vec<BidOrder> = selection
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Bid(bid) => Some(bid.clone()),
                _ => None,
            })
            .collect();

        let outcome = self
            .submit_batches(
                chunked(&bids, self.submission.batch_size, WriteBatch::Bids),
                deadline,
            )
            .await;

        self.notify("Bidding from primary", action_lines(&selection), &outcome)
            .await;
        report.absorb(outcome);

        Ok(report)
    }

    /// Buy undervalued secondary-market parts, then list any current
    /// holdings that are not on sale at their policy rate.
    async fn run_secondary(&self, config: &RunConfig) -> Result<RunReport, InvestError> {
        let deadline = self.deadline();
        let mut report = RunReport::default();

        // Buy pass
        let filters = MarketFilters::for_run(config);
        let listings = fetch_with_retry("secondary market", || {
            self.gateway.list_active_secondary(&filters)
        })
        .await?;
        report.offers_scanned += listings.len();

        let mut exposure = UserExposure::new();
        let selection = OrderSelector::new(config).select_buys(&listings, &mut exposure);
        report.candidates_rejected += selection.rejections.len();

        if selection.is_empty() {
            info!("No item to buy in secondary");
        } else {
            let ids: Vec<String> = selection
                .actions
                .iter()
                .filter_map(|a| match a {
                    Action::Buy { listing_id } => Some(listing_id.clone()),
                    _ => None,
                })
                .collect();

            let outcome = self
                .submit_batches(
                    chunked(&ids, self.submission.batch_size, WriteBatch::Buys),
                    deadline,
                )
                .await;
            self.notify("Buying from secondary", action_lines(&selection), &outcome)
                .await;
            report.absorb(outcome);
        }

        // Sell pass: current holdings that are not listed yet.
        let holdings_filters = MarketFilters::default()
            .loan_status(LOAN_STATUS_CURRENT)
            .sales_status(SALES_STATUS_NOT_ON_SALE);
        let held = fetch_with_retry("account holdings", || {
            self.gateway.list_account_holdings(&holdings_filters)
        })
        .await?;
        report.offers_scanned += held.len();

        let sells = OrderSelector::new(config).select_sells(&held);
        if sells.is_empty() {
            info!("No item to sell in secondary");
            return Ok(report);
        }

        let orders: Vec<SellOrder> = sells
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Sell(order) => Some(order.clone()),
                _ => None,
            })
            .collect();

        let outcome = self
            .submit_batches(
                chunked(&orders, self.submission.batch_size, WriteBatch::Sells),
                deadline,
            )
            .await;
        self.notify("Selling from secondary", action_lines(&sells), &outcome)
            .await;
        report.absorb(outcome);

        Ok(report)
    }

    /// Walk the configured liquidation tiers, reconciling each tier's
    /// slice of the portfolio; with no tiers configured, liquidate the
    /// whole portfolio at 0%. Either way, finish by listing unlisted
    /// current holdings at the market-price policy rate.
    async fn run_liquidation(&self, config: &RunConfig) -> Result<RunReport, InvestError> {
        let deadline = self.deadline();
        let mut report = RunReport::default();
        let relist = !config.cancel_only_mismatched;

        let tiers = config.discount_tiers();
        if tiers.is_empty() {
            self.liquidation_pass(
                MarketFilters::default(),
                DiscountPolicy::Fixed(0),
                "Selling with 0% discount",
                relist,
                deadline,
                &mut report,
            )
            .await?;
        } else {
            for tier in tiers {
                let policy = if tier.multiplier == 0.0 {
                    DiscountPolicy::Fixed(0)
                } else {
                    DiscountPolicy::Scaled(tier.multiplier)
                };
                let subject = format!("Selling with {} discount", tier.name);
                self.liquidation_pass(
                    MarketFilters::from_window(tier.window),
                    policy,
                    &subject,
                    relist,
                    deadline,
                    &mut report,
                )
                .await?;
            }
        }

        // Final pass: anything current and unlisted goes up at the
        // policy-computed market rate.
        let filters = MarketFilters::default()
            .loan_status(LOAN_STATUS_CURRENT)
            .sales_status(SALES_STATUS_NOT_ON_SALE);
        let held = fetch_with_retry("account holdings", || {
            self.gateway.list_account_holdings(&filters)
        })
        .await?;
        report.offers_scanned += held.len();

        let selection = OrderSelector::new(config).select_sells(&held);
        if selection.is_empty() {
            info!("No item to sell at market price in your account");
            return Ok(report);
        }

        let orders: Vec<SellOrder> = selection
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Sell(order) => Some(order.clone()),
                _ => None,
            })
            .collect();

        let outcome = self
            .submit_batches(
                chunked(&orders, self.submission.batch_size, WriteBatch::Sells),
                deadline,
            )
            .await;
        self.notify("Selling at market price", action_lines(&selection), &outcome)
            .await;
        report.absorb(outcome);

        Ok(report)
    }

    /// One reconcile-and-submit pass over the holdings selected by
    /// `filters`, pricing with `policy`.
    async fn liquidation_pass(
        &self,
        filters: MarketFilters,
        policy: DiscountPolicy,
        subject: &str,
        relist_mismatched: bool,
        deadline: Option<Instant>,
        report: &mut RunReport,
    ) -> Result<(), InvestError> {
        let holdings_filters = filters.clone().loan_status(LOAN_STATUS_CURRENT);
        let held = fetch_with_retry("account holdings", || {
            self.gateway.list_account_holdings(&holdings_filters)
        })
        .await?;

        let listing_filters = filters.my_items();
        let listed = fetch_with_retry("own listings", || {
            self.gateway.list_active_secondary(&listing_filters)
        })
        .await?;

        report.offers_scanned += held.len();

        let plan = reconcile(&held, &listed, policy, relist_mismatched);
        if plan.is_empty() {
            info!(subject, "Nothing to reconcile");
            return Ok(());
        }

        // Cancels go first so re-lists never collide with live listings.
        let mut batches = chunked(&plan.cancels, self.submission.batch_size, WriteBatch::Cancels);
        batches.extend(chunked(
            &plan.sells,
            self.submission.batch_size,
            WriteBatch::Sells,
        ));

        let outcome = self.submit_batches(batches, deadline).await;
        self.notify(subject, plan_sell_lines(&held, &plan), &outcome)
            .await;
        report.absorb(outcome);

        Ok(())
    }

    // -- Submission ------------------------------------------------------

    fn deadline(&self) -> Option<Instant> {
        self.submission
            .run_deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs))
    }

    /// Submit prepared batches sequentially with the configured politeness
    /// delay. A failed batch is recorded and skipped over; remaining
    /// batches still run. Once the deadline elapses, remaining batches are
    /// aborted — already-submitted ones stay committed.
    async fn submit_batches(
        &self,
        batches: Vec<WriteBatch>,
        deadline: Option<Instant>,
    ) -> SubmissionOutcome {
        let mut outcome = SubmissionOutcome::default();
        let delay = Duration::from_secs(self.submission.batch_delay_secs);
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    outcome.aborted_batches = total - index;
                    warn!(
                        aborted = outcome.aborted_batches,
                        "Run deadline elapsed — aborting remaining batches"
                    );
                    break;
                }
            }

            let result = match &batch {
                WriteBatch::Bids(bids) => self.gateway.submit_bids(bids).await,
                WriteBatch::Buys(ids) => self.gateway.submit_buys(ids).await,
                WriteBatch::Sells(sells) => self.gateway.submit_sells(sells).await,
                WriteBatch::Cancels(ids) => self.gateway.submit_cancels(ids).await,
            };

            match result {
                Ok(()) => {
                    info!(kind = batch.kind(), count = batch.len(), "Batch submitted");
                    outcome.submitted_actions += batch.len();
                }
                Err(e) => {
                    let failed = FailedBatch {
                        kind: batch.kind(),
                        count: batch.len(),
                        message: e.to_string(),
                    };
                    warn!(
                        error = %failed.to_error(),
                        "Batch failed — continuing with remaining batches"
                    );
                    outcome.failed.push(failed);
                }
            }
        }

        outcome
    }

    /// Best-effort summary mail. Failed batches are appended to the body;
    /// a failed send is logged and swallowed.
    async fn notify(&self, subject: &str, mut lines: Vec<String>, outcome: &SubmissionOutcome) {
        if lines.is_empty() && outcome.failed.is_empty() {
            return;
        }

        for failed in &outcome.failed {
            lines.push(format!("FAILED: {}", failed.to_error()));
        }

        if let Err(e) = self.notifier.send(subject, &lines.join("\n")).await {
            warn!(error = %e, "Notification failed — continuing");
        }
    }
}

// ---------------------------------------------------------------------------
// Summary lines
// ---------------------------------------------------------------------------

fn url_or_id(offer: &LoanOffer) -> String {
    offer
        .investment_url()
        .unwrap_or_else(|| offer.id.clone())
}

/// Human-readable line per selected action, in submission order.
fn action_lines(selection: &Selection) -> Vec<String> {
    selection
        .actions
        .iter()
        .zip(&selection.accepted)
        .map(|(action, candidate)| match action {
            Action::Bid(bid) => {
                format!("Bidding {} for {}", bid.amount, url_or_id(&candidate.offer))
            }
            Action::Buy { .. } => format!(
                "Buying {} at {}%",
                url_or_id(&candidate.offer),
                candidate.offer.desired_discount_rate
            ),
            Action::Sell(sell) => {
                format!("Selling {} at {}%", url_or_id(&candidate.offer), sell.rate)
            }
            Action::Cancel { listing_id } => format!("Cancelling listing {listing_id}"),
        })
        .collect()
}

/// Lines for a reconcile plan's sales, resolved against the held parts.
fn plan_sell_lines(held: &[LoanOffer], plan: &ReconcilePlan) -> Vec<String> {
    plan.sells
        .iter()
        .map(|sell| {
            let label = held
                .iter()
                .find(|offer| offer.id == sell.loan_part_id)
                .map(url_or_id)
                .unwrap_or_else(|| sell.loan_part_id.clone());
            format!("Selling {label} at {}%", sell.rate)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
