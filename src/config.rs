//! Configuration loading.
//!
//! Two layers:
//! - `AppConfig` — application-level settings read once from `config.toml`
//!   (marketplace endpoint, auth token file, SMTP, per-variant run-config
//!   paths). Secrets are referenced by env-var name and resolved at runtime.
//! - `RunConfig` — the tunable thresholds for one run, persisted as a flat
//!   key/value JSON document that is re-read at run start and re-written
//!   normalized at run end (see `storage`).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

// ---------------------------------------------------------------------------
// Application config (TOML)
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub marketplace: MarketplaceConfig,
    pub auth: AuthConfig,
    pub runs: RunsConfig,
    pub submission: SubmissionConfig,
    /// Absent section disables email summaries entirely.
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Path of the persisted OAuth token set.
    pub token_file: String,
}

/// Paths of the per-variant run-config documents.
#[derive(Debug, Deserialize, Clone)]
pub struct RunsConfig {
    pub primary: String,
    pub secondary: String,
    pub liquidation: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmissionConfig {
    /// Maximum orders per gateway write request.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    /// Politeness delay between write batches, seconds.
    #[serde(default = "defaults::batch_delay_secs")]
    pub batch_delay_secs: u64,
    /// Overall deadline for the submission phase; remaining batches are
    /// aborted cleanly once it elapses.
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    /// Env-var name holding the SMTP password.
    pub smtp_pass_env: String,
    pub mail_to: String,
    #[serde(default)]
    pub mail_from: Option<String>,
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Run config (flat JSON document)
// ---------------------------------------------------------------------------

/// Discount tier names walked by the stale-liquidation run, in order of
/// increasing aggressiveness.
pub const DISCOUNT_TIER_NAMES: [&str; 6] = [
    "no_discount",
    "low_discount",
    "medium_discount",
    "high_discount",
    "crazy_discount",
    "total_discount",
];

/// Tunable thresholds for a single run.
///
/// Loaded once per run and treated as immutable until the end-of-run
/// snapshot. Every field has a documented default so absent keys are never
/// ambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Largest single bid, currency units. Default 20.
    #[serde(default = "defaults::max_bid")]
    pub max_bid: Decimal,
    /// Smallest allowed bid. Default 1.
    #[serde(default = "defaults::min_bid")]
    pub min_bid: Decimal,
    /// Per-user/per-loan investment cap. Default 50.
    #[serde(default = "defaults::max_investment_per_loan")]
    pub max_investment_per_loan: Decimal,
    /// Minimum gain (target discount minus asking discount) to buy.
    /// Default 5.
    #[serde(default = "defaults::min_gain", alias = "min_percentage_overhead")]
    pub min_gain: Decimal,
    /// Income-verification floor for buy-side selection; 0 disables the
    /// check. Default 4 (fully verified only).
    #[serde(default = "defaults::verification_floor")]
    pub min_verification_tier: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_days_till_next_payment: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_days_till_next_payment: Option<i64>,
    /// Stale liquidation: cancel mismatched listings outright instead of
    /// re-listing them at the tier rate. Default false.
    #[serde(default)]
    pub cancel_only_mismatched: bool,

    // Liquidation tier multipliers. A missing tier is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crazy_discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_discount: Option<f64>,

    /// Remaining flat keys, notably the per-tier day-window overrides
    /// (`{min,max}_days_till_next_payment_<tier>`).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_bid: defaults::max_bid(),
            min_bid: defaults::min_bid(),
            max_investment_per_loan: defaults::max_investment_per_loan(),
            min_gain: defaults::min_gain(),
            min_verification_tier: defaults::verification_floor(),
            min_days_till_next_payment: None,
            max_days_till_next_payment: None,
            cancel_only_mismatched: false,
            no_discount: None,
            low_discount: None,
            medium_discount: None,
            high_discount: None,
            crazy_discount: None,
            total_discount: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Day window on the next scheduled payment, converted to absolute
/// timestamps by the gateway filters at call time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayWindow {
    pub min_days: Option<i64>,
    pub max_days: Option<i64>,
}

/// One configured liquidation tier: its rate multiplier and the day window
/// restricting which holdings it applies to.
#[derive(Debug, Clone)]
pub struct DiscountTier {
    pub name: &'static str,
    pub multiplier: f64,
    pub window: DayWindow,
}

impl RunConfig {
    /// Parse a run config from a flat JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse run config document")
    }

    /// The base day window on the next payment date.
    pub fn payment_window(&self) -> DayWindow {
        DayWindow {
            min_days: self.min_days_till_next_payment,
            max_days: self.max_days_till_next_payment,
        }
    }

    /// Configured liquidation tiers in walk order, each with its own day
    /// window override. Tiers without a multiplier are skipped; a tier
    /// without an override gets an unbounded window (the base window never
    /// leaks into tier passes).
    pub fn discount_tiers(&self) -> Vec<DiscountTier> {
        let multipliers = [
            self.no_discount,
            self.low_discount,
            self.medium_discount,
            self.high_discount,
            self.crazy_discount,
            self.total_discount,
        ];

        DISCOUNT_TIER_NAMES
            .iter()
            .copied()
            .zip(multipliers)
            .filter_map(|(name, multiplier)| {
                Some(DiscountTier {
                    name,
                    multiplier: multiplier?,
                    window: DayWindow {
                        min_days: self.tier_override("min_days_till_next_payment", name),
                        max_days: self.tier_override("max_days_till_next_payment", name),
                    },
                })
            })
            .collect()
    }

    fn tier_override(&self, bound: &str, tier: &str) -> Option<i64> {
        self.extra.get(&format!("{bound}_{tier}"))?.as_i64()
    }

    /// A copy suitable for the end-of-run snapshot: alias keys are already
    /// canonical (serde resolved them at load), and flat keys that are
    /// neither known fields nor per-tier window overrides are dropped.
    pub fn normalized(&self) -> Self {
        let mut cleaned = self.clone();
        cleaned.extra.retain(|key, value| {
            value.is_i64()
                && DISCOUNT_TIER_NAMES.iter().any(|tier| {
                    key == &format!("min_days_till_next_payment_{tier}")
                        || key == &format!("max_days_till_next_payment_{tier}")
                })
        });
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

mod defaults {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub fn max_bid() -> Decimal {
        dec!(20)
    }

    pub fn min_bid() -> Decimal {
        dec!(1)
    }

    pub fn max_investment_per_loan() -> Decimal {
        dec!(50)
    }

    pub fn min_gain() -> Decimal {
        dec!(5)
    }

    pub fn verification_floor() -> u8 {
        4
    }

    pub fn batch_size() -> usize {
        100
    }

    pub fn batch_delay_secs() -> u64 {
        3
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
