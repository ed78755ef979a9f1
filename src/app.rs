//! Shared CLI bootstrap.
//!
//! The three entry points differ only in which run variant they execute;
//! everything else — config, logging, auth, gateway, notifier wiring —
//! is identical and lives here. Behavior is fully config-driven: the
//! binaries take no flags, exit 0 on completion regardless of whether any
//! action was taken, and non-zero on unrecoverable fetch/auth/config
//! failure.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::OAuthTokenProvider;
use crate::config::AppConfig;
use crate::engine::runner::{RunCoordinator, RunVariant};
use crate::gateway::bondora::BondoraGateway;
use crate::notify::{NotificationSink, NullSink, SmtpSink};

const CONFIG_PATH: &str = "config.toml";

/// Run one polling cycle for the given variant.
pub async fn run(variant: RunVariant) -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load(CONFIG_PATH)?;
    init_logging();

    info!(
        variant = variant.name(),
        marketplace = %cfg.marketplace.base_url,
        "autovest starting"
    );

    let tokens = Arc::new(OAuthTokenProvider::new(cfg.auth.token_file.clone())?);
    let gateway = Arc::new(BondoraGateway::new(
        cfg.marketplace.base_url.clone(),
        cfg.marketplace.request_timeout_secs,
        tokens,
    )?);

    let notifier: Arc<dyn NotificationSink> = match cfg.email.clone() {
        Some(email) => Arc::new(SmtpSink::new(email)?),
        None => Arc::new(NullSink),
    };

    let coordinator = RunCoordinator::new(gateway, notifier, cfg.submission.clone());

    let config_path = match variant {
        RunVariant::Primary => &cfg.runs.primary,
        RunVariant::Secondary => &cfg.runs.secondary,
        RunVariant::Liquidation => &cfg.runs.liquidation,
    };

    let report = coordinator.execute(variant, config_path).await?;

    if !report.failed_batches.is_empty() {
        warn!(
            failed = report.failed_batches.len(),
            "Run finished with failed batches — see log above"
        );
    }

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("autovest=info"));

    let json_logging = std::env::var("AUTOVEST_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
