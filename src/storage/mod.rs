//! Run-config persistence.
//!
//! The flat key/value run document is read at run start and re-written
//! normalized at run end: alias keys become canonical, unknown flat keys
//! are dropped, and output is pretty-printed with sorted keys so rewrites
//! diff cleanly.

use std::path::Path;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::types::InvestError;

/// Load the run config for one entry point. A missing or malformed file
/// is a fatal configuration error — there is no implicit default run.
pub fn load_run_config(path: &str) -> Result<RunConfig, InvestError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| InvestError::Config(format!("Cannot read run config {path}: {e}")))?;

    let config = RunConfig::from_json(&json)
        .map_err(|e| InvestError::Config(format!("Cannot parse run config {path}: {e}")))?;

    info!(path, "Run config loaded");
    Ok(config)
}

/// Persist the normalized end-of-run snapshot.
pub fn save_run_config(config: &RunConfig, path: &str) -> Result<(), InvestError> {
    let normalized = config.normalized();

    // Round-trip through Value so keys serialise sorted.
    let value = serde_json::to_value(&normalized)
        .map_err(|e| InvestError::Config(format!("Cannot serialise run config: {e}")))?;
    let json = serde_json::to_string_pretty(&value)
        .map_err(|e| InvestError::Config(format!("Cannot serialise run config: {e}")))?;

    std::fs::write(path, json)
        .map_err(|e| InvestError::Config(format!("Cannot write run config {path}: {e}")))?;

    debug!(path, "Run config snapshot saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("autovest_run_config_{}.json", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = temp_path();

        let config = RunConfig::from_json(
            r#"{
                "max_bid": 10,
                "min_percentage_overhead": 6,
                "no_discount": 0.0,
                "max_days_till_next_payment_no_discount": 30,
                "legacy_key": true
            }"#,
        )
        .unwrap();

        save_run_config(&config, &path).unwrap();
        let loaded = load_run_config(&path).unwrap();

        assert_eq!(loaded.max_bid, dec!(10));
        // The alias was rewritten to its canonical key on save
        assert_eq!(loaded.min_gain, dec!(6));
        // Tier window override survived, the unknown key did not
        assert!(loaded
            .extra
            .contains_key("max_days_till_next_payment_no_discount"));
        assert!(!loaded.extra.contains_key("legacy_key"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_saved_document_has_sorted_keys() {
        let path = temp_path();
        save_run_config(&RunConfig::default(), &path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        let max_bid_at = json.find("\"max_bid\"").unwrap();
        let min_bid_at = json.find("\"min_bid\"").unwrap();
        let min_gain_at = json.find("\"min_gain\"").unwrap();
        assert!(max_bid_at < min_bid_at);
        assert!(min_bid_at < min_gain_at);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = load_run_config("/tmp/autovest_no_such_run_config.json").unwrap_err();
        assert!(matches!(err, InvestError::Config(_)));
    }
}
