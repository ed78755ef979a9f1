//! Stale-listing liquidation entry point.

use anyhow::Result;

use autovest::app;
use autovest::engine::runner::RunVariant;

#[tokio::main]
async fn main() -> Result<()> {
    app::run(RunVariant::Liquidation).await
}
