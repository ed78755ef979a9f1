//! Secondary-market buy/sell entry point.

use anyhow::Result;

use autovest::app;
use autovest::engine::runner::RunVariant;

#[tokio::main]
async fn main() -> Result<()> {
    app::run(RunVariant::Secondary).await
}
