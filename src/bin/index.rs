use hindsight::config::{Config, Mode};
use hindsight::error::Result;
use hindsight::indexer::{IndexReport, Indexer};
use hindsight::llm::LlmClient;
use hindsight::slack::SlackClient;
use hindsight::vector::{open_index, IndexSpec};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hindsight::init_tracing();

    let config = Config::from_env(Mode::Indexer)?;
    info!("Starting indexer with {:?}", config);

    // Only configuration problems fail the process; anything else is reported and the run ends.
    match backfill(&config).await {
        Ok(report) => info!("Indexing finished: {:?}", report),
        Err(e) if e.is_config() => return Err(e.into()),
        Err(e) => error!("Indexing aborted: {}", e),
    }
    Ok(())
}

async fn backfill(config: &Config) -> Result<IndexReport> {
    let index = open_index(config)?;
    let handle = index.ensure_index(&IndexSpec::from_config(config)).await?;
    info!(
        "Using index '{}' ({} dims, {})",
        handle.name, handle.dimension, handle.metric
    );

    let slack = SlackClient::new(config, Config::require(&config.slack_bot_token, "SLACK_BOT_TOKEN")?)?;
    let llm = LlmClient::new(config)?;
    Indexer::new(Arc::new(slack), Arc::new(llm), index, config)
        .run()
        .await
}
