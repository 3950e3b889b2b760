use hindsight::bot::Bot;
use hindsight::config::{Config, Mode};
use hindsight::llm::LlmClient;
use hindsight::rag::composer::AnswerComposer;
use hindsight::rag::memory::ConversationMemory;
use hindsight::rag::retriever::Retriever;
use hindsight::slack::SlackClient;
use hindsight::vector::open_index;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hindsight::init_tracing();

    let config = Config::from_env(Mode::Bot)?;
    info!("Starting bot with {:?}", config);

    let llm = Arc::new(LlmClient::new(&config)?);
    let index = open_index(&config)?;
    let retriever = Retriever::new(llm.clone(), index);
    let memory = ConversationMemory::new(config.memory_max_conversations);
    let composer = AnswerComposer::new(retriever, llm, memory, &config);

    let slack = SlackClient::new(&config, Config::require(&config.slack_bot_token, "SLACK_BOT_TOKEN")?)?;
    let app_token = Config::require(&config.slack_app_token, "SLACK_APP_TOKEN")?;

    Bot::new(slack, app_token, composer).run().await?;
    Ok(())
}
