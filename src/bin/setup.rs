use hindsight::config::{Config, Mode};
use hindsight::vector::{open_index, IndexSpec};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hindsight::init_tracing();

    let config = Config::from_env(Mode::Setup)?;
    let spec = IndexSpec::from_config(&config);
    let handle = open_index(&config)?.ensure_index(&spec).await?;

    if handle.created {
        info!("Created index '{}' ({} dims, {})", handle.name, handle.dimension, handle.metric);
    } else {
        info!("Index '{}' already exists and matches", handle.name);
    }
    Ok(())
}
