pub mod bot;
pub mod config;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod mention;
pub mod rag;
pub mod reply;
pub mod retry;
pub mod slack;
pub mod vector;

#[cfg(test)]
pub(crate) mod testing;

use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
