//! Token indexer binary

use anyhow::Context;
use std::io::BufRead;
use token_index::{BlockEvent, Config, TokenIndex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting token indexer");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let mut config = Config::from_file(&path)
                .with_context(|| format!("loading config from {}", path))?;
            config.apply_env();
            config.validate()?;
            config
        }
        None => Config::from_env()?,
    };

    if config.registry.spend_script_hash.is_none() {
        tracing::warn!("Registry spend script not configured, no asset will be flagged as registered");
    }

    let index = TokenIndex::open(config).await?;

    if let Ok(path) = std::env::var("TOKEN_INDEX_REPLAY") {
        replay(&index, &path).await?;
    }

    let stats = index.storage_stats()?;
    tracing::info!(
        snapshots = stats.total_snapshots,
        outputs = stats.total_outputs,
        registry_nodes = stats.registry_nodes,
        registry_view = index.registry().len(),
        "Index ready"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down token indexer");
    index.shutdown().await?;
    Ok(())
}

/// Ingest newline-delimited JSON blocks
async fn replay(index: &TokenIndex, path: &str) -> anyhow::Result<()> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path))?;
    let mut blocks = 0usize;
    let mut snapshots = 0usize;

    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let block: BlockEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid block", path, line_no + 1))?;
        let summary = index.ingest_block(block).await?;
        blocks += 1;
        snapshots += summary.snapshots;
    }

    tracing::info!(path, blocks, snapshots, "Replay finished");
    Ok(())
}
