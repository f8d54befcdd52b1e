//! Single-writer ingestion actor
//!
//! Every block goes through one task, so the read-latest-then-append step of
//! the balance ledger never interleaves with another writer.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           IndexerHandle (Clone)               │
//! └─────────────────────┬────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │          IndexerActor (single task)           │
//! │   Indexer::process_block(block, context)      │
//! └─────────────────────┬────────────────────────┘
//!                       │ oneshot
//!                       ▼
//!                 BlockSummary
//! ```

use crate::indexer::{BlockSummary, IndexContext, Indexer};
use crate::types::BlockEvent;
use crate::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the indexer actor
#[derive(Debug)]
pub enum IndexerMessage {
    /// Process one block
    ProcessBlock {
        /// Block to ingest
        block: BlockEvent,
        /// Tracked scripts and registry view for this block
        context: IndexContext,
        /// Reply channel
        response: oneshot::Sender<Result<BlockSummary>>,
    },

    /// Stop after the messages already queued
    Shutdown,
}

/// Actor that owns the indexer
#[derive(Debug)]
pub struct IndexerActor {
    indexer: Indexer,
    mailbox: mpsc::Receiver<IndexerMessage>,
}

impl IndexerActor {
    /// Create new actor
    pub fn new(indexer: Indexer, mailbox: mpsc::Receiver<IndexerMessage>) -> Self {
        Self { indexer, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                IndexerMessage::ProcessBlock {
                    block,
                    context,
                    response,
                } => {
                    let result = self.indexer.process_block(&block, &context);
                    if let Err(e) = &result {
                        tracing::error!(
                            slot = block.slot,
                            block_height = block.block_height,
                            error = %e,
                            "Block processing failed"
                        );
                    }
                    let _ = response.send(result);
                }
                IndexerMessage::Shutdown => break,
            }
        }

        tracing::info!("Indexer actor stopped");
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct IndexerHandle {
    sender: mpsc::Sender<IndexerMessage>,
}

impl IndexerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<IndexerMessage>) -> Self {
        Self { sender }
    }

    /// Ingest one block and wait for its summary
    pub async fn process_block(&self, block: BlockEvent, context: IndexContext) -> Result<BlockSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(IndexerMessage::ProcessBlock {
                block,
                context,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(IndexerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the indexer actor
pub fn spawn_indexer_actor(indexer: Indexer, mailbox_capacity: usize) -> (IndexerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = IndexerActor::new(indexer, rx);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (IndexerHandle::new(tx), task)
}
