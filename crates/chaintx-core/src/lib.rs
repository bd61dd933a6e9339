//! chaintx-core: ordered, reorg-aware transaction ingestion.
//!
//! # Architecture
//!
//! ```text
//! IngestionLoop ──────────────────────────────→ Publisher ══▶ Subscription
//!      ├── ChainClient          (node access: heads, block txs, tx detail)
//!      ├── BlockCursor          (gap fill, reorg resolution)
//!      │     └── RecentBlocks   (bounded window of recorded headers)
//!      ├── TransactionExtractor (header + tx id → TransactionRecord)
//!      ├── Backoff              (transient node failures)
//!      └── CheckpointManager    (resume after restart)
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod memory;
pub mod output;
pub mod reorg;
pub mod tracker;
pub mod types;

pub use backoff::{Backoff, BackoffConfig};
pub use checkpoint::{Checkpoint, CheckpointManager, CursorStore, MemoryCursorStore};
pub use client::ChainClient;
pub use config::IngestConfig;
pub use cursor::{Advance, BlockCursor, CursorLimits, CursorState};
pub use error::{ErrorClass, IngestError};
pub use extractor::TransactionExtractor;
pub use ingest::{IngestionHandle, IngestionLoop, LoopState};
pub use memory::MemoryChain;
pub use output::{OutputChannel, PublishError, Publisher, SharedSubscription, Subscription};
pub use reorg::ReorgInfo;
pub use tracker::RecentBlocks;
pub use types::{Header, Invalidation, StreamItem, TransactionDetail, TransactionRecord};
