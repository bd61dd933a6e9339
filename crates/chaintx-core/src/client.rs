//! The `ChainClient` trait: the pipeline's only view of the remote node.

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::error::IngestError;
use crate::types::{Header, TransactionDetail};

/// Abstracts the remote chain node.
///
/// Every call may fail with [`IngestError::Unavailable`] (transient, retried
/// by the loop) or [`IngestError::NotFound`] (the identifier no longer
/// resolves, usually because of a reorg). Implementations have no side
/// effects beyond the network call itself.
///
/// The trait is object-safe and can be stored as `Arc<dyn ChainClient>`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The current chain head.
    async fn latest_header(&self) -> Result<Header, IngestError>;

    /// A header by hash, used to walk parent links backward.
    async fn header_by_hash(&self, hash: B256) -> Result<Header, IngestError>;

    /// Transaction hashes of a block, in block order.
    async fn block_transaction_ids(&self, block_hash: B256) -> Result<Vec<B256>, IngestError>;

    /// Sender, recipient and value of a transaction.
    async fn transaction_detail(&self, tx_id: B256) -> Result<TransactionDetail, IngestError>;

    /// The node endpoint (URL or name), for log context.
    fn endpoint(&self) -> &str;
}

#[async_trait]
impl<C: ChainClient + ?Sized> ChainClient for std::sync::Arc<C> {
    async fn latest_header(&self) -> Result<Header, IngestError> {
        (**self).latest_header().await
    }

    async fn header_by_hash(&self, hash: B256) -> Result<Header, IngestError> {
        (**self).header_by_hash(hash).await
    }

    async fn block_transaction_ids(&self, block_hash: B256) -> Result<Vec<B256>, IngestError> {
        (**self).block_transaction_ids(block_hash).await
    }

    async fn transaction_detail(&self, tx_id: B256) -> Result<TransactionDetail, IngestError> {
        (**self).transaction_detail(tx_id).await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}
