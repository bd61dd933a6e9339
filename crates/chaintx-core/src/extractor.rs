//! Transaction extractor: resolves a listed transaction into a normalized
//! record carrying its block's metadata.

use alloy_primitives::B256;

use crate::client::ChainClient;
use crate::error::IngestError;
use crate::types::{Header, TransactionRecord};

/// Converts a block's transaction ids into [`TransactionRecord`]s.
pub struct TransactionExtractor<'a, C: ChainClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: ChainClient + ?Sized> TransactionExtractor<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Fetch the detail of `tx_id` and build its record.
    ///
    /// Returns `Ok(None)` if the transaction vanished between listing and
    /// detail fetch, which is expected around reorg boundaries.
    pub async fn extract(
        &self,
        header: &Header,
        tx_id: B256,
    ) -> Result<Option<TransactionRecord>, IngestError> {
        let detail = match self.client.transaction_detail(tx_id).await {
            Ok(detail) => detail,
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    tx = %tx_id,
                    block = header.number,
                    error = %e,
                    "Transaction vanished before its detail was fetched; skipping"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(Some(TransactionRecord {
            tx_hash: tx_id,
            block_number: header.number,
            block_hash: header.hash,
            timestamp: header.timestamp,
            from: detail.from,
            to: detail.to,
            value: detail.value,
            reorged: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{transfer, MemoryChain};
    use crate::types::{hash_from_u64, TransactionDetail};
    use alloy_primitives::{Address, U256};

    #[tokio::test]
    async fn value_beyond_u64_is_preserved() {
        let chain = MemoryChain::new();
        let value = U256::from(1u8) << 80;
        let (id, detail) = transfer(7, value);
        let header = chain.add_block(10, hash_from_u64(10), hash_from_u64(9), vec![(id, detail)]);

        let record = TransactionExtractor::new(&chain)
            .extract(&header, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value, U256::from(1_208_925_819_614_629_174_706_176u128));
        assert_eq!(record.block_number, 10);
        assert_eq!(record.block_hash, header.hash);
        assert_eq!(record.timestamp, header.timestamp);
    }

    #[tokio::test]
    async fn contract_creation_has_no_recipient() {
        let chain = MemoryChain::new();
        let id = hash_from_u64(99);
        let detail = TransactionDetail {
            from: Address::repeat_byte(0x11),
            to: None,
            value: U256::ZERO,
        };
        let header = chain.add_block(1, hash_from_u64(1), hash_from_u64(0), vec![(id, detail)]);
        let record = TransactionExtractor::new(&chain)
            .extract(&header, id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.to.is_none());
    }

    #[tokio::test]
    async fn vanished_transaction_is_skipped() {
        let chain = MemoryChain::new();
        let header = chain.add_simple_block(1, 1, 0, 1);
        let id = header.transaction_ids[0];
        chain.remove_transaction(&id);
        let out = TransactionExtractor::new(&chain).extract(&header, id).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn transient_failure_propagates() {
        let chain = MemoryChain::new();
        let header = chain.add_simple_block(1, 1, 0, 1);
        let id = header.transaction_ids[0];
        chain.fail_detail(id, 1);
        let err = TransactionExtractor::new(&chain).extract(&header, id).await.unwrap_err();
        assert!(err.is_transient());
    }
}
