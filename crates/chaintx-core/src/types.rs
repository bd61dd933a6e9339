//! Shared types for the ingestion pipeline.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

// ─── Header ───────────────────────────────────────────────────────────────────

/// Compact block metadata: enough to track the chain and list its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: u64,
    /// Transaction hashes in block order.
    #[serde(default)]
    pub transaction_ids: Vec<B256>,
}

impl Header {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &Header) -> bool {
        parent.number.checked_add(1) == Some(self.number) && self.parent_hash == parent.hash
    }
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// Sender, recipient and value of a transaction as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
}

/// A normalized transaction, enriched with its block's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub tx_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub timestamp: u64,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    /// Full 256-bit value; never narrowed.
    pub value: U256,
    /// Set when this transaction was invalidated by a reorg and re-included
    /// in the new canonical chain.
    #[serde(default)]
    pub reorged: bool,
}

/// Notice that a previously emitted record left the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invalidation {
    pub tx_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
}

// ─── StreamItem ───────────────────────────────────────────────────────────────

/// An item delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StreamItem {
    Transaction(TransactionRecord),
    Invalidated(Invalidation),
}

impl StreamItem {
    /// The transaction hash this item refers to.
    pub fn tx_hash(&self) -> B256 {
        match self {
            Self::Transaction(r) => r.tx_hash,
            Self::Invalidated(i) => i.tx_hash,
        }
    }

    /// Returns the record if this item is a transaction.
    pub fn as_transaction(&self) -> Option<&TransactionRecord> {
        match self {
            Self::Transaction(r) => Some(r),
            Self::Invalidated(_) => None,
        }
    }
}

/// Build a 32-byte identifier from a number (left-padded, big-endian).
/// Handy for tests and synthetic chains.
pub fn hash_from_u64(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
