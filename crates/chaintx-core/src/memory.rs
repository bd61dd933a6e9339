//! In-memory chain node for tests and local demos.
//!
//! Headers and transactions live in RAM; the sequence of heads returned by
//! [`ChainClient::latest_header`] is scripted, and transient failures can be
//! injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::client::ChainClient;
use crate::error::IngestError;
use crate::types::{hash_from_u64, Header, TransactionDetail};

#[derive(Default)]
struct Inner {
    headers: HashMap<B256, Header>,
    transactions: HashMap<B256, TransactionDetail>,
    heads: VecDeque<B256>,
    head_failures: u32,
    detail_failures: HashMap<B256, u32>,
    header_failures: HashMap<B256, u32>,
    listing_misses: HashMap<B256, u32>,
}

/// Scripted in-memory chain node.
#[derive(Default)]
pub struct MemoryChain {
    inner: Mutex<Inner>,
    latest_calls: AtomicU64,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a header so it resolves by hash. Its transactions are not touched.
    pub fn insert_header(&self, header: Header) {
        self.inner.lock().unwrap().headers.insert(header.hash, header);
    }

    /// Store a block and its transactions, returning the header.
    pub fn add_block(
        &self,
        number: u64,
        hash: B256,
        parent_hash: B256,
        txs: Vec<(B256, TransactionDetail)>,
    ) -> Header {
        let header = Header {
            number,
            hash,
            parent_hash,
            timestamp: 1_700_000_000 + number * 12,
            transaction_ids: txs.iter().map(|(id, _)| *id).collect(),
        };
        let mut inner = self.inner.lock().unwrap();
        for (id, detail) in txs {
            inner.transactions.insert(id, detail);
        }
        inner.headers.insert(hash, header.clone());
        header
    }

    /// Store a block holding `tx_count` synthetic transfers whose hashes are
    /// derived from the block hash.
    pub fn add_simple_block(&self, number: u64, hash: u64, parent: u64, tx_count: u64) -> Header {
        let txs = (0..tx_count)
            .map(|i| transfer(hash * 1_000 + i, U256::from(i + 1)))
            .collect();
        self.add_block(number, hash_from_u64(hash), hash_from_u64(parent), txs)
    }

    /// Queue a head to be returned by `latest_header`. The last queued head is
    /// repeated once the queue is drained.
    pub fn push_head(&self, hash: B256) {
        self.inner.lock().unwrap().heads.push_back(hash);
    }

    /// Replace the scripted heads with a single head.
    pub fn set_head(&self, hash: B256) {
        let mut inner = self.inner.lock().unwrap();
        inner.heads.clear();
        inner.heads.push_back(hash);
    }

    /// Fail the next `n` calls to `latest_header` with `Unavailable`.
    pub fn fail_next_heads(&self, n: u32) {
        self.inner.lock().unwrap().head_failures = n;
    }

    /// Fail the next `n` detail lookups for `tx` with `Unavailable`.
    pub fn fail_detail(&self, tx: B256, n: u32) {
        self.inner.lock().unwrap().detail_failures.insert(tx, n);
    }

    /// Fail the next `n` lookups of block `hash` with `Unavailable`.
    pub fn fail_header_lookups(&self, hash: B256, n: u32) {
        self.inner.lock().unwrap().header_failures.insert(hash, n);
    }

    /// Answer the next `n` transaction listings of block `hash` with
    /// `NotFound`, as a lagging node behind a load balancer would.
    pub fn miss_listing(&self, hash: B256, n: u32) {
        self.inner.lock().unwrap().listing_misses.insert(hash, n);
    }

    /// Forget a transaction (pruned / orphaned).
    pub fn remove_transaction(&self, tx: &B256) {
        self.inner.lock().unwrap().transactions.remove(tx);
    }

    /// Forget a block (pruned / orphaned).
    pub fn remove_block(&self, hash: &B256) {
        self.inner.lock().unwrap().headers.remove(hash);
    }

    /// How many times `latest_header` was called.
    pub fn latest_calls(&self) -> u64 {
        self.latest_calls.load(Ordering::Relaxed)
    }
}

/// A synthetic transfer with sender and recipient derived from `seed`.
pub fn transfer(seed: u64, value: U256) -> (B256, TransactionDetail) {
    let from = Address::left_padding_from(&seed.to_be_bytes());
    let to = Address::left_padding_from(&(seed + 1).to_be_bytes());
    (
        hash_from_u64(seed),
        TransactionDetail {
            from,
            to: Some(to),
            value,
        },
    )
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn latest_header(&self) -> Result<Header, IngestError> {
        self.latest_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        if inner.head_failures > 0 {
            inner.head_failures -= 1;
            return Err(IngestError::Unavailable("injected head failure".into()));
        }
        let hash = if inner.heads.len() > 1 {
            inner.heads.pop_front()
        } else {
            inner.heads.front().copied()
        };
        let hash = hash.ok_or_else(|| IngestError::Unavailable("no head yet".into()))?;
        inner
            .headers
            .get(&hash)
            .cloned()
            .ok_or_else(|| IngestError::NotFound(format!("head {hash}")))
    }

    async fn header_by_hash(&self, hash: B256) -> Result<Header, IngestError> {
        let mut inner = self.inner.lock().unwrap();
        if take_failure(&mut inner.header_failures, &hash) {
            return Err(IngestError::Unavailable(format!("injected failure for block {hash}")));
        }
        inner
            .headers
            .get(&hash)
            .cloned()
            .ok_or_else(|| IngestError::NotFound(format!("block {hash}")))
    }

    async fn block_transaction_ids(&self, block_hash: B256) -> Result<Vec<B256>, IngestError> {
        let mut inner = self.inner.lock().unwrap();
        if take_failure(&mut inner.listing_misses, &block_hash) {
            return Err(IngestError::NotFound(format!("block {block_hash}")));
        }
        inner
            .headers
            .get(&block_hash)
            .map(|h| h.transaction_ids.clone())
            .ok_or_else(|| IngestError::NotFound(format!("block {block_hash}")))
    }

    async fn transaction_detail(&self, tx_id: B256) -> Result<TransactionDetail, IngestError> {
        let mut inner = self.inner.lock().unwrap();
        if take_failure(&mut inner.detail_failures, &tx_id) {
            return Err(IngestError::Unavailable(format!("injected failure for {tx_id}")));
        }
        inner
            .transactions
            .get(&tx_id)
            .cloned()
            .ok_or_else(|| IngestError::NotFound(format!("transaction {tx_id}")))
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

/// Consume one injected failure for `key`, if any remain.
fn take_failure(failures: &mut HashMap<B256, u32>, key: &B256) -> bool {
    match failures.get_mut(key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}
