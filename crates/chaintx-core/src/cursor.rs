//! Block cursor: tracks ingestion progress and turns each polled head into
//! the ordered list of blocks still to process.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::client::ChainClient;
use crate::error::IngestError;
use crate::reorg::{self, ReorgInfo};
use crate::tracker::RecentBlocks;
use crate::types::Header;

/// The persisted position of the stream.
///
/// `recent` is the window of recently confirmed headers (oldest first) that
/// reorgs are resolved against; it ends at `(last_number, last_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    /// Last confirmed block number.
    pub last_number: u64,
    /// Last confirmed block hash.
    pub last_hash: B256,
    /// Recently confirmed headers.
    #[serde(default)]
    pub recent: Vec<Header>,
}

impl CursorState {
    /// A cursor known only by its position, with no recorded history.
    pub fn new(last_number: u64, last_hash: B256) -> Self {
        Self {
            last_number,
            last_hash,
            recent: Vec::new(),
        }
    }

    /// Returns the next block to process (cursor + 1).
    pub fn next_block(&self) -> u64 {
        self.last_number.saturating_add(1)
    }
}

/// Walk-back limits for gap filling and reorg resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorLimits {
    /// Missing blocks that may be filled in one advance.
    pub max_gap_depth: u64,
    /// Recorded blocks that may be rolled back in one advance.
    pub max_reorg_depth: u64,
}

impl Default for CursorLimits {
    fn default() -> Self {
        Self {
            max_gap_depth: 64,
            max_reorg_depth: 12,
        }
    }
}

/// The result of advancing the cursor to a new head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advance {
    /// Blocks to process, oldest first.
    pub headers: Vec<Header>,
    /// Set when recorded blocks were rolled back.
    pub reorg: Option<ReorgInfo>,
}

impl Advance {
    fn blocks(headers: Vec<Header>) -> Self {
        Self {
            headers,
            reorg: None,
        }
    }

    /// Returns `true` if there is nothing to process.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.reorg.is_none()
    }
}

/// Owns the [`CursorState`] and decides which blocks each poll yields.
///
/// Only the chain reachable from the most recently reported head is
/// followed; no alternative forks are retained.
#[derive(Debug, Clone)]
pub struct BlockCursor {
    recent: RecentBlocks,
    limits: CursorLimits,
}

impl BlockCursor {
    /// A cursor with no position; the first head it sees becomes its start.
    pub fn new(limits: CursorLimits) -> Self {
        Self {
            recent: RecentBlocks::new(window_capacity(&limits)),
            limits,
        }
    }

    /// Resume from a persisted state.
    pub fn restore(state: CursorState, limits: CursorLimits) -> Self {
        let capacity = window_capacity(&limits);
        let mut recent = RecentBlocks::from_headers(state.recent, capacity);
        let consistent = recent
            .tip()
            .map(|tip| tip.number == state.last_number && tip.hash == state.last_hash)
            .unwrap_or(false);
        if !consistent {
            // Only the position is trustworthy; start the window there.
            recent = RecentBlocks::new(capacity);
            recent.push(Header {
                number: state.last_number,
                hash: state.last_hash,
                parent_hash: B256::ZERO,
                timestamp: 0,
                transaction_ids: Vec::new(),
            });
        }
        Self { recent, limits }
    }

    /// Snapshot of the current state, `None` before the first head.
    pub fn state(&self) -> Option<CursorState> {
        self.recent.tip().map(|tip| CursorState {
            last_number: tip.number,
            last_hash: tip.hash,
            recent: self.recent.to_vec(),
        })
    }

    /// Last confirmed block number.
    pub fn last_number(&self) -> Option<u64> {
        self.recent.tip().map(|tip| tip.number)
    }

    /// The recorded header at `number`, if still in the window.
    pub fn recorded(&self, number: u64) -> Option<&Header> {
        self.recent.get(number)
    }

    pub fn limits(&self) -> CursorLimits {
        self.limits
    }

    /// Drop recorded blocks above `number`.
    pub fn rewind_to(&mut self, number: u64) {
        self.recent.rewind_to(number);
    }

    /// Record `header` as the new last confirmed block. It must extend the
    /// current one.
    pub fn record(&mut self, header: Header) -> Result<(), IngestError> {
        let number = header.number;
        if self.recent.push(header) {
            Ok(())
        } else {
            Err(IngestError::MalformedChain {
                block_number: number,
                reason: "block does not extend the cursor".into(),
            })
        }
    }

    /// Advance to `head`, returning the blocks to process in order.
    ///
    /// Parent lookups for gap filling and reorg resolution go through
    /// `client`. On error the state is left unchanged.
    pub async fn advance<C: ChainClient + ?Sized>(
        &mut self,
        client: &C,
        head: Header,
    ) -> Result<Advance, IngestError> {
        let tip = match self.recent.tip() {
            Some(tip) => tip.clone(),
            None => {
                tracing::info!(block = head.number, hash = %head.hash, "Cursor starting at chain head");
                self.recent.push(head.clone());
                return Ok(Advance::blocks(vec![head]));
            }
        };

        if head.number == tip.number && head.hash == tip.hash {
            tracing::trace!(block = head.number, "Head unchanged");
            return Ok(Advance::default());
        }

        if self.recent.contains(&head) {
            tracing::debug!(
                block = head.number,
                cursor = tip.number,
                "Node reported an older canonical head; ignoring"
            );
            return Ok(Advance::default());
        }

        if head.extends(&tip) {
            self.recent.push(head.clone());
            return Ok(Advance::blocks(vec![head]));
        }

        if head.number.saturating_sub(tip.number) > 1 {
            let depth = head.number - tip.number - 1;
            if depth > self.limits.max_gap_depth {
                return Err(IngestError::GapTooLarge {
                    last: tip.number,
                    head: head.number,
                    depth,
                    max: self.limits.max_gap_depth,
                });
            }
            tracing::debug!(from = tip.number.saturating_add(1), to = head.number, depth, "Filling gap");
        }

        let resolution =
            reorg::walk_to_ancestor(client, &self.recent, head, self.limits.max_reorg_depth)
                .await?;

        let mut next = self.recent.clone();
        let diverged = next.after(resolution.ancestor.number);
        next.rewind_to(resolution.ancestor.number);
        for header in &resolution.canonical {
            if !next.push(header.clone()) {
                return Err(IngestError::MalformedChain {
                    block_number: header.number,
                    reason: "walked headers do not form a linked chain".into(),
                });
            }
        }
        self.recent = next;

        let reorg = if diverged.is_empty() {
            None
        } else {
            tracing::warn!(
                depth = diverged.len(),
                ancestor = resolution.ancestor.number,
                head = tip.number,
                "Reorg detected"
            );
            Some(ReorgInfo {
                common_ancestor: resolution.ancestor,
                diverged,
            })
        };

        Ok(Advance {
            headers: resolution.canonical,
            reorg,
        })
    }
}

fn window_capacity(limits: &CursorLimits) -> usize {
    usize::try_from(limits.max_reorg_depth.saturating_add(1)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChain;
    use crate::types::hash_from_u64;

    fn limits(gap: u64, reorg: u64) -> CursorLimits {
        CursorLimits {
            max_gap_depth: gap,
            max_reorg_depth: reorg,
        }
    }

    /// Chain `from..=to` with hash == number, parent == number - 1.
    fn canonical(chain: &MemoryChain, from: u64, to: u64) -> Vec<Header> {
        (from..=to)
            .map(|i| chain.add_simple_block(i, i, i - 1, 1))
            .collect()
    }

    async fn cursor_at(chain: &MemoryChain, from: u64, to: u64, l: CursorLimits) -> BlockCursor {
        let mut cursor = BlockCursor::new(l);
        for h in canonical(chain, from, to) {
            cursor.advance(chain, h).await.unwrap();
        }
        cursor
    }

    #[tokio::test]
    async fn first_head_starts_cursor() {
        let chain = MemoryChain::new();
        let h = chain.add_simple_block(500, 500, 499, 0);
        let mut cursor = BlockCursor::new(CursorLimits::default());
        let adv = cursor.advance(&chain, h).await.unwrap();
        assert_eq!(adv.headers.len(), 1);
        assert_eq!(cursor.state().unwrap().next_block(), 501);
    }

    #[tokio::test]
    async fn linked_sequence_emits_each_block_once_in_order() {
        let chain = MemoryChain::new();
        let mut cursor = BlockCursor::new(CursorLimits::default());
        let mut seen = Vec::new();
        for h in canonical(&chain, 100, 120) {
            // Every head is polled twice.
            for _ in 0..2 {
                let adv = cursor.advance(&chain, h.clone()).await.unwrap();
                seen.extend(adv.headers.iter().map(|h| h.number));
            }
        }
        assert_eq!(seen, (100..=120).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn duplicate_head_is_noop() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, CursorLimits::default()).await;
        let before = cursor.state();
        let head = chain.header_by_hash(hash_from_u64(105)).await.unwrap();
        let adv = cursor.advance(&chain, head).await.unwrap();
        assert!(adv.is_empty());
        assert_eq!(cursor.state(), before);
    }

    #[tokio::test]
    async fn older_canonical_head_is_ignored() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, CursorLimits::default()).await;
        let stale = chain.header_by_hash(hash_from_u64(103)).await.unwrap();
        assert!(cursor.advance(&chain, stale).await.unwrap().is_empty());
        assert_eq!(cursor.last_number(), Some(105));
    }

    #[tokio::test]
    async fn gap_of_three_is_backfilled_oldest_first() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, CursorLimits::default()).await;
        let missed = canonical(&chain, 106, 108);
        let adv = cursor.advance(&chain, missed[2].clone()).await.unwrap();
        let numbers: Vec<_> = adv.headers.iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![106, 107, 108]);
        assert!(adv.reorg.is_none());
        assert_eq!(cursor.last_number(), Some(108));
    }

    #[tokio::test]
    async fn gap_beyond_limit_is_fatal_and_state_unchanged() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, limits(2, 4)).await;
        let before = cursor.state();
        let far = canonical(&chain, 106, 109);
        let err = cursor.advance(&chain, far[3].clone()).await.unwrap_err();
        assert!(matches!(err, IngestError::GapTooLarge { depth: 3, max: 2, .. }));
        assert!(err.is_fatal());
        assert_eq!(cursor.state(), before);
    }

    #[tokio::test]
    async fn reorg_at_depth_two_names_ancestor() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, limits(8, 4)).await;

        // Fork off 103: 104' -> 105' -> 106'.
        chain.add_simple_block(104, 0x104f, 103, 2);
        chain.add_simple_block(105, 0x105f, 0x104f, 1);
        let head = chain.add_simple_block(106, 0x106f, 0x105f, 1);

        let adv = cursor.advance(&chain, head).await.unwrap();
        let reorg = adv.reorg.expect("reorg expected");
        assert_eq!(reorg.common_ancestor.number, 103);
        assert_eq!(reorg.depth(), 2);
        assert_eq!(
            reorg.diverged.iter().map(|h| h.number).collect::<Vec<_>>(),
            vec![104, 105]
        );
        assert_eq!(
            adv.headers.iter().map(|h| h.hash).collect::<Vec<_>>(),
            vec![hash_from_u64(0x104f), hash_from_u64(0x105f), hash_from_u64(0x106f)]
        );
        assert_eq!(cursor.recorded(104).unwrap().hash, hash_from_u64(0x104f));
        assert_eq!(cursor.last_number(), Some(106));
    }

    #[tokio::test]
    async fn reorg_to_shorter_chain() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, limits(8, 4)).await;
        let head = chain.add_simple_block(104, 0x104f, 103, 0);
        let adv = cursor.advance(&chain, head).await.unwrap();
        assert_eq!(adv.reorg.unwrap().depth(), 2);
        assert_eq!(adv.headers.len(), 1);
        assert_eq!(cursor.last_number(), Some(104));
    }

    #[tokio::test]
    async fn reorg_beyond_limit_is_fatal_and_state_unchanged() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 110, limits(8, 2)).await;
        let before = cursor.state();

        // Fork off 106: four recorded blocks diverge.
        chain.add_simple_block(107, 0x107f, 106, 0);
        chain.add_simple_block(108, 0x108f, 0x107f, 0);
        chain.add_simple_block(109, 0x109f, 0x108f, 0);
        chain.add_simple_block(110, 0x110f, 0x109f, 0);
        let head = chain.add_simple_block(111, 0x111f, 0x110f, 0);

        let err = cursor.advance(&chain, head).await.unwrap_err();
        assert!(matches!(err, IngestError::ReorgTooDeep { max: 2, .. }));
        assert_eq!(cursor.state(), before);
    }

    #[tokio::test]
    async fn orphaned_parent_surfaces_not_found() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, CursorLimits::default()).await;
        let missed = canonical(&chain, 106, 107);
        chain.remove_block(&missed[0].hash);
        let err = cursor.advance(&chain, missed[1].clone()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cursor.last_number(), Some(105));
    }

    #[tokio::test]
    async fn restore_resumes_and_resolves_reorg() {
        let chain = MemoryChain::new();
        let cursor = cursor_at(&chain, 100, 105, limits(8, 4)).await;
        let state: CursorState =
            serde_json::from_str(&serde_json::to_string(&cursor.state().unwrap()).unwrap()).unwrap();

        let mut restored = BlockCursor::restore(state, limits(8, 4));
        chain.add_simple_block(105, 0x105f, 104, 0);
        let head = chain.add_simple_block(106, 0x106f, 0x105f, 0);
        let adv = restored.advance(&chain, head).await.unwrap();
        assert_eq!(adv.reorg.unwrap().common_ancestor.number, 104);
    }

    #[tokio::test]
    async fn restore_from_bare_position() {
        let chain = MemoryChain::new();
        canonical(&chain, 100, 101);
        let mut cursor = BlockCursor::restore(
            CursorState::new(100, hash_from_u64(100)),
            CursorLimits::default(),
        );
        let head = chain.header_by_hash(hash_from_u64(101)).await.unwrap();
        let adv = cursor.advance(&chain, head).await.unwrap();
        assert_eq!(adv.headers.len(), 1);
        assert_eq!(cursor.last_number(), Some(101));
    }

    #[tokio::test]
    async fn head_at_max_number_does_not_overflow() {
        let chain = MemoryChain::new();
        let mut cursor = BlockCursor::restore(
            CursorState::new(u64::MAX, hash_from_u64(1)),
            CursorLimits::default(),
        );
        let head = Header {
            number: u64::MAX,
            hash: hash_from_u64(2),
            parent_hash: hash_from_u64(1),
            timestamp: 0,
            transaction_ids: vec![],
        };
        let err = cursor.advance(&chain, head).await.unwrap_err();
        assert!(matches!(err, IngestError::ReorgTooDeep { .. }), "got {err:?}");
        assert_eq!(cursor.last_number(), Some(u64::MAX));
    }

    #[tokio::test]
    async fn rewind_then_record_rebuilds_position() {
        let chain = MemoryChain::new();
        let mut cursor = cursor_at(&chain, 100, 105, limits(8, 4)).await;
        cursor.rewind_to(103);
        assert_eq!(cursor.last_number(), Some(103));

        let skipped = chain.header_by_hash(hash_from_u64(105)).await.unwrap();
        assert!(matches!(
            cursor.record(skipped),
            Err(IngestError::MalformedChain { block_number: 105, .. })
        ));
        let next = chain.header_by_hash(hash_from_u64(104)).await.unwrap();
        cursor.record(next).unwrap();
        assert_eq!(cursor.state().unwrap().last_hash, hash_from_u64(104));
    }
}
