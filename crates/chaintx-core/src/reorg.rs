//! Reorg detection: walking a new head back to the recorded chain.
//!
//! Handles three situations with one walk:
//! 1. **Gap**: the head is several blocks ahead; parents are fetched until the
//!    walk reaches the cursor height.
//! 2. **Reorg**: the parent link to the recorded chain is broken; the walk
//!    continues until a header's parent matches the recorded hash at that
//!    height (the common ancestor).
//! 3. **Both**: a gap whose lowest filled block does not link to the cursor.

use crate::client::ChainClient;
use crate::error::IngestError;
use crate::tracker::RecentBlocks;
use crate::types::Header;

/// Describes a detected chain reorganization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgInfo {
    /// Last block shared by the recorded and the new canonical chain.
    pub common_ancestor: Header,
    /// Recorded blocks above the ancestor that left the canonical chain
    /// (oldest first).
    pub diverged: Vec<Header>,
}

impl ReorgInfo {
    /// Number of recorded blocks rolled back.
    pub fn depth(&self) -> u64 {
        self.diverged.len() as u64
    }
}

/// Outcome of walking a new head back to the recorded chain.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub ancestor: Header,
    /// New canonical headers above the ancestor, oldest first.
    pub canonical: Vec<Header>,
}

/// Walk backward from `head` through parent hashes until the walk joins
/// `recent`.
///
/// Only the chain reachable from `head` is followed. Fails with
/// [`IngestError::ReorgTooDeep`] once the ancestor would lie more than
/// `max_reorg_depth` blocks below the recorded tip (or below the window), and
/// with [`IngestError::MalformedChain`] if the node returns a parent that does
/// not match the link that was followed.
pub(crate) async fn walk_to_ancestor<C: ChainClient + ?Sized>(
    client: &C,
    recent: &RecentBlocks,
    head: Header,
    max_reorg_depth: u64,
) -> Result<Resolution, IngestError> {
    let last = match recent.tip() {
        Some(tip) => tip.number,
        None => {
            return Err(IngestError::Other(
                "cannot resolve ancestry against an empty window".into(),
            ))
        }
    };

    // Newest first while walking.
    let mut fresh = vec![head];
    loop {
        let lowest = &fresh[fresh.len() - 1];
        if lowest.number == 0 {
            return Err(IngestError::MalformedChain {
                block_number: 0,
                reason: "reached genesis without a common ancestor".into(),
            });
        }
        let parent_number = lowest.number - 1;
        let parent_hash = lowest.parent_hash;

        if parent_number <= last {
            match recent.get(parent_number) {
                Some(recorded) if recorded.hash == parent_hash => {
                    let depth = last - parent_number;
                    if depth > max_reorg_depth {
                        return Err(IngestError::ReorgTooDeep {
                            last,
                            at: parent_number,
                            depth,
                            max: max_reorg_depth,
                        });
                    }
                    let ancestor = recorded.clone();
                    fresh.reverse();
                    return Ok(Resolution {
                        ancestor,
                        canonical: fresh,
                    });
                }
                Some(_) => {
                    // The ancestor is at least one block lower.
                    let depth = last - parent_number + 1;
                    if depth > max_reorg_depth {
                        return Err(IngestError::ReorgTooDeep {
                            last,
                            at: parent_number,
                            depth,
                            max: max_reorg_depth,
                        });
                    }
                }
                None => {
                    return Err(IngestError::ReorgTooDeep {
                        last,
                        at: parent_number,
                        depth: last - parent_number + 1,
                        max: max_reorg_depth,
                    });
                }
            }
        }

        let parent = client.header_by_hash(parent_hash).await?;
        if parent.hash != parent_hash || parent.number != parent_number {
            return Err(IngestError::MalformedChain {
                block_number: parent_number,
                reason: format!(
                    "requested parent {parent_hash} of block {}, node returned block {} ({})",
                    parent_number + 1,
                    parent.number,
                    parent.hash
                ),
            });
        }
        tracing::trace!(block = parent.number, hash = %parent.hash, "Walked back to parent");
        fresh.push(parent);
    }
}
