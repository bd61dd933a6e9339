//! Recent-block window: the recorded canonical chain the cursor compares
//! new headers against when looking for a common ancestor.

use std::collections::VecDeque;

use alloy_primitives::B256;

use crate::types::Header;

/// Sliding window of recently confirmed headers (oldest first).
///
/// Consecutive entries are always linked by parent hash; a header that does
/// not extend the current tip is never appended.
#[derive(Debug, Clone)]
pub struct RecentBlocks {
    window: VecDeque<Header>,
    capacity: usize,
}

impl RecentBlocks {
    /// Create an empty window retaining at most `capacity` headers.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuild a window from persisted headers, keeping only the linked tail.
    pub fn from_headers(headers: Vec<Header>, capacity: usize) -> Self {
        let mut recent = Self::new(capacity);
        for header in headers {
            if !recent.push(header.clone()) {
                recent.window.clear();
                recent.window.push_back(header);
            }
        }
        recent
    }

    /// Append a header that extends the tip. Returns `false` (and leaves the
    /// window untouched) if it does not.
    pub fn push(&mut self, header: Header) -> bool {
        if let Some(tip) = self.window.back() {
            if !header.extends(tip) {
                return false;
            }
        }
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(header);
        true
    }

    /// The most recently confirmed header.
    pub fn tip(&self) -> Option<&Header> {
        self.window.back()
    }

    /// The oldest header still retained.
    pub fn oldest(&self) -> Option<&Header> {
        self.window.front()
    }

    /// Returns a header by number if it's in the window.
    pub fn get(&self, number: u64) -> Option<&Header> {
        let oldest = self.window.front()?.number;
        let idx = number.checked_sub(oldest)? as usize;
        self.window.get(idx)
    }

    /// Recorded hash at `number`, if the window reaches that far.
    pub fn hash_at(&self, number: u64) -> Option<B256> {
        self.get(number).map(|h| h.hash)
    }

    /// Returns `true` if the window holds exactly this `(number, hash)`.
    pub fn contains(&self, header: &Header) -> bool {
        self.hash_at(header.number) == Some(header.hash)
    }

    /// Headers strictly above `number`, oldest first.
    pub fn after(&self, number: u64) -> Vec<Header> {
        self.window.iter().filter(|h| h.number > number).cloned().collect()
    }

    /// Discard everything above `number`.
    pub fn rewind_to(&mut self, number: u64) {
        while let Some(back) = self.window.back() {
            if back.number > number {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }

    /// Number of headers in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Returns `true` if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Copy of the window, oldest first.
    pub fn to_vec(&self) -> Vec<Header> {
        self.window.iter().cloned().collect()
    }
}
