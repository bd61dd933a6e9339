//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting blocks.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The node could not be reached or answered with a transient failure.
    #[error("node unavailable: {0}")]
    Unavailable(String),

    /// The identifier no longer resolves on the node (pruned or orphaned).
    #[error("not found: {0}")]
    NotFound(String),

    /// The node answered, but the payload could not be understood.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("gap of {depth} blocks between cursor {last} and head {head} exceeds max gap depth {max}")]
    GapTooLarge {
        last: u64,
        head: u64,
        depth: u64,
        max: u64,
    },

    #[error("reorg of depth {depth} at block {at} (cursor {last}) exceeds max reorg depth {max}")]
    ReorgTooDeep {
        last: u64,
        at: u64,
        depth: u64,
        max: u64,
    },

    #[error("malformed header chain at block {block_number}: {reason}")]
    MalformedChain { block_number: u64, reason: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification that drives how the ingestion loop reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff, never surfaced.
    Transient,
    /// Recoverable signal: triggers reorg detection or a per-transaction skip.
    NotFound,
    /// Stops the loop; surfaced to the owner.
    Fatal,
    /// Rejected before the loop starts.
    ConfigInvalid,
    /// Logged and skipped.
    Skippable,
}

impl IngestError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) => ErrorClass::Transient,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::GapTooLarge { .. }
            | Self::ReorgTooDeep { .. }
            | Self::MalformedChain { .. }
            | Self::Storage(_) => ErrorClass::Fatal,
            Self::ConfigInvalid(_) => ErrorClass::ConfigInvalid,
            Self::Decode(_) | Self::Other(_) => ErrorClass::Skippable,
        }
    }

    /// Returns `true` if the error is transient (retryable).
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns `true` if the error must stop ingestion.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Returns `true` if the identifier vanished from the node.
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(IngestError::Unavailable("timeout".into()).is_transient());
        assert!(IngestError::NotFound("0xabc".into()).is_not_found());
        assert!(IngestError::GapTooLarge { last: 1, head: 100, depth: 98, max: 10 }.is_fatal());
        assert!(IngestError::ReorgTooDeep { last: 10, at: 5, depth: 6, max: 3 }.is_fatal());
        assert_eq!(
            IngestError::ConfigInvalid("zero".into()).class(),
            ErrorClass::ConfigInvalid
        );
        assert_eq!(IngestError::Decode("bad hex".into()).class(), ErrorClass::Skippable);
    }

    #[test]
    fn display_names_depths() {
        let e = IngestError::GapTooLarge { last: 100, head: 200, depth: 99, max: 64 };
        let msg = e.to_string();
        assert!(msg.contains("99"));
        assert!(msg.contains("64"));
    }
}
