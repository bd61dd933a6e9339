//! chaintx-storage: durable cursor stores for ChainTx.
//!
//! Backends:
//! - [`file`]: one JSON document on disk, replaced atomically on every save
//! - `MemoryCursorStore` lives in `chaintx-core` (no persistence)

pub mod file;

pub use file::JsonFileCursorStore;
