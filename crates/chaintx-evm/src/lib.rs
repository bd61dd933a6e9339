//! chaintx-evm: EVM JSON-RPC chain client and builder API.

pub mod builder;
pub mod fetcher;
pub mod rpc;

pub use builder::IngestBuilder;
pub use fetcher::EvmChainClient;
pub use rpc::{HttpTransport, RpcTransport};
