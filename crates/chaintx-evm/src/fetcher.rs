//! EVM chain client.
//!
//! Uses `eth_getBlockByNumber("latest")` for the head, `eth_getBlockByHash`
//! for parent walks and transaction listings, and `eth_getTransactionByHash`
//! for sender, recipient and value. A `null` result for a hash lookup means
//! the identifier no longer resolves and is reported as `NotFound`.

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};

use chaintx_core::client::ChainClient;
use chaintx_core::config::IngestConfig;
use chaintx_core::error::IngestError;
use chaintx_core::types::{Header, TransactionDetail};

use crate::rpc::{HttpTransport, RpcTransport};

/// [`ChainClient`] over any JSON-RPC transport.
pub struct EvmChainClient<T = HttpTransport> {
    transport: T,
}

impl EvmChainClient<HttpTransport> {
    /// HTTP client for the configured node URL and request timeout.
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        let transport = HttpTransport::new(&config.node_url, config.request_timeout())?;
        Ok(Self::new(transport))
    }
}

impl<T: RpcTransport> EvmChainClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Value, IngestError> {
        let block = self
            .transport
            .call("eth_getBlockByHash", vec![json!(hash), json!(false)])
            .await?;
        if block.is_null() {
            return Err(IngestError::NotFound(format!("block {hash}")));
        }
        Ok(block)
    }
}

#[async_trait]
impl<T: RpcTransport> ChainClient for EvmChainClient<T> {
    async fn latest_header(&self) -> Result<Header, IngestError> {
        let block = self
            .transport
            .call("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        if block.is_null() {
            // Nodes answer null while syncing.
            return Err(IngestError::Unavailable("node returned no latest block".into()));
        }
        header_from_json(&block)
    }

    async fn header_by_hash(&self, hash: B256) -> Result<Header, IngestError> {
        header_from_json(&self.block_by_hash(hash).await?)
    }

    async fn block_transaction_ids(&self, block_hash: B256) -> Result<Vec<B256>, IngestError> {
        let block = self.block_by_hash(block_hash).await?;
        transaction_ids_from_json(&block)
    }

    async fn transaction_detail(&self, tx_id: B256) -> Result<TransactionDetail, IngestError> {
        let tx = self
            .transport
            .call("eth_getTransactionByHash", vec![json!(tx_id)])
            .await?;
        if tx.is_null() {
            return Err(IngestError::NotFound(format!("transaction {tx_id}")));
        }
        detail_from_json(&tx)
    }

    fn endpoint(&self) -> &str {
        self.transport.url()
    }
}

// ─── JSON parsing ─────────────────────────────────────────────────────────────

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, IngestError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| IngestError::Decode(format!("bad quantity {s:?}: {e}")))
}

/// Parse a hex quantity to a 256-bit integer.
pub fn parse_hex_u256(s: &str) -> Result<U256, IngestError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| IngestError::Decode(format!("bad quantity {s:?}: {e}")))
}

fn field<'a>(v: &'a Value, key: &str) -> Result<&'a str, IngestError> {
    v[key]
        .as_str()
        .ok_or_else(|| IngestError::Decode(format!("missing field {key:?}")))
}

fn parse_hash(s: &str) -> Result<B256, IngestError> {
    B256::from_str(s).map_err(|e| IngestError::Decode(format!("bad hash {s:?}: {e}")))
}

fn parse_address(s: &str) -> Result<Address, IngestError> {
    Address::from_str(s).map_err(|e| IngestError::Decode(format!("bad address {s:?}: {e}")))
}

/// Convert a block object to a [`Header`].
pub fn header_from_json(v: &Value) -> Result<Header, IngestError> {
    Ok(Header {
        number: parse_hex_u64(field(v, "number")?)?,
        hash: parse_hash(field(v, "hash")?)?,
        parent_hash: parse_hash(field(v, "parentHash")?)?,
        timestamp: parse_hex_u64(field(v, "timestamp")?)?,
        transaction_ids: transaction_ids_from_json(v)?,
    })
}

/// Transaction hashes of a block object. Accepts both hash lists and full
/// transaction objects.
pub fn transaction_ids_from_json(v: &Value) -> Result<Vec<B256>, IngestError> {
    let Some(txs) = v["transactions"].as_array() else {
        return Ok(Vec::new());
    };
    txs.iter()
        .map(|tx| match tx {
            Value::String(s) => parse_hash(s),
            obj => parse_hash(field(obj, "hash")?),
        })
        .collect()
}

/// Convert a transaction object to a [`TransactionDetail`]. A null `to` is a
/// contract creation.
pub fn detail_from_json(v: &Value) -> Result<TransactionDetail, IngestError> {
    let to = match v["to"].as_str() {
        Some(s) => Some(parse_address(s)?),
        None => None,
    };
    Ok(TransactionDetail {
        from: parse_address(field(v, "from")?)?,
        to,
        value: parse_hex_u256(field(v, "value")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers calls from a method → result table and records the params.
    #[derive(Default)]
    struct CannedTransport {
        results: HashMap<&'static str, Value>,
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl CannedTransport {
        fn with(mut self, method: &'static str, result: Value) -> Self {
            self.results.insert(method, result);
            self
        }
    }

    #[async_trait]
    impl RpcTransport for CannedTransport {
        async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IngestError> {
            self.calls.lock().unwrap().push((method.to_string(), params));
            self.results
                .get(method)
                .cloned()
                .ok_or_else(|| IngestError::Unavailable(format!("{method} not scripted")))
        }

        fn url(&self) -> &str {
            "canned"
        }
    }

    const HASH_A: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const HASH_B: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";
    const TX_1: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const TX_2: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn block_json() -> Value {
        json!({
            "number": "0x12a05f200",
            "hash": HASH_B,
            "parentHash": HASH_A,
            "timestamp": "0x65a0c3f0",
            "transactions": [TX_1, TX_2],
        })
    }

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn parse_large_value() {
        // 2^100 wei, beyond u64 and f64 precision.
        let v = parse_hex_u256("0x10000000000000000000000000").unwrap();
        assert_eq!(v, U256::from(1u8) << 100usize);
    }

    #[test]
    fn header_parsing() {
        let header = header_from_json(&block_json()).unwrap();
        assert_eq!(header.number, 5_000_000_000);
        assert_eq!(header.hash, B256::from_str(HASH_B).unwrap());
        assert_eq!(header.parent_hash, B256::from_str(HASH_A).unwrap());
        assert_eq!(header.timestamp, 0x65a0c3f0);
        assert_eq!(header.transaction_ids.len(), 2);
    }

    #[test]
    fn full_transaction_objects_accepted() {
        let v = json!({ "transactions": [{ "hash": TX_1 }, { "hash": TX_2 }] });
        let ids = transaction_ids_from_json(&v).unwrap();
        assert_eq!(ids[1], B256::from_str(TX_2).unwrap());
    }

    #[test]
    fn header_missing_field_is_decode_error() {
        let mut v = block_json();
        v.as_object_mut().unwrap().remove("parentHash");
        assert!(matches!(header_from_json(&v), Err(IngestError::Decode(_))));
    }

    #[test]
    fn contract_creation_has_no_recipient() {
        let v = json!({
            "from": "0x00000000000000000000000000000000000000aa",
            "to": null,
            "value": "0x0",
        });
        let detail = detail_from_json(&v).unwrap();
        assert!(detail.to.is_none());
        assert_eq!(detail.value, U256::ZERO);
    }

    #[tokio::test]
    async fn latest_header_queries_latest_block() {
        let client = EvmChainClient::new(
            CannedTransport::default().with("eth_getBlockByNumber", block_json()),
        );
        let header = client.latest_header().await.unwrap();
        assert_eq!(header.number, 5_000_000_000);

        let calls = client.transport.calls.lock().unwrap();
        assert_eq!(calls[0].0, "eth_getBlockByNumber");
        assert_eq!(calls[0].1, vec![json!("latest"), json!(false)]);
    }

    #[tokio::test]
    async fn null_block_is_not_found() {
        let client = EvmChainClient::new(
            CannedTransport::default().with("eth_getBlockByHash", Value::Null),
        );
        let hash = B256::from_str(HASH_A).unwrap();
        assert!(client.header_by_hash(hash).await.unwrap_err().is_not_found());
        assert!(client.block_transaction_ids(hash).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn null_transaction_is_not_found() {
        let client = EvmChainClient::new(
            CannedTransport::default().with("eth_getTransactionByHash", Value::Null),
        );
        let err = client
            .transaction_detail(B256::from_str(TX_1).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn null_latest_block_is_transient() {
        let client = EvmChainClient::new(
            CannedTransport::default().with("eth_getBlockByNumber", Value::Null),
        );
        assert!(client.latest_header().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn transaction_detail_parsed() {
        let client = EvmChainClient::new(CannedTransport::default().with(
            "eth_getTransactionByHash",
            json!({
                "hash": TX_1,
                "from": "0x00000000000000000000000000000000000000aa",
                "to": "0x00000000000000000000000000000000000000bb",
                "value": "0xde0b6b3a7640000",
            }),
        ));
        let detail = client
            .transaction_detail(B256::from_str(TX_1).unwrap())
            .await
            .unwrap();
        assert_eq!(detail.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(
            detail.to,
            Some(Address::from_str("0x00000000000000000000000000000000000000bb").unwrap())
        );
    }
}
