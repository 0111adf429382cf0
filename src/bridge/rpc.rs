//! EIP-1193 wallet bridge spoken over HTTP JSON-RPC.
//!
//! Targets signer endpoints that expose the browser-provider method set
//! (`eth_requestAccounts`, `wallet_switchEthereumChain`, ...). Change
//! notifications are synthesised by polling `eth_accounts` and `eth_chainId`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::abi::encode_call_hex;
use super::{
    BridgeError, ContractCall, NetworkDescriptor, ReceiptStatus, SubscriptionId, TxReceipt,
    WalletBridge, WalletEvent, WalletEventSink,
};
use crate::config::{BridgeConfig, ContractConfig};
use crate::revert::revert_reason;
use crate::session::Session;
use crate::types::{Address, ChainId, TxHash};

const JSONRPC_VERSION: &str = "2.0";
const USER_REJECTED_CODE: i64 = 4001;
const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

struct RpcInner {
    client: Client,
    url: Url,
    contract: Address,
    gas_limit: Option<u64>,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
    event_poll_interval: Duration,
    next_request: AtomicU64,
    next_subscription: AtomicU64,
    watchers: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
}

/// JSON-RPC backed [`WalletBridge`].
#[derive(Clone)]
pub struct JsonRpcWalletBridge {
    inner: Arc<RpcInner>,
}

impl JsonRpcWalletBridge {
    pub fn new(config: &BridgeConfig, contract: &ContractConfig) -> Result<Self, BridgeError> {
        let url = Url::parse(&config.endpoint)
            .map_err(|err| BridgeError::Transport(format!("invalid endpoint: {err}")))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| BridgeError::Transport(err.to_string()))?;
        Ok(Self {
            inner: Arc::new(RpcInner {
                client,
                url,
                contract: contract.address.clone(),
                gas_limit: contract.gas_limit,
                receipt_poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
                receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
                event_poll_interval: Duration::from_millis(config.event_poll_interval_ms),
                next_request: AtomicU64::new(1),
                next_subscription: AtomicU64::new(1),
                watchers: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let payload = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.inner.next_request.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let response = self
            .inner
            .client
            .post(self.inner.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "HTTP status {}",
                response.status()
            )));
        }
        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|err| BridgeError::Malformed(err.to_string()))?;
        if let Some(error) = response.error {
            return Err(map_rpc_error(error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn accounts(&self, method: &str) -> Result<Vec<Address>, BridgeError> {
        let value = self.request(method, json!([])).await?;
        parse_accounts(&value)
    }
}

#[async_trait]
impl WalletBridge for JsonRpcWalletBridge {
    async fn request_accounts(&self) -> Result<Vec<Address>, BridgeError> {
        self.accounts("eth_requestAccounts").await
    }

    async fn list_accounts(&self) -> Result<Vec<Address>, BridgeError> {
        self.accounts("eth_accounts").await
    }

    async fn chain_id(&self) -> Result<ChainId, BridgeError> {
        let value = self.request("eth_chainId", json!([])).await?;
        parse_chain_id(&value)
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), BridgeError> {
        let params = json!([{ "chainId": chain_id.to_hex() }]);
        match self.request("wallet_switchEthereumChain", params).await {
            Ok(_) => Ok(()),
            Err(BridgeError::Rpc { code, .. }) if code == UNRECOGNIZED_CHAIN_CODE => {
                Err(BridgeError::UnknownChain { chain_id })
            }
            Err(err) => Err(err),
        }
    }

    async fn add_chain(&self, descriptor: &NetworkDescriptor) -> Result<(), BridgeError> {
        let params = json!([{
            "chainId": descriptor.chain_id.to_hex(),
            "chainName": descriptor.chain_name,
            "nativeCurrency": {
                "name": descriptor.native_currency.name,
                "symbol": descriptor.native_currency.symbol,
                "decimals": descriptor.native_currency.decimals,
            },
            "rpcUrls": descriptor.rpc_urls,
            "blockExplorerUrls": descriptor.block_explorer_urls,
        }]);
        self.request("wallet_addEthereumChain", params).await?;
        Ok(())
    }

    async fn balance(&self, address: &Address) -> Result<U256, BridgeError> {
        let value = self
            .request("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        parse_quantity(&value)
    }

    async fn send_transaction(
        &self,
        from: &Address,
        call: &ContractCall,
    ) -> Result<TxHash, BridgeError> {
        let mut tx = json!({
            "from": from.to_string(),
            "to": self.inner.contract.to_string(),
            "data": encode_call_hex(call),
        });
        if let Some(gas) = self.inner.gas_limit {
            tx["gas"] = Value::String(format!("0x{gas:x}"));
        }
        let value = self.request("eth_sendTransaction", json!([tx])).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| BridgeError::Malformed(format!("transaction hash: {value}")))?;
        TxHash::parse(raw).map_err(|err| BridgeError::Malformed(err.to_string()))
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<TxReceipt, BridgeError> {
        time::timeout(self.inner.receipt_timeout, self.poll_receipt(hash))
            .await
            .map_err(|_| {
                BridgeError::Transport(format!(
                    "no receipt for {hash} after {}s",
                    self.inner.receipt_timeout.as_secs()
                ))
            })?
    }

    fn subscribe(&self, sink: WalletEventSink) -> Result<SubscriptionId, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BridgeError::Unsupported("event polling needs a tokio runtime".into()))?;
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let bridge = self.clone();
        let worker = runtime.spawn(async move { bridge.watch(sink).await });
        self.inner.watchers.lock().insert(id, worker);
        debug!(subscription = %id, "wallet event polling started");
        Ok(id)
    }

    fn pushes_events(&self) -> bool {
        false
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(worker) = self.inner.watchers.lock().remove(&id) {
            worker.abort();
            debug!(subscription = %id, "wallet event polling stopped");
        }
    }
}

impl JsonRpcWalletBridge {
    async fn poll_receipt(&self, hash: &TxHash) -> Result<TxReceipt, BridgeError> {
        loop {
            let value = self
                .request("eth_getTransactionReceipt", json!([hash.to_string()]))
                .await?;
            if let Some(receipt) = parse_receipt(hash, &value)? {
                return Ok(receipt);
            }
            time::sleep(self.inner.receipt_poll_interval).await;
        }
    }

    // Each poll is compared with what the session last published rather than
    // with the previous poll, so changes made before the first tick are seen.
    async fn watch(&self, sink: WalletEventSink) {
        let mut ticker = time::interval(self.inner.event_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if sink.is_closed() {
                break;
            }
            let known = sink.last_known();
            let accounts = match self.list_accounts().await {
                Ok(accounts) => accounts_change(&known, accounts),
                Err(err) => {
                    warn!(error = %err, "wallet account poll failed");
                    None
                }
            };
            let chain = match self.chain_id().await {
                Ok(chain) => chain_change(&known, chain),
                Err(err) => {
                    warn!(error = %err, "wallet chain poll failed");
                    None
                }
            };
            for event in accounts.into_iter().chain(chain) {
                if !sink.emit(event) {
                    return;
                }
            }
        }
    }
}

/// Account notification owed to a session, if any. Nothing is reported while
/// the session is disconnected; reconnecting is an explicit user action.
fn accounts_change(known: &Session, accounts: Vec<Address>) -> Option<WalletEvent> {
    let current = known.address.as_ref()?;
    if accounts.first() == Some(current) {
        None
    } else {
        Some(WalletEvent::AccountsChanged(accounts))
    }
}

fn chain_change(known: &Session, chain: ChainId) -> Option<WalletEvent> {
    (known.chain_id != Some(chain)).then_some(WalletEvent::ChainChanged(chain))
}

fn map_rpc_error(error: JsonRpcError) -> BridgeError {
    if error.code == USER_REJECTED_CODE {
        return BridgeError::rejected(error.message);
    }
    let data_reason = error.data.as_ref().and_then(|data| match data {
        Value::String(reason) => Some(reason.clone()),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    });
    let reverted = error.message.to_ascii_lowercase().contains("revert")
        || data_reason
            .as_deref()
            .is_some_and(|reason| reason.to_ascii_lowercase().contains("revert"));
    if reverted {
        let reason = data_reason.unwrap_or(error.message);
        return BridgeError::Reverted(revert_reason(&reason).to_string());
    }
    BridgeError::Rpc {
        code: error.code,
        message: error.message,
    }
}

fn parse_accounts(value: &Value) -> Result<Vec<Address>, BridgeError> {
    let entries = value
        .as_array()
        .ok_or_else(|| BridgeError::Malformed(format!("account list: {value}")))?;
    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .ok_or_else(|| BridgeError::Malformed(format!("account entry: {entry}")))
                .and_then(|raw| {
                    Address::parse(raw).map_err(|err| BridgeError::Malformed(err.to_string()))
                })
        })
        .collect()
}

fn parse_chain_id(value: &Value) -> Result<ChainId, BridgeError> {
    match value {
        Value::String(raw) => {
            ChainId::parse(raw).map_err(|err| BridgeError::Malformed(err.to_string()))
        }
        Value::Number(number) => number
            .as_u64()
            .map(ChainId)
            .ok_or_else(|| BridgeError::Malformed(format!("chain id: {number}"))),
        other => Err(BridgeError::Malformed(format!("chain id: {other}"))),
    }
}

fn parse_quantity(value: &Value) -> Result<U256, BridgeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| BridgeError::Malformed(format!("quantity: {value}")))?;
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| BridgeError::Malformed(format!("quantity: {raw}")))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|err| BridgeError::Malformed(err.to_string()))
}

fn parse_receipt(hash: &TxHash, value: &Value) -> Result<Option<TxReceipt>, BridgeError> {
    if value.is_null() {
        return Ok(None);
    }
    let status = match value.get("status").and_then(Value::as_str) {
        Some("0x1") => ReceiptStatus::Success,
        Some("0x0") => ReceiptStatus::Reverted,
        other => {
            return Err(BridgeError::Malformed(format!(
                "receipt status: {}",
                other.unwrap_or("missing")
            )))
        }
    };
    let block_number = value
        .get("blockNumber")
        .map(parse_quantity)
        .transpose()?
        .and_then(|block| u64::try_from(block).ok());
    Ok(Some(TxReceipt::new(*hash, block_number, status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i64, message: &str, data: Option<Value>) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.to_string(),
            data,
        }
    }

    #[test]
    fn user_rejection_maps_to_rejected() {
        let err = map_rpc_error(rpc_error(4001, "User rejected the request.", None));
        assert!(err.is_rejection());
    }

    #[test]
    fn revert_reason_is_extracted_from_message_or_data() {
        let err = map_rpc_error(rpc_error(-32000, "execution reverted: Already voted", None));
        assert_eq!(err, BridgeError::Reverted("Already voted".into()));

        let err = map_rpc_error(rpc_error(
            -32603,
            "Internal JSON-RPC error.",
            Some(json!({ "message": "execution reverted: Poll does not exist" })),
        ));
        assert_eq!(err, BridgeError::Reverted("Poll does not exist".into()));
    }

    #[test]
    fn other_errors_keep_code() {
        let err = map_rpc_error(rpc_error(-32602, "invalid params", None));
        assert_eq!(
            err,
            BridgeError::Rpc {
                code: -32602,
                message: "invalid params".into()
            }
        );
    }

    #[test]
    fn node_insufficient_funds_reaches_user_as_balance_hint() {
        let err = map_rpc_error(rpc_error(
            -32000,
            "insufficient funds for gas * price + value",
            None,
        ));
        let err = crate::errors::ClientError::from(err);
        assert_eq!(
            err.user_message(),
            "Insufficient balance to pay for this transaction."
        );
    }

    #[test]
    fn parses_accounts_chain_and_balance() {
        let accounts =
            parse_accounts(&json!(["0x00000000000000000000000000000000000000aa"])).unwrap();
        assert_eq!(accounts.len(), 1);
        assert!(parse_accounts(&json!(["nope"])).is_err());

        assert_eq!(parse_chain_id(&json!("0xba9304")).unwrap(), ChainId(12_227_332));
        assert_eq!(parse_chain_id(&json!(5)).unwrap(), ChainId(5));

        assert_eq!(
            parse_quantity(&json!("0x14d1120d7b160000")).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), U256::ZERO);
        assert!(parse_quantity(&json!("1234")).is_err());
    }

    #[test]
    fn quantities_above_u128_are_kept() {
        let raw = format!("0x1{}", "0".repeat(40));
        assert_eq!(parse_quantity(&json!(raw)).unwrap(), U256::from(1u8) << 160usize);
    }

    fn addr(byte: u8) -> Address {
        Address::parse(format!("0x{}", hex::encode([byte; 20]))).expect("address")
    }

    #[test]
    fn account_polls_compare_against_published_session() {
        let connected = Session {
            address: Some(addr(1)),
            chain_id: Some(ChainId(5)),
        };
        assert_eq!(accounts_change(&connected, vec![addr(1), addr(2)]), None);
        assert_eq!(
            accounts_change(&connected, vec![addr(2)]),
            Some(WalletEvent::AccountsChanged(vec![addr(2)]))
        );
        assert_eq!(
            accounts_change(&connected, Vec::new()),
            Some(WalletEvent::AccountsChanged(Vec::new()))
        );
        assert_eq!(accounts_change(&Session::default(), vec![addr(3)]), None);
    }

    #[test]
    fn chain_polls_report_any_difference_from_session() {
        let session = Session {
            address: Some(addr(1)),
            chain_id: Some(ChainId(5)),
        };
        assert_eq!(chain_change(&session, ChainId(5)), None);
        assert_eq!(
            chain_change(&session, ChainId(7)),
            Some(WalletEvent::ChainChanged(ChainId(7)))
        );
        assert_eq!(
            chain_change(&Session::default(), ChainId(5)),
            Some(WalletEvent::ChainChanged(ChainId(5)))
        );
    }

    #[test]
    fn polling_bridge_does_not_push_events() {
        let bridge = JsonRpcWalletBridge::new(&BridgeConfig::default(), &ContractConfig::default())
            .expect("bridge");
        assert!(!bridge.pushes_events());
    }

    #[test]
    fn pending_receipt_is_none() {
        let hash = TxHash::from_bytes([7u8; 32]);
        assert!(parse_receipt(&hash, &Value::Null).unwrap().is_none());
        let mined = parse_receipt(&hash, &json!({ "status": "0x1", "blockNumber": "0x10" }))
            .unwrap()
            .expect("receipt");
        assert!(mined.succeeded());
        assert_eq!(mined.block_number, Some(16));
        let reverted = parse_receipt(&hash, &json!({ "status": "0x0" }))
            .unwrap()
            .expect("receipt");
        assert_eq!(reverted.status, ReceiptStatus::Reverted);
    }

    #[test]
    fn bridge_rejects_invalid_endpoint() {
        let config = BridgeConfig {
            endpoint: "not a url".into(),
            ..BridgeConfig::default()
        };
        assert!(matches!(
            JsonRpcWalletBridge::new(&config, &ContractConfig::default()),
            Err(BridgeError::Transport(_))
        ));
    }
}
