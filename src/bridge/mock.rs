use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    BridgeError, ContractCall, NetworkDescriptor, ReceiptStatus, SubscriptionId, TxReceipt,
    WalletBridge, WalletEvent, WalletEventSink,
};
use crate::types::{Address, ChainId, TxHash};

/// Scripted wallet bridge.
///
/// Responses default to a cooperative wallet: account requests grant the
/// configured accounts, switching succeeds for known chains and transactions
/// mine successfully. Queued responses override the defaults one call at a time.
#[derive(Clone)]
pub struct MockWalletBridge {
    state: Arc<MockState>,
}

struct MockState {
    wallet_accounts: Mutex<Vec<Address>>,
    authorized: Mutex<Vec<Address>>,
    chain: Mutex<ChainId>,
    known_chains: Mutex<HashSet<ChainId>>,
    balances: Mutex<HashMap<Address, U256>>,
    request_responses: Mutex<VecDeque<Result<Vec<Address>, BridgeError>>>,
    switch_responses: Mutex<VecDeque<Result<(), BridgeError>>>,
    add_responses: Mutex<VecDeque<Result<(), BridgeError>>>,
    send_responses: Mutex<VecDeque<Result<TxHash, BridgeError>>>,
    receipt_responses: Mutex<VecDeque<Result<ReceiptStatus, BridgeError>>>,
    sent: Mutex<Vec<ContractCall>>,
    calls: Mutex<Vec<&'static str>>,
    sinks: Mutex<Vec<(SubscriptionId, WalletEventSink)>>,
    next_subscription: AtomicU64,
    next_tx: AtomicU64,
    receipts_paused: watch::Sender<bool>,
}

impl Default for MockWalletBridge {
    fn default() -> Self {
        Self::new(Vec::new(), ChainId(1))
    }
}

impl MockWalletBridge {
    /// Wallet holding `accounts` (not yet authorized) and sitting on `chain`.
    pub fn new(accounts: Vec<Address>, chain: ChainId) -> Self {
        let (receipts_paused, _) = watch::channel(false);
        let mut known = HashSet::new();
        known.insert(chain);
        Self {
            state: Arc::new(MockState {
                wallet_accounts: Mutex::new(accounts),
                authorized: Mutex::new(Vec::new()),
                chain: Mutex::new(chain),
                known_chains: Mutex::new(known),
                balances: Mutex::new(HashMap::new()),
                request_responses: Mutex::new(VecDeque::new()),
                switch_responses: Mutex::new(VecDeque::new()),
                add_responses: Mutex::new(VecDeque::new()),
                send_responses: Mutex::new(VecDeque::new()),
                receipt_responses: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                sinks: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                next_tx: AtomicU64::new(1),
                receipts_paused,
            }),
        }
    }

    /// Marks the wallet accounts as already authorized for this client.
    pub fn authorize(&self) -> &Self {
        let accounts = self.state.wallet_accounts.lock().clone();
        *self.state.authorized.lock() = accounts;
        self
    }

    pub fn add_known_chain(&self, chain: ChainId) -> &Self {
        self.state.known_chains.lock().insert(chain);
        self
    }

    pub fn set_balance(&self, address: &Address, balance: U256) -> &Self {
        self.state.balances.lock().insert(address.clone(), balance);
        self
    }

    pub fn current_chain(&self) -> ChainId {
        *self.state.chain.lock()
    }

    pub fn push_request_accounts_response(&self, response: Result<Vec<Address>, BridgeError>) {
        self.state.request_responses.lock().push_back(response);
    }

    pub fn push_switch_response(&self, response: Result<(), BridgeError>) {
        self.state.switch_responses.lock().push_back(response);
    }

    pub fn push_add_chain_response(&self, response: Result<(), BridgeError>) {
        self.state.add_responses.lock().push_back(response);
    }

    pub fn push_send_response(&self, response: Result<TxHash, BridgeError>) {
        self.state.send_responses.lock().push_back(response);
    }

    pub fn push_receipt_response(&self, response: Result<ReceiptStatus, BridgeError>) {
        self.state.receipt_responses.lock().push_back(response);
    }

    /// Holds every `wait_for_receipt` call until [`resume_receipts`](Self::resume_receipts).
    pub fn pause_receipts(&self) {
        self.state.receipts_paused.send_replace(true);
    }

    pub fn resume_receipts(&self) {
        self.state.receipts_paused.send_replace(false);
    }

    /// Pushes an event to every live subscription, as the wallet extension would.
    pub fn emit(&self, event: WalletEvent) -> usize {
        let sinks = self.state.sinks.lock().clone();
        sinks
            .iter()
            .filter(|(_, sink)| sink.emit(event.clone()))
            .count()
    }

    /// Simulates the user switching accounts inside the wallet UI.
    pub fn switch_account(&self, accounts: Vec<Address>) -> usize {
        *self.state.authorized.lock() = accounts.clone();
        self.emit(WalletEvent::AccountsChanged(accounts))
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.sinks.lock().len()
    }

    pub fn sent_calls(&self) -> Vec<ContractCall> {
        self.state.sent.lock().clone()
    }

    /// Every bridge method invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.calls.lock().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|name| **name == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().clear();
    }

    fn record(&self, method: &'static str) {
        self.state.calls.lock().push(method);
    }

    fn next_hash(&self) -> TxHash {
        let counter = self.state.next_tx.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&counter.to_be_bytes());
        TxHash::from_bytes(bytes)
    }
}

#[async_trait]
impl WalletBridge for MockWalletBridge {
    async fn request_accounts(&self) -> Result<Vec<Address>, BridgeError> {
        self.record("request_accounts");
        let scripted = self.state.request_responses.lock().pop_front();
        let granted = match scripted {
            Some(response) => response?,
            None => self.state.wallet_accounts.lock().clone(),
        };
        if granted.is_empty() {
            return Err(BridgeError::rejected("no accounts available"));
        }
        *self.state.authorized.lock() = granted.clone();
        Ok(granted)
    }

    async fn list_accounts(&self) -> Result<Vec<Address>, BridgeError> {
        self.record("list_accounts");
        Ok(self.state.authorized.lock().clone())
    }

    async fn chain_id(&self) -> Result<ChainId, BridgeError> {
        self.record("chain_id");
        Ok(*self.state.chain.lock())
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), BridgeError> {
        self.record("switch_chain");
        if let Some(response) = self.state.switch_responses.lock().pop_front() {
            response?;
        } else if !self.state.known_chains.lock().contains(&chain_id) {
            return Err(BridgeError::UnknownChain { chain_id });
        }
        *self.state.chain.lock() = chain_id;
        self.emit(WalletEvent::ChainChanged(chain_id));
        Ok(())
    }

    async fn add_chain(&self, descriptor: &NetworkDescriptor) -> Result<(), BridgeError> {
        self.record("add_chain");
        if let Some(response) = self.state.add_responses.lock().pop_front() {
            response?;
        }
        self.state.known_chains.lock().insert(descriptor.chain_id);
        Ok(())
    }

    async fn balance(&self, address: &Address) -> Result<U256, BridgeError> {
        self.record("balance");
        Ok(self
            .state
            .balances
            .lock()
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn send_transaction(
        &self,
        from: &Address,
        call: &ContractCall,
    ) -> Result<TxHash, BridgeError> {
        self.record("send_transaction");
        if !self.state.authorized.lock().contains(from) {
            return Err(BridgeError::rejected(format!(
                "account {} is not authorized",
                from.masked()
            )));
        }
        let scripted = self.state.send_responses.lock().pop_front();
        let hash = match scripted {
            Some(response) => response?,
            None => self.next_hash(),
        };
        self.state.sent.lock().push(call.clone());
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<TxReceipt, BridgeError> {
        self.record("wait_for_receipt");
        let mut paused = self.state.receipts_paused.subscribe();
        if paused.wait_for(|paused| !*paused).await.is_err() {
            return Err(BridgeError::Transport("mock receipt gate closed".into()));
        }
        let scripted = self.state.receipt_responses.lock().pop_front();
        let status = match scripted {
            Some(response) => response?,
            None => ReceiptStatus::Success,
        };
        Ok(TxReceipt::new(*hash, Some(1), status))
    }

    fn subscribe(&self, sink: WalletEventSink) -> Result<SubscriptionId, BridgeError> {
        self.record("subscribe");
        let id = SubscriptionId(self.state.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.state.sinks.lock().push((id, sink));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.record("unsubscribe");
        self.state.sinks.lock().retain(|(existing, _)| *existing != id);
    }
}
