use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::session::Session;
use crate::types::{Address, ChainId, PollId, TxHash};

/// Native currency advertised when teaching the wallet about a network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Everything the wallet needs to add the required network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkDescriptor {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl NetworkDescriptor {
    /// Explorer page for a transaction, when an explorer is configured.
    pub fn explorer_tx_url(&self, hash: &TxHash) -> Option<String> {
        self.block_explorer_urls
            .first()
            .map(|base| format!("{}/tx/{hash}", base.trim_end_matches('/')))
    }
}

impl Default for NetworkDescriptor {
    fn default() -> Self {
        Self {
            chain_id: ChainId(12_227_332),
            chain_name: "NeoX T4 Testnet".to_string(),
            native_currency: NativeCurrency {
                name: "GAS".to_string(),
                symbol: "GAS".to_string(),
                decimals: 18,
            },
            rpc_urls: vec!["https://neoxt4seed1.ngd.network".to_string()],
            block_explorer_urls: vec!["https://xt4scan.ngd.network/".to_string()],
        }
    }
}

/// State-changing entry points of the poll contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    CreatePoll {
        poll_id: PollId,
        question: String,
        options: Vec<String>,
    },
    Vote {
        poll_id: PollId,
        option: String,
    },
}

impl ContractCall {
    pub fn method(&self) -> &'static str {
        match self {
            ContractCall::CreatePoll { .. } => "createPoll",
            ContractCall::Vote { .. } => "vote",
        }
    }

    pub fn poll_id(&self) -> &PollId {
        match self {
            ContractCall::CreatePoll { poll_id, .. } | ContractCall::Vote { poll_id, .. } => {
                poll_id
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Mined transaction outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub status: ReceiptStatus,
}

impl TxReceipt {
    pub fn new(tx_hash: TxHash, block_number: Option<u64>, status: ReceiptStatus) -> Self {
        Self {
            tx_hash,
            block_number,
            status,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Change notification pushed by the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
}

/// Wallet event tagged with the session generation current when it was emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StampedWalletEvent {
    pub generation: u64,
    pub event: WalletEvent,
}

/// Handler side of a change subscription, handed to [`WalletBridge::subscribe`].
///
/// Events are stamped at emission time so the session can drop the ones that
/// were issued before an explicit disconnect. Bridges that have to discover
/// changes by polling compare against [`last_known`](Self::last_known).
#[derive(Clone, Debug)]
pub struct WalletEventSink {
    sender: mpsc::UnboundedSender<StampedWalletEvent>,
    generation: Arc<AtomicU64>,
    known: watch::Receiver<Session>,
}

impl WalletEventSink {
    pub fn new(
        sender: mpsc::UnboundedSender<StampedWalletEvent>,
        generation: Arc<AtomicU64>,
        known: watch::Receiver<Session>,
    ) -> Self {
        Self {
            sender,
            generation,
            known,
        }
    }

    /// Session state as last published by the listening side.
    pub fn last_known(&self) -> Session {
        self.known.borrow().clone()
    }

    /// Returns `false` once the listening side has been torn down.
    pub fn emit(&self, event: WalletEvent) -> bool {
        let stamped = StampedWalletEvent {
            generation: self.generation.load(Ordering::SeqCst),
            event,
        };
        self.sender.send(stamped).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Errors surfaced by wallet bridge implementations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("wallet request rejected: {reason}")]
    Rejected { reason: String },
    #[error("chain {chain_id} is not known to the wallet")]
    UnknownChain { chain_id: ChainId },
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("wallet RPC error [{code}]: {message}")]
    Rpc { code: i64, message: String },
    #[error("wallet transport error: {0}")]
    Transport(String),
    #[error("wallet returned malformed data: {0}")]
    Malformed(String),
    #[error("wallet operation unsupported: {0}")]
    Unsupported(String),
}

impl BridgeError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.is_empty() {
            "rejected by user".to_string()
        } else {
            reason
        };
        Self::Rejected { reason }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, BridgeError::Rejected { .. })
    }
}

/// Browser-wallet capabilities consumed by the client.
#[async_trait]
pub trait WalletBridge: Send + Sync {
    /// Prompts the user to authorize accounts.
    async fn request_accounts(&self) -> Result<Vec<Address>, BridgeError>;
    /// Accounts already authorized for this client, without prompting.
    async fn list_accounts(&self) -> Result<Vec<Address>, BridgeError>;
    async fn chain_id(&self) -> Result<ChainId, BridgeError>;
    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), BridgeError>;
    async fn add_chain(&self, descriptor: &NetworkDescriptor) -> Result<(), BridgeError>;
    /// Native balance in base units.
    async fn balance(&self, address: &Address) -> Result<U256, BridgeError>;
    /// Suspends until the user approves or rejects the call in the wallet.
    async fn send_transaction(
        &self,
        from: &Address,
        call: &ContractCall,
    ) -> Result<TxHash, BridgeError>;
    /// Suspends until the transaction is mined.
    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<TxReceipt, BridgeError>;
    fn subscribe(&self, sink: WalletEventSink) -> Result<SubscriptionId, BridgeError>;
    /// Whether subscriptions deliver changes as they happen. Polling bridges
    /// return `false`, so their subscribers cannot treat the session as current.
    fn pushes_events(&self) -> bool {
        true
    }
    fn unsubscribe(&self, id: SubscriptionId);
}
