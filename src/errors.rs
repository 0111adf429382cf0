use thiserror::Error;

use crate::bridge::BridgeError;
use crate::revert::{describe_revert, RevertKind};
use crate::types::{ChainId, PollId};
use crate::workflow::ActionKey;

pub type ClientResult<T> = Result<T, ClientError>;

/// Failures surfaced to whoever drives the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("no compatible wallet is available")]
    WalletUnavailable,
    #[error("the request was rejected in the wallet")]
    UserRejected,
    #[error("wallet is on chain {}, expected {expected}", display_chain(.actual))]
    NetworkMismatch {
        expected: ChainId,
        actual: Option<ChainId>,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("this address has already voted on poll {poll_id}")]
    AlreadyVoted { poll_id: PollId },
    #[error("transaction reverted: {message}")]
    TransactionReverted { message: String, friendly: String },
    #[error("failed to fetch polls: {0}")]
    FetchFailed(String),
    #[error("wallet is not connected")]
    NotConnected,
    #[error("a {action} submission is already in flight")]
    SubmissionInFlight { action: ActionKey },
    #[error("wallet change notifications are already subscribed")]
    SubscriptionActive,
    #[error(transparent)]
    Bridge(BridgeError),
}

fn display_chain(chain: &Option<ChainId>) -> String {
    chain
        .map(|chain| chain.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl ClientError {
    pub fn reverted(message: &str) -> Self {
        let hint = describe_revert(message);
        ClientError::TransactionReverted {
            message: hint.technical,
            friendly: hint.friendly,
        }
    }

    /// Whether repeating the same action unchanged may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::UserRejected
            | ClientError::NetworkMismatch { .. }
            | ClientError::FetchFailed(_)
            | ClientError::NotConnected
            | ClientError::SubmissionInFlight { .. } => true,
            ClientError::Bridge(err) => matches!(
                err,
                BridgeError::Transport(_) | BridgeError::Rpc { .. } | BridgeError::Rejected { .. }
            ),
            ClientError::WalletUnavailable
            | ClientError::InvalidInput(_)
            | ClientError::AlreadyVoted { .. }
            | ClientError::TransactionReverted { .. }
            | ClientError::SubscriptionActive => false,
        }
    }

    /// One-line text suitable for a status bar or toast.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::WalletUnavailable => {
                "No wallet detected. Install or unlock a compatible wallet.".to_string()
            }
            ClientError::UserRejected => "Request cancelled in your wallet.".to_string(),
            ClientError::NetworkMismatch { expected, .. } => {
                format!("Please switch your wallet to chain {expected} to continue.")
            }
            ClientError::InvalidInput(reason) => reason.clone(),
            ClientError::AlreadyVoted { .. } => "You have already voted on this poll.".to_string(),
            ClientError::TransactionReverted { friendly, .. } => friendly.clone(),
            ClientError::FetchFailed(_) => {
                "Could not load polls. Check your connection and retry.".to_string()
            }
            ClientError::NotConnected => "Connect your wallet first.".to_string(),
            ClientError::SubmissionInFlight { .. } => {
                "A transaction for this action is already pending.".to_string()
            }
            ClientError::SubscriptionActive => {
                "Wallet notifications are already being handled.".to_string()
            }
            ClientError::Bridge(err) => format!("Wallet error: {err}"),
        }
    }
}

impl From<BridgeError> for ClientError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Rejected { .. } => ClientError::UserRejected,
            BridgeError::Reverted(message) => ClientError::reverted(&message),
            // Nodes report some contract-level refusals (e.g. insufficient
            // funds) as plain RPC errors without revert text.
            BridgeError::Rpc { code, message } => {
                let hint = describe_revert(&message);
                if hint.kind == RevertKind::Other {
                    ClientError::Bridge(BridgeError::Rpc { code, message })
                } else {
                    ClientError::TransactionReverted {
                        message: hint.technical,
                        friendly: hint.friendly,
                    }
                }
            }
            other => ClientError::Bridge(other),
        }
    }
}
