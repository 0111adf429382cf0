use std::fmt;

use thiserror::Error;

use crate::bridge::TxReceipt;
use crate::errors::ClientError;
use crate::types::{PollId, TxHash};

/// Concurrency slot for submissions; at most one attempt per key is in flight.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActionKey {
    CreatePoll,
    Vote(PollId),
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKey::CreatePoll => f.write_str("create-poll"),
            ActionKey::Vote(poll_id) => write!(f, "vote:{poll_id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionPhase {
    Idle,
    Validating,
    AwaitingWalletConfirmation,
    Submitted { tx_hash: TxHash },
    Confirmed { tx_hash: TxHash },
    Failed { error: ClientError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionEvent {
    Begin,
    Validated,
    Dispatched { tx_hash: TxHash },
    Mined(TxReceipt),
    Failed(ClientError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("no transition from {from} on {event}")]
pub struct TransitionError {
    pub from: &'static str,
    pub event: &'static str,
}

impl SubmissionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SubmissionPhase::Idle => "idle",
            SubmissionPhase::Validating => "validating",
            SubmissionPhase::AwaitingWalletConfirmation => "awaiting_wallet_confirmation",
            SubmissionPhase::Submitted { .. } => "submitted",
            SubmissionPhase::Confirmed { .. } => "confirmed",
            SubmissionPhase::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionPhase::Confirmed { .. } | SubmissionPhase::Failed { .. }
        )
    }

    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            SubmissionPhase::Submitted { tx_hash } | SubmissionPhase::Confirmed { tx_hash } => {
                Some(tx_hash)
            }
            _ => None,
        }
    }

    pub fn advance(&self, event: SubmissionEvent) -> Result<SubmissionPhase, TransitionError> {
        let invalid = |event: &SubmissionEvent| TransitionError {
            from: self.name(),
            event: event.name(),
        };
        match (self, event) {
            (SubmissionPhase::Idle, SubmissionEvent::Begin) => Ok(SubmissionPhase::Validating),
            (SubmissionPhase::Validating, SubmissionEvent::Validated) => {
                Ok(SubmissionPhase::AwaitingWalletConfirmation)
            }
            (SubmissionPhase::AwaitingWalletConfirmation, SubmissionEvent::Dispatched { tx_hash }) => {
                Ok(SubmissionPhase::Submitted { tx_hash })
            }
            (SubmissionPhase::Submitted { tx_hash }, SubmissionEvent::Mined(receipt)) => {
                if &receipt.tx_hash != tx_hash {
                    return Err(invalid(&SubmissionEvent::Mined(receipt)));
                }
                if receipt.succeeded() {
                    Ok(SubmissionPhase::Confirmed {
                        tx_hash: receipt.tx_hash,
                    })
                } else {
                    Ok(SubmissionPhase::Failed {
                        error: ClientError::reverted("transaction reverted on chain"),
                    })
                }
            }
            (
                SubmissionPhase::Validating
                | SubmissionPhase::AwaitingWalletConfirmation
                | SubmissionPhase::Submitted { .. },
                SubmissionEvent::Failed(error),
            ) => Ok(SubmissionPhase::Failed { error }),
            (_, event) => Err(invalid(&event)),
        }
    }
}

impl fmt::Display for SubmissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl SubmissionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SubmissionEvent::Begin => "begin",
            SubmissionEvent::Validated => "validated",
            SubmissionEvent::Dispatched { .. } => "dispatched",
            SubmissionEvent::Mined(_) => "mined",
            SubmissionEvent::Failed(_) => "failed",
        }
    }
}
