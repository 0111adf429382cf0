//! Poll creation and voting.
//!
//! Each submission walks `Idle → Validating → AwaitingWalletConfirmation →
//! Submitted → Confirmed | Failed`. Transitions are computed by
//! [`SubmissionPhase::advance`] and every phase entered is published on the
//! workflow's broadcast channel.

pub mod draft;
pub mod machine;
pub mod submission;

pub use draft::{PollDraft, ValidatedPoll};
pub use machine::{ActionKey, SubmissionEvent, SubmissionPhase, TransitionError};
pub use submission::{
    PendingStatus, PendingTransaction, SubmissionReport, SubmissionUpdate, SubmissionWorkflow,
    TransactionKind,
};
