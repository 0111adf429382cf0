use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::draft::{PollDraft, ValidatedPoll};
use super::machine::{ActionKey, SubmissionEvent, SubmissionPhase};
use crate::bridge::{ContractCall, TxReceipt, WalletBridge};
use crate::cache::PollCache;
use crate::config::WorkflowConfig;
use crate::errors::{ClientError, ClientResult};
use crate::network::NetworkGuard;
use crate::revert::{describe_revert, RevertKind};
use crate::session::WalletSessionManager;
use crate::types::{Address, PollId, TxHash};

const UPDATE_CHANNEL_CAPACITY: usize = 64;
/// Settled entries beyond this are dropped oldest first.
const MAX_PENDING_HISTORY: usize = 64;

/// Phase change published for every submission attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionUpdate {
    pub action: ActionKey,
    pub phase: SubmissionPhase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Create,
    Vote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingStatus {
    Submitted,
    Confirmed,
    Failed,
}

/// Transaction handed to the wallet during this process lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTransaction {
    pub id: u64,
    pub kind: TransactionKind,
    pub action: ActionKey,
    pub submitted_at: SystemTime,
    pub transaction_hash: Option<TxHash>,
    pub status: PendingStatus,
}

/// Outcome of a confirmed submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionReport {
    pub action: ActionKey,
    pub poll_id: PollId,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub explorer_url: Option<String>,
    /// `(poll_id, option)` for votes.
    pub vote: Option<(PollId, String)>,
    /// Set when the post-create refresh failed; the submission itself succeeded.
    pub refresh_error: Option<ClientError>,
    /// Every phase entered, in order.
    pub history: Vec<SubmissionPhase>,
}

/// Sends poll creations and votes through the wallet and reflects the
/// outcome in the cache.
#[derive(Clone)]
pub struct SubmissionWorkflow {
    session: Arc<WalletSessionManager>,
    network: NetworkGuard,
    cache: Arc<PollCache>,
    config: WorkflowConfig,
    in_flight: Arc<Mutex<HashSet<ActionKey>>>,
    pending: Arc<Mutex<Vec<PendingTransaction>>>,
    next_pending: Arc<AtomicU64>,
    updates: broadcast::Sender<SubmissionUpdate>,
}

impl SubmissionWorkflow {
    pub fn new(
        session: Arc<WalletSessionManager>,
        cache: Arc<PollCache>,
        config: WorkflowConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            network: NetworkGuard::new(Arc::clone(&session)),
            session,
            cache,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pending: Arc::new(Mutex::new(Vec::new())),
            next_pending: Arc::new(AtomicU64::new(1)),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionUpdate> {
        self.updates.subscribe()
    }

    pub fn pending_transactions(&self) -> Vec<PendingTransaction> {
        self.pending.lock().clone()
    }

    pub fn is_in_flight(&self, action: &ActionKey) -> bool {
        self.in_flight.lock().contains(action)
    }

    /// Creates the drafted poll. The draft is cleared once the poll is confirmed.
    pub async fn create_poll(&self, draft: &mut PollDraft) -> ClientResult<SubmissionReport> {
        let action = ActionKey::CreatePoll;
        let _slot = self.acquire(&action)?;
        let mut attempt = Attempt::begin(action, &self.updates);

        let (bridge, address, poll) = match self.validate_create(draft).await {
            Ok(validated) => validated,
            Err(err) => return Err(attempt.fail(err)),
        };
        let poll_id = PollId::generate();
        let call = ContractCall::CreatePoll {
            poll_id: poll_id.clone(),
            question: poll.question,
            options: poll.options,
        };
        let receipt = self
            .dispatch(&mut attempt, bridge.as_ref(), &address, &call, TransactionKind::Create)
            .await?;

        draft.reset();
        let refresh_error = if self.config.refresh_after_create {
            match self.cache.refresh().await {
                Ok(_) => None,
                Err(err) => {
                    warn!(poll_id = %poll_id, error = %err, "refresh after poll creation failed");
                    Some(err)
                }
            }
        } else {
            None
        };
        info!(poll_id = %poll_id, tx_hash = %receipt.tx_hash, "poll created");
        Ok(self.report(attempt, poll_id, receipt, None, refresh_error))
    }

    pub async fn vote(&self, poll_id: &PollId, option: &str) -> ClientResult<SubmissionReport> {
        let action = ActionKey::Vote(poll_id.clone());
        let _slot = self.acquire(&action)?;
        let mut attempt = Attempt::begin(action, &self.updates);

        let (bridge, address, option) = match self.validate_vote(poll_id, option).await {
            Ok(validated) => validated,
            Err(err) => return Err(attempt.fail(err)),
        };
        let call = ContractCall::Vote {
            poll_id: poll_id.clone(),
            option: option.clone(),
        };
        let receipt = match self
            .dispatch(&mut attempt, bridge.as_ref(), &address, &call, TransactionKind::Vote)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                if let ClientError::TransactionReverted { message, .. } = &err {
                    if describe_revert(message).kind == RevertKind::AlreadyVoted {
                        self.cache.record_local_vote(poll_id, &address, &option);
                    }
                }
                return Err(err);
            }
        };

        self.cache.apply_optimistic_vote(poll_id, &option);
        self.cache.record_local_vote(poll_id, &address, &option);
        info!(
            poll_id = %poll_id,
            option = %option,
            tx_hash = %receipt.tx_hash,
            "vote confirmed"
        );
        let vote = Some((poll_id.clone(), option));
        Ok(self.report(attempt, poll_id.clone(), receipt, vote, None))
    }

    async fn validate_create(
        &self,
        draft: &PollDraft,
    ) -> ClientResult<(Arc<dyn WalletBridge>, Address, ValidatedPoll)> {
        let poll = draft.validate()?;
        let (bridge, address) = self.connected_wallet()?;
        self.network.ensure_network().await?;
        Ok((bridge, address, poll))
    }

    async fn validate_vote(
        &self,
        poll_id: &PollId,
        option: &str,
    ) -> ClientResult<(Arc<dyn WalletBridge>, Address, String)> {
        let option = option.trim();
        if option.is_empty() {
            return Err(ClientError::InvalidInput("select an option to vote".into()));
        }
        if let Some(poll) = self.cache.poll(poll_id) {
            if poll.option_index(option).is_none() {
                return Err(ClientError::InvalidInput(format!(
                    "`{option}` is not an option of poll {poll_id}"
                )));
            }
        }
        let (bridge, address) = self.connected_wallet()?;
        if self.cache.has_voted(poll_id, &address) {
            return Err(ClientError::AlreadyVoted {
                poll_id: poll_id.clone(),
            });
        }
        self.network.ensure_network().await?;
        Ok((bridge, address, option.to_string()))
    }

    fn connected_wallet(&self) -> ClientResult<(Arc<dyn WalletBridge>, Address)> {
        let bridge = self
            .session
            .bridge()
            .cloned()
            .ok_or(ClientError::WalletUnavailable)?;
        let address = self
            .session
            .snapshot()
            .address
            .ok_or(ClientError::NotConnected)?;
        Ok((bridge, address))
    }

    async fn dispatch(
        &self,
        attempt: &mut Attempt<'_>,
        bridge: &dyn WalletBridge,
        from: &Address,
        call: &ContractCall,
        kind: TransactionKind,
    ) -> ClientResult<TxReceipt> {
        attempt.step(SubmissionEvent::Validated);
        let entry = self.track(kind, attempt.action.clone());

        let tx_hash = match bridge.send_transaction(from, call).await {
            Ok(hash) => hash,
            Err(err) => {
                entry.finish(PendingStatus::Failed);
                return Err(attempt.fail(err.into()));
            }
        };
        entry.submitted(&tx_hash);
        debug!(method = call.method(), tx_hash = %tx_hash, "transaction submitted");
        attempt.step(SubmissionEvent::Dispatched { tx_hash });

        let receipt = match bridge.wait_for_receipt(&tx_hash).await {
            Ok(receipt) => receipt,
            Err(err) => {
                entry.finish(PendingStatus::Failed);
                return Err(attempt.fail(err.into()));
            }
        };
        attempt.step(SubmissionEvent::Mined(receipt.clone()));
        match &attempt.phase {
            SubmissionPhase::Confirmed { .. } => {
                entry.finish(PendingStatus::Confirmed);
                Ok(receipt)
            }
            SubmissionPhase::Failed { error } => {
                let error = error.clone();
                warn!(
                    action = %attempt.action,
                    tx_hash = %tx_hash,
                    error = %error,
                    "transaction failed on chain"
                );
                entry.finish(PendingStatus::Failed);
                Err(error)
            }
            other => {
                let error = ClientError::Bridge(crate::bridge::BridgeError::Malformed(format!(
                    "receipt left submission in {other}"
                )));
                entry.finish(PendingStatus::Failed);
                Err(attempt.fail(error))
            }
        }
    }

    fn acquire(&self, action: &ActionKey) -> ClientResult<InFlightSlot> {
        if !self.in_flight.lock().insert(action.clone()) {
            debug!(action = %action, "submission already in flight");
            return Err(ClientError::SubmissionInFlight {
                action: action.clone(),
            });
        }
        Ok(InFlightSlot {
            in_flight: Arc::clone(&self.in_flight),
            action: action.clone(),
        })
    }

    fn track(&self, kind: TransactionKind, action: ActionKey) -> PendingEntry {
        let id = self.next_pending.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock();
        let mut settled = pending
            .iter()
            .filter(|entry| entry.status != PendingStatus::Submitted)
            .count();
        while settled >= MAX_PENDING_HISTORY {
            match pending
                .iter()
                .position(|entry| entry.status != PendingStatus::Submitted)
            {
                Some(oldest) => {
                    pending.remove(oldest);
                    settled -= 1;
                }
                None => break,
            }
        }
        pending.push(PendingTransaction {
            id,
            kind,
            action,
            submitted_at: SystemTime::now(),
            transaction_hash: None,
            status: PendingStatus::Submitted,
        });
        PendingEntry {
            pending: Arc::clone(&self.pending),
            id,
            finished: false,
        }
    }

    fn report(
        &self,
        attempt: Attempt<'_>,
        poll_id: PollId,
        receipt: TxReceipt,
        vote: Option<(PollId, String)>,
        refresh_error: Option<ClientError>,
    ) -> SubmissionReport {
        SubmissionReport {
            action: attempt.action,
            poll_id,
            explorer_url: self.session.network().explorer_tx_url(&receipt.tx_hash),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            vote,
            refresh_error,
            history: attempt.history,
        }
    }
}

/// Frees the action slot when the attempt ends or its future is dropped.
struct InFlightSlot {
    in_flight: Arc<Mutex<HashSet<ActionKey>>>,
    action: ActionKey,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.action);
    }
}

/// Ledger entry of one dispatch. An entry dropped before it is finished (the
/// submission future was abandoned) is recorded as failed.
struct PendingEntry {
    pending: Arc<Mutex<Vec<PendingTransaction>>>,
    id: u64,
    finished: bool,
}

impl PendingEntry {
    fn submitted(&self, hash: &TxHash) {
        self.update(|entry| entry.transaction_hash = Some(*hash));
    }

    fn finish(mut self, status: PendingStatus) {
        self.finished = true;
        self.update(|entry| entry.status = status);
    }

    fn update(&self, apply: impl FnOnce(&mut PendingTransaction)) {
        if let Some(entry) = self
            .pending
            .lock()
            .iter_mut()
            .find(|entry| entry.id == self.id)
        {
            apply(entry);
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        if !self.finished {
            debug!(pending_id = self.id, "submission abandoned before settling");
            self.update(|entry| entry.status = PendingStatus::Failed);
        }
    }
}

struct Attempt<'a> {
    action: ActionKey,
    phase: SubmissionPhase,
    history: Vec<SubmissionPhase>,
    updates: &'a broadcast::Sender<SubmissionUpdate>,
}

impl<'a> Attempt<'a> {
    fn begin(action: ActionKey, updates: &'a broadcast::Sender<SubmissionUpdate>) -> Self {
        let mut attempt = Self {
            action,
            phase: SubmissionPhase::Idle,
            history: Vec::new(),
            updates,
        };
        attempt.step(SubmissionEvent::Begin);
        attempt
    }

    fn step(&mut self, event: SubmissionEvent) {
        match self.phase.advance(event) {
            Ok(next) => {
                debug!(action = %self.action, phase = next.name(), "submission phase");
                self.phase = next.clone();
                self.history.push(next.clone());
                // No receivers is fine.
                let _ = self.updates.send(SubmissionUpdate {
                    action: self.action.clone(),
                    phase: next,
                });
            }
            Err(err) => warn!(action = %self.action, error = %err, "ignoring submission event"),
        }
    }

    fn fail(&mut self, error: ClientError) -> ClientError {
        warn!(action = %self.action, error = %error, "submission failed");
        self.step(SubmissionEvent::Failed(error.clone()));
        error
    }
}
