//! Last fetched poll snapshot with optimistic local patches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{ClientError, ClientResult};
use crate::indexer::{Poll, PollIndexer, VoteRecord};
use crate::types::{Address, PollId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollSnapshot {
    pub polls: Vec<Poll>,
    pub votes: Vec<VoteRecord>,
    /// Bumped by every refresh and local patch.
    pub version: u64,
    /// Whether any refresh has completed successfully.
    pub loaded: bool,
}

impl PollSnapshot {
    pub fn poll(&self, poll_id: &PollId) -> Option<&Poll> {
        self.polls.iter().find(|poll| &poll.id == poll_id)
    }

    pub fn has_voted(&self, poll_id: &PollId, voter: &Address) -> bool {
        self.votes
            .iter()
            .any(|vote| &vote.poll_id == poll_id && &vote.voter == voter)
    }
}

#[derive(Default)]
struct CacheState {
    snapshot: PollSnapshot,
    last_error: Option<String>,
    local_votes: u64,
}

pub struct PollCache {
    indexer: Arc<dyn PollIndexer>,
    page_size: u32,
    state: Mutex<CacheState>,
    closed: AtomicBool,
}

impl PollCache {
    pub fn new(indexer: Arc<dyn PollIndexer>, page_size: u32) -> Self {
        Self {
            indexer,
            page_size,
            state: Mutex::new(CacheState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Replaces the snapshot with a fresh page.
    ///
    /// The snapshot is overwritten whenever a fetch completes, so overlapping
    /// refreshes settle on whichever finished last. A failed fetch keeps the
    /// previous snapshot.
    pub async fn refresh(&self) -> ClientResult<PollSnapshot> {
        let result = self.indexer.fetch_page(self.page_size).await;
        if self.closed.load(Ordering::SeqCst) {
            debug!("discarding poll refresh after cache close");
            return Ok(self.snapshot());
        }
        let mut state = self.state.lock();
        match result {
            Ok(page) => {
                let version = state.snapshot.version + 1;
                state.snapshot = PollSnapshot {
                    polls: page.polls,
                    votes: page.votes,
                    version,
                    loaded: true,
                };
                state.last_error = None;
                debug!(
                    version,
                    polls = state.snapshot.polls.len(),
                    "poll cache refreshed"
                );
                Ok(state.snapshot.clone())
            }
            Err(err) => {
                warn!(error = %err, "poll refresh failed; keeping previous snapshot");
                let reason = err.to_string();
                state.last_error = Some(reason.clone());
                Err(ClientError::FetchFailed(reason))
            }
        }
    }

    /// Bumps the count for `option` locally. Returns `false` when the poll or
    /// option is not cached, or the poll carries no tally for that option.
    pub fn apply_optimistic_vote(&self, poll_id: &PollId, option: &str) -> bool {
        let mut state = self.state.lock();
        let Some(poll) = state
            .snapshot
            .polls
            .iter_mut()
            .find(|poll| &poll.id == poll_id)
        else {
            return false;
        };
        let Some(index) = poll.option_index(option) else {
            return false;
        };
        let Some(count) = poll.votes.get_mut(index) else {
            return false;
        };
        *count += 1;
        state.snapshot.version += 1;
        true
    }

    /// Records a vote row so `has_voted` reflects it before the indexer does.
    pub fn record_local_vote(&self, poll_id: &PollId, voter: &Address, option: &str) {
        let mut state = self.state.lock();
        if state.snapshot.has_voted(poll_id, voter) {
            return;
        }
        state.local_votes += 1;
        let id = format!("local-{}", state.local_votes);
        state
            .snapshot
            .votes
            .push(VoteRecord::new(id, poll_id.clone(), voter.clone(), option));
        state.snapshot.version += 1;
    }

    pub fn has_voted(&self, poll_id: &PollId, voter: &Address) -> bool {
        self.state.lock().snapshot.has_voted(poll_id, voter)
    }

    pub fn poll(&self, poll_id: &PollId) -> Option<Poll> {
        self.state.lock().snapshot.poll(poll_id).cloned()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.lock().snapshot.version
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{IndexerError, PollPage, StubIndexer};

    fn voter(raw: &str) -> Address {
        Address::parse(raw).expect("address")
    }

    fn page() -> PollPage {
        let poll = Poll::new(
            PollId::new("p1"),
            "Pizza or tacos?",
            vec!["Yes".into(), "No".into()],
        )
        .with_votes(vec![3, 5]);
        let vote = VoteRecord::new(
            "v1",
            PollId::new("p1"),
            voter("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd"),
            "No",
        );
        PollPage::new(vec![poll], vec![vote])
    }

    async fn loaded_cache() -> (PollCache, StubIndexer) {
        let stub = StubIndexer::new(page());
        let cache = PollCache::new(Arc::new(stub.clone()), 5);
        cache.refresh().await.expect("refresh");
        (cache, stub)
    }

    #[tokio::test]
    async fn optimistic_vote_increments_matching_option() {
        let (cache, _) = loaded_cache().await;
        let before = cache.version();
        assert!(cache.apply_optimistic_vote(&PollId::new("p1"), "Yes"));
        assert_eq!(cache.poll(&PollId::new("p1")).unwrap().votes, vec![4, 5]);
        assert_eq!(cache.version(), before + 1);
    }

    #[tokio::test]
    async fn optimistic_vote_on_unknown_option_or_poll_is_noop() {
        let (cache, _) = loaded_cache().await;
        let before = cache.snapshot();
        assert!(!cache.apply_optimistic_vote(&PollId::new("p1"), "Maybe"));
        assert!(!cache.apply_optimistic_vote(&PollId::new("p9"), "Yes"));
        assert_eq!(cache.snapshot(), before);
    }

    #[tokio::test]
    async fn short_tally_row_is_not_patched() {
        let poll = Poll::new(PollId::new("p1"), "Ship it?", vec!["Yes".into(), "No".into()])
            .with_votes(vec![1]);
        let stub = StubIndexer::new(PollPage::new(vec![poll], Vec::new()));
        let cache = PollCache::new(Arc::new(stub), 5);
        cache.refresh().await.expect("refresh");
        let before = cache.snapshot();

        assert!(!cache.apply_optimistic_vote(&PollId::new("p1"), "No"));
        assert_eq!(cache.snapshot(), before);
        assert!(cache.apply_optimistic_vote(&PollId::new("p1"), "Yes"));
        assert_eq!(cache.snapshot().polls[0].votes, vec![2]);
    }

    #[tokio::test]
    async fn has_voted_ignores_address_case() {
        let (cache, _) = loaded_cache().await;
        let upper = voter("0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD");
        assert!(cache.has_voted(&PollId::new("p1"), &upper));
        assert!(!cache.has_voted(&PollId::new("p2"), &upper));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_snapshot() {
        let (cache, stub) = loaded_cache().await;
        let before = cache.snapshot();
        stub.push_error(IndexerError::Status(502));
        assert!(matches!(
            cache.refresh().await,
            Err(ClientError::FetchFailed(_))
        ));
        assert_eq!(cache.snapshot(), before);
        assert!(cache.last_error().is_some());

        cache.refresh().await.expect("retry");
        assert!(cache.last_error().is_none());
    }

    #[tokio::test]
    async fn refresh_supersedes_local_patches() {
        let (cache, _) = loaded_cache().await;
        let me = voter("0x1111111111111111111111111111111111111111");
        cache.apply_optimistic_vote(&PollId::new("p1"), "Yes");
        cache.record_local_vote(&PollId::new("p1"), &me, "Yes");
        assert!(cache.has_voted(&PollId::new("p1"), &me));

        cache.refresh().await.expect("refresh");
        assert_eq!(cache.poll(&PollId::new("p1")).unwrap().votes, vec![3, 5]);
        assert!(!cache.has_voted(&PollId::new("p1"), &me));
    }

    #[tokio::test]
    async fn closed_cache_discards_refresh_results() {
        let stub = StubIndexer::new(page());
        let cache = PollCache::new(Arc::new(stub), 5);
        cache.close();
        let snapshot = cache.refresh().await.expect("refresh resolves");
        assert!(!snapshot.loaded);
        assert!(snapshot.polls.is_empty());
    }
}
