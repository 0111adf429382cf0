use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::client::{IndexerError, PollIndexer, PollPage};

type Scripted = (Result<PollPage, IndexerError>, Option<oneshot::Receiver<()>>);

/// Canned indexer.
///
/// Queued responses are served in order; once the queue is empty every fetch
/// returns the fallback page.
#[derive(Clone, Default)]
pub struct StubIndexer {
    responses: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Arc<Mutex<PollPage>>,
    fetches: Arc<AtomicUsize>,
    requested: Arc<Mutex<Vec<u32>>>,
}

impl StubIndexer {
    pub fn new(fallback: PollPage) -> Self {
        let stub = Self::default();
        *stub.fallback.lock() = fallback;
        stub
    }

    pub fn set_fallback(&self, page: PollPage) {
        *self.fallback.lock() = page;
    }

    pub fn push_page(&self, page: PollPage) {
        self.responses.lock().push_back((Ok(page), None));
    }

    pub fn push_error(&self, error: IndexerError) {
        self.responses.lock().push_back((Err(error), None));
    }

    /// Queues a page that is only delivered once the returned sender fires
    /// (or is dropped).
    pub fn push_gated_page(&self, page: PollPage) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.responses.lock().push_back((Ok(page), Some(gate)));
        release
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// `first` argument of every fetch, in call order.
    pub fn requested_sizes(&self) -> Vec<u32> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl PollIndexer for StubIndexer {
    async fn fetch_page(&self, first: u32) -> Result<PollPage, IndexerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(first);
        let scripted = self.responses.lock().pop_front();
        match scripted {
            Some((response, gate)) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                response
            }
            None => Ok(self.fallback.lock().clone()),
        }
    }
}
