use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::WalletBridge;
use crate::cache::{PollCache, PollSnapshot};
use crate::config::ClientConfig;
use crate::errors::{ClientError, ClientResult};
use crate::indexer::PollIndexer;
use crate::link_store::LinkStore;
use crate::network::NetworkGuard;
use crate::session::{Session, SessionListenerHandle, WalletSessionManager};
use crate::types::PollId;
use crate::workflow::{PollDraft, SubmissionReport, SubmissionWorkflow};

/// Application context owning the session, the poll cache and the workflow.
pub struct PollClient {
    config: ClientConfig,
    session: Arc<WalletSessionManager>,
    cache: Arc<PollCache>,
    workflow: SubmissionWorkflow,
    listener: Mutex<Option<SessionListenerHandle>>,
}

impl PollClient {
    pub fn new(
        config: ClientConfig,
        bridge: Option<Arc<dyn WalletBridge>>,
        indexer: Arc<dyn PollIndexer>,
        links: Arc<dyn LinkStore>,
    ) -> Self {
        let session = Arc::new(WalletSessionManager::new(
            bridge,
            links,
            config.network.clone(),
        ));
        let cache = Arc::new(PollCache::new(indexer, config.indexer.page_size));
        let workflow = SubmissionWorkflow::new(
            Arc::clone(&session),
            Arc::clone(&cache),
            config.workflow.clone(),
        );
        Self {
            config,
            session,
            cache,
            workflow,
            listener: Mutex::new(None),
        }
    }

    /// Subscribes to wallet notifications, restores a linked wallet and loads
    /// the first page of polls. Must run inside a tokio runtime.
    pub async fn start(&self) -> Session {
        match self.session.attach() {
            Ok(listener) => {
                *self.listener.lock() = Some(listener.spawn());
            }
            Err(ClientError::WalletUnavailable) => debug!("starting without a wallet bridge"),
            Err(err) => warn!(error = %err, "wallet notifications unavailable"),
        }
        let session = self.session.initialize().await;
        if let Err(err) = self.cache.refresh().await {
            warn!(error = %err, "initial poll refresh failed");
        }
        info!(connected = session.is_connected(), "poll client started");
        session
    }

    /// Stops the notification listener and discards late results.
    pub async fn shutdown(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.shutdown().await;
        }
        self.session.close();
        self.cache.close();
        info!("poll client stopped");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<WalletSessionManager> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<PollCache> {
        &self.cache
    }

    pub fn workflow(&self) -> &SubmissionWorkflow {
        &self.workflow
    }

    pub fn network_guard(&self) -> NetworkGuard {
        NetworkGuard::new(Arc::clone(&self.session))
    }

    pub async fn connect(&self) -> ClientResult<Session> {
        self.session.connect().await
    }

    pub async fn refresh(&self) -> ClientResult<PollSnapshot> {
        self.cache.refresh().await
    }

    pub async fn create_poll(&self, draft: &mut PollDraft) -> ClientResult<SubmissionReport> {
        self.workflow.create_poll(draft).await
    }

    pub async fn vote(&self, poll_id: &PollId, option: &str) -> ClientResult<SubmissionReport> {
        self.workflow.vote(poll_id, option).await
    }
}
