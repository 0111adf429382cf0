//! Wallet session tracking.
//!
//! The session mirrors the wallet's authorized account and active chain. It is
//! mutated by explicit user actions (`connect`, `disconnect`, `unlink`) and by
//! change notifications delivered through a [`SessionListener`]. Notifications
//! carry the session generation current at emission; an explicit disconnect
//! bumps the generation so anything emitted earlier is dropped on arrival.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{
    NetworkDescriptor, StampedWalletEvent, SubscriptionId, WalletBridge, WalletEvent,
    WalletEventSink,
};
use crate::errors::{ClientError, ClientResult};
use crate::link_store::{LinkStore, LinkStoreError};
use crate::types::{format_amount, Address, ChainId};

/// Snapshot of the wallet connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub address: Option<Address>,
    pub chain_id: Option<ChainId>,
}

/// Input to [`Session::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected {
        address: Address,
        chain_id: Option<ChainId>,
    },
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    Disconnected,
}

impl From<WalletEvent> for SessionEvent {
    fn from(event: WalletEvent) -> Self {
        match event {
            WalletEvent::AccountsChanged(accounts) => SessionEvent::AccountsChanged(accounts),
            WalletEvent::ChainChanged(chain) => SessionEvent::ChainChanged(chain),
        }
    }
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn apply(&self, event: SessionEvent) -> Session {
        match event {
            SessionEvent::Connected { address, chain_id } => Session {
                address: Some(address),
                chain_id: chain_id.or(self.chain_id),
            },
            SessionEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                Some(first) => Session {
                    address: Some(first),
                    chain_id: self.chain_id,
                },
                None => Session::default(),
            },
            SessionEvent::ChainChanged(chain) => Session {
                address: self.address.clone(),
                chain_id: Some(chain),
            },
            SessionEvent::Disconnected => Session::default(),
        }
    }
}

/// Address, chain and native balance of the connected wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletInfo {
    pub address: Address,
    pub chain_id: Option<ChainId>,
    /// Balance in base units.
    pub balance: U256,
    /// Balance rendered with the network's native decimals.
    pub formatted_balance: String,
    pub symbol: String,
}

pub struct WalletSessionManager {
    bridge: Option<Arc<dyn WalletBridge>>,
    links: Arc<dyn LinkStore>,
    network: NetworkDescriptor,
    state: Mutex<Session>,
    updates: watch::Sender<Session>,
    generation: Arc<AtomicU64>,
    attached: AtomicBool,
    closed: AtomicBool,
}

impl WalletSessionManager {
    pub fn new(
        bridge: Option<Arc<dyn WalletBridge>>,
        links: Arc<dyn LinkStore>,
        network: NetworkDescriptor,
    ) -> Self {
        let (updates, _) = watch::channel(Session::default());
        Self {
            bridge,
            links,
            network,
            state: Mutex::new(Session::default()),
            updates,
            generation: Arc::new(AtomicU64::new(0)),
            attached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn bridge(&self) -> Option<&Arc<dyn WalletBridge>> {
        self.bridge.as_ref()
    }

    pub fn network(&self) -> &NetworkDescriptor {
        &self.network
    }

    pub fn snapshot(&self) -> Session {
        self.state.lock().clone()
    }

    /// Receives every session change.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.updates.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Silently restores a previously linked wallet. Failures leave the session
    /// disconnected.
    pub async fn initialize(&self) -> Session {
        let Some(bridge) = self.bridge.clone() else {
            debug!("no wallet bridge present; staying disconnected");
            return self.snapshot();
        };
        match self.links.is_linked() {
            Ok(true) => {}
            Ok(false) => {
                debug!("wallet not linked; skipping reconnect");
                return self.snapshot();
            }
            Err(err) => {
                warn!(error = %err, "unable to read wallet link state");
                return self.snapshot();
            }
        }

        let generation = self.generation();
        let accounts = match bridge.list_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(error = %err, "failed to list authorized wallet accounts");
                return self.snapshot();
            }
        };
        let Some(address) = accounts.into_iter().next() else {
            debug!("linked wallet exposes no authorized accounts");
            return self.snapshot();
        };
        let chain_id = match bridge.chain_id().await {
            Ok(chain) => Some(chain),
            Err(err) => {
                warn!(error = %err, "failed to read wallet chain");
                None
            }
        };
        if !self.accepts_result(generation) {
            debug!("discarding late wallet restore");
            return self.snapshot();
        }
        info!(address = %address.masked(), chain_id = ?chain_id, "restored wallet session");
        self.transition(SessionEvent::Connected { address, chain_id })
    }

    /// Prompts the wallet for authorization and records the link.
    pub async fn connect(&self) -> ClientResult<Session> {
        let bridge = self.bridge.clone().ok_or(ClientError::WalletUnavailable)?;
        let generation = self.generation();
        let accounts = bridge.request_accounts().await.map_err(|err| {
            warn!(error = %err, "wallet authorization failed");
            ClientError::from(err)
        })?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or(ClientError::UserRejected)?;
        let chain_id = match bridge.chain_id().await {
            Ok(chain) => Some(chain),
            Err(err) => {
                warn!(error = %err, "failed to read wallet chain after connect");
                None
            }
        };
        if !self.accepts_result(generation) {
            debug!("discarding late wallet authorization");
            return Ok(self.snapshot());
        }
        if let Err(err) = self.links.set_linked() {
            warn!(error = %err, "unable to persist wallet link state");
        }
        info!(address = %address.masked(), chain_id = ?chain_id, "wallet connected");
        Ok(self.transition(SessionEvent::Connected { address, chain_id }))
    }

    pub fn on_accounts_changed(&self, accounts: Vec<Address>) -> Session {
        match accounts.first() {
            Some(first) => debug!(address = %first.masked(), "wallet accounts changed"),
            None => info!("wallet reported no accounts; disconnecting"),
        }
        self.transition(SessionEvent::AccountsChanged(accounts))
    }

    pub fn on_chain_changed(&self, chain_id: ChainId) -> Session {
        debug!(chain_id = %chain_id, "wallet chain changed");
        self.transition(SessionEvent::ChainChanged(chain_id))
    }

    pub(crate) fn record_chain(&self, chain_id: ChainId) {
        if self.snapshot().chain_id != Some(chain_id) {
            self.transition(SessionEvent::ChainChanged(chain_id));
        }
    }

    /// Forgets the session locally. The wallet keeps its authorization.
    pub fn disconnect(&self) -> Session {
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("wallet disconnected");
        self.transition(SessionEvent::Disconnected)
    }

    /// Disconnects and forgets that a wallet was ever linked.
    pub fn unlink(&self) -> Result<Session, LinkStoreError> {
        let session = self.disconnect();
        self.links.clear()?;
        info!("wallet unlinked");
        Ok(session)
    }

    pub async fn wallet_info(&self) -> ClientResult<WalletInfo> {
        let bridge = self.bridge.clone().ok_or(ClientError::WalletUnavailable)?;
        let session = self.snapshot();
        let address = session.address.ok_or(ClientError::NotConnected)?;
        let balance = bridge.balance(&address).await.map_err(|err| {
            warn!(address = %address.masked(), error = %err, "failed to read wallet balance");
            ClientError::from(err)
        })?;
        Ok(WalletInfo {
            formatted_balance: format_amount(balance, self.network.native_currency.decimals),
            symbol: self.network.native_currency.symbol.clone(),
            address,
            chain_id: session.chain_id,
            balance,
        })
    }

    /// Applies a delivered notification unless it predates the last disconnect.
    pub fn process(&self, stamped: StampedWalletEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        let current = self.generation();
        if stamped.generation != current {
            debug!(
                event_generation = stamped.generation,
                current_generation = current,
                "discarding stale wallet event"
            );
            return false;
        }
        match stamped.event {
            WalletEvent::AccountsChanged(accounts) => {
                self.on_accounts_changed(accounts);
            }
            WalletEvent::ChainChanged(chain) => {
                self.on_chain_changed(chain);
            }
        }
        true
    }

    /// Whether a listener currently receives wallet notifications.
    pub fn is_listening(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Subscribes to wallet change notifications. Only one listener may be
    /// attached at a time.
    pub fn attach(self: &Arc<Self>) -> ClientResult<SessionListener> {
        let bridge = self.bridge.clone().ok_or(ClientError::WalletUnavailable)?;
        if self
            .attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::SubscriptionActive);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = WalletEventSink::new(
            sender,
            Arc::clone(&self.generation),
            self.updates.subscribe(),
        );
        let subscription = match bridge.subscribe(sink) {
            Ok(id) => id,
            Err(err) => {
                self.attached.store(false, Ordering::SeqCst);
                warn!(error = %err, "failed to subscribe to wallet notifications");
                return Err(err.into());
            }
        };
        debug!(subscription = %subscription, "wallet notifications attached");
        Ok(SessionListener {
            manager: Arc::clone(self),
            bridge,
            subscription,
            receiver,
            detached: false,
        })
    }

    /// Stops applying late bridge results. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("wallet session manager closed");
        }
    }

    fn accepts_result(&self, generation: u64) -> bool {
        !self.is_closed() && self.generation() == generation
    }

    fn transition(&self, event: SessionEvent) -> Session {
        let next = {
            let mut state = self.state.lock();
            *state = state.apply(event);
            state.clone()
        };
        self.updates.send_replace(next.clone());
        next
    }
}

/// Receiving end of the single wallet change subscription.
///
/// Dropping the listener unsubscribes and discards queued notifications.
pub struct SessionListener {
    manager: Arc<WalletSessionManager>,
    bridge: Arc<dyn WalletBridge>,
    subscription: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<StampedWalletEvent>,
    detached: bool,
}

impl SessionListener {
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Waits for the next notification and applies it. Returns `None` once
    /// the bridge side has gone away, otherwise whether the event was applied.
    pub async fn next(&mut self) -> Option<bool> {
        let stamped = self.receiver.recv().await?;
        Some(self.manager.process(stamped))
    }

    /// Applies every notification already queued; returns how many were applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(stamped) = self.receiver.try_recv() {
            if self.manager.process(stamped) {
                applied += 1;
            }
        }
        applied
    }

    pub fn detach(mut self) {
        self.teardown();
    }

    /// Runs the listener on the tokio runtime until shut down.
    pub fn spawn(self) -> SessionListenerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(async move {
            let mut listener = self;
            loop {
                tokio::select! {
                    processed = listener.next() => {
                        if processed.is_none() {
                            break;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            listener.detach();
        });
        SessionListenerHandle { shutdown, worker }
    }

    fn teardown(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.bridge.unsubscribe(self.subscription);
        self.receiver.close();
        let mut discarded = 0usize;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        self.manager.attached.store(false, Ordering::SeqCst);
        debug!(
            subscription = %self.subscription,
            discarded,
            "wallet notifications detached"
        );
    }
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub struct SessionListenerHandle {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl SessionListenerHandle {
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(err) = self.worker.await {
            debug!(?err, "session listener exited with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockWalletBridge;
    use crate::link_store::MemoryLinkStore;
    use proptest::prelude::*;

    fn addr(byte: u8) -> Address {
        Address::parse(format!("0x{}", hex::encode([byte; 20]))).expect("address")
    }

    fn manager(
        bridge: &MockWalletBridge,
        links: Arc<MemoryLinkStore>,
    ) -> Arc<WalletSessionManager> {
        Arc::new(WalletSessionManager::new(
            Some(Arc::new(bridge.clone())),
            links,
            NetworkDescriptor::default(),
        ))
    }

    #[test]
    fn apply_follows_first_account_and_resets_on_empty() {
        let session = Session::default()
            .apply(SessionEvent::ChainChanged(ChainId(5)))
            .apply(SessionEvent::AccountsChanged(vec![addr(1), addr(2)]));
        assert_eq!(session.address, Some(addr(1)));
        assert_eq!(session.chain_id, Some(ChainId(5)));
        assert!(session.is_connected());

        let again = session.apply(SessionEvent::AccountsChanged(vec![addr(1), addr(2)]));
        assert_eq!(again, session);

        let emptied = session.apply(SessionEvent::AccountsChanged(Vec::new()));
        assert_eq!(emptied, Session::default());
    }

    #[test]
    fn connected_keeps_known_chain_when_none_reported() {
        let session = Session {
            address: None,
            chain_id: Some(ChainId(7)),
        }
        .apply(SessionEvent::Connected {
            address: addr(3),
            chain_id: None,
        });
        assert_eq!(session.chain_id, Some(ChainId(7)));
    }

    #[tokio::test]
    async fn initialize_without_bridge_stays_disconnected() {
        let manager = WalletSessionManager::new(
            None,
            Arc::new(MemoryLinkStore::linked()),
            NetworkDescriptor::default(),
        );
        assert!(!manager.initialize().await.is_connected());
        assert_eq!(
            manager.connect().await,
            Err(ClientError::WalletUnavailable)
        );
    }

    #[tokio::test]
    async fn initialize_reconnects_only_when_linked() {
        let bridge = MockWalletBridge::new(vec![addr(1)], ChainId(12_227_332));
        bridge.authorize();

        let unlinked = manager(&bridge, Arc::new(MemoryLinkStore::default()));
        assert!(!unlinked.initialize().await.is_connected());
        assert_eq!(bridge.call_count("list_accounts"), 0);

        let linked = manager(&bridge, Arc::new(MemoryLinkStore::linked()));
        let session = linked.initialize().await;
        assert_eq!(session.address, Some(addr(1)));
        assert_eq!(session.chain_id, Some(ChainId(12_227_332)));
        assert_eq!(bridge.call_count("request_accounts"), 0);
    }

    #[tokio::test]
    async fn connect_sets_link_and_rejection_is_reported() {
        let bridge = MockWalletBridge::new(vec![addr(1)], ChainId(1));
        let links = Arc::new(MemoryLinkStore::default());
        let manager = manager(&bridge, Arc::clone(&links));

        bridge.push_request_accounts_response(Err(crate::bridge::BridgeError::rejected("")));
        assert_eq!(manager.connect().await, Err(ClientError::UserRejected));
        assert!(!links.is_linked().unwrap());

        let session = manager.connect().await.expect("connect");
        assert_eq!(session.address, Some(addr(1)));
        assert!(links.is_linked().unwrap());
    }

    #[tokio::test]
    async fn closed_manager_discards_late_connect() {
        let bridge = MockWalletBridge::new(vec![addr(1)], ChainId(1));
        let manager = manager(&bridge, Arc::new(MemoryLinkStore::default()));
        manager.close();
        let session = manager.connect().await.expect("connect resolves");
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn stale_events_are_dropped_after_disconnect() {
        let bridge = MockWalletBridge::new(vec![addr(1)], ChainId(1));
        let manager = manager(&bridge, Arc::new(MemoryLinkStore::default()));
        manager.connect().await.expect("connect");
        let mut listener = manager.attach().expect("attach");

        bridge.emit(WalletEvent::AccountsChanged(vec![addr(2)]));
        manager.disconnect();
        assert_eq!(listener.drain(), 0);
        assert!(!manager.snapshot().is_connected());

        bridge.emit(WalletEvent::AccountsChanged(vec![addr(3)]));
        assert_eq!(listener.drain(), 1);
        assert_eq!(manager.snapshot().address, Some(addr(3)));
    }

    #[tokio::test]
    async fn only_one_listener_at_a_time() {
        let bridge = MockWalletBridge::new(vec![addr(1)], ChainId(1));
        let manager = manager(&bridge, Arc::new(MemoryLinkStore::default()));
        let listener = manager.attach().expect("attach");
        assert!(matches!(
            manager.attach(),
            Err(ClientError::SubscriptionActive)
        ));
        listener.detach();
        assert_eq!(bridge.subscriber_count(), 0);
        manager.attach().expect("attach after detach");
    }

    #[tokio::test]
    async fn wallet_info_formats_balance() {
        let bridge = MockWalletBridge::new(vec![addr(1)], ChainId(12_227_332));
        bridge.set_balance(&addr(1), U256::from(1_500_000_000_000_000_000u128));
        let manager = manager(&bridge, Arc::new(MemoryLinkStore::default()));
        assert_eq!(
            manager.wallet_info().await,
            Err(ClientError::NotConnected)
        );
        manager.connect().await.expect("connect");
        let info = manager.wallet_info().await.expect("info");
        assert_eq!(info.formatted_balance, "1.5");
        assert_eq!(info.symbol, "GAS");
    }

    #[derive(Clone, Debug)]
    enum Step {
        Accounts { accounts: Vec<u8>, stale: bool },
        Disconnect,
        Unlink,
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            4 => (prop::collection::vec(1u8..6, 0..3), any::<bool>())
                .prop_map(|(accounts, stale)| Step::Accounts { accounts, stale }),
            1 => Just(Step::Disconnect),
            1 => Just(Step::Unlink),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]
        #[test]
        fn session_follows_latest_current_account_change(
            steps in prop::collection::vec(arb_step(), 0..24)
        ) {
            let bridge = MockWalletBridge::default();
            let links = Arc::new(MemoryLinkStore::linked());
            let manager = manager(&bridge, Arc::clone(&links));
            let mut expected = None;
            let mut linked = true;
            for step in steps {
                match step {
                    Step::Accounts { accounts, stale } => {
                        let current = manager.generation();
                        let generation = if stale { current.wrapping_sub(1) } else { current };
                        let accounts: Vec<Address> = accounts.into_iter().map(addr).collect();
                        let applied = manager.process(StampedWalletEvent {
                            generation,
                            event: WalletEvent::AccountsChanged(accounts.clone()),
                        });
                        prop_assert_eq!(applied, !stale);
                        if !stale {
                            expected = accounts.first().cloned();
                        }
                    }
                    Step::Disconnect => {
                        manager.disconnect();
                        expected = None;
                    }
                    Step::Unlink => {
                        manager.unlink().expect("unlink");
                        expected = None;
                        linked = false;
                    }
                }
                prop_assert_eq!(manager.snapshot().address, expected.clone());
            }
            prop_assert_eq!(links.is_linked().expect("link state"), linked);
        }
    }
}
