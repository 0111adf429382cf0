use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridge::{BridgeError, NetworkDescriptor, WalletBridge};
use crate::errors::{ClientError, ClientResult};
use crate::session::WalletSessionManager;
use crate::types::ChainId;

/// Keeps the wallet on the network the poll contract lives on.
#[derive(Clone)]
pub struct NetworkGuard {
    session: Arc<WalletSessionManager>,
}

impl NetworkGuard {
    pub fn new(session: Arc<WalletSessionManager>) -> Self {
        Self { session }
    }

    pub fn required(&self) -> &NetworkDescriptor {
        self.session.network()
    }

    /// Ensures the wallet is on the required chain, offering to switch to it and
    /// to add it when the wallet does not know it yet.
    ///
    /// The session's chain is only trusted while a listener receives pushed
    /// chain changes. Otherwise the wallet is asked every time, since it may
    /// have been switched behind the session's back.
    pub async fn ensure_network(&self) -> ClientResult<ChainId> {
        let bridge = self
            .session
            .bridge()
            .cloned()
            .ok_or(ClientError::WalletUnavailable)?;
        let expected = self.required().chain_id;
        let tracked = self.session.is_listening() && bridge.pushes_events();
        if tracked && self.session.snapshot().chain_id == Some(expected) {
            return Ok(expected);
        }

        let current = bridge.chain_id().await?;
        if current == expected {
            self.session.record_chain(current);
            return Ok(expected);
        }

        info!(
            current = %current,
            expected = %expected,
            "wallet on wrong network; requesting switch"
        );
        match bridge.switch_chain(expected).await {
            Ok(()) => {}
            Err(BridgeError::UnknownChain { .. }) => {
                self.add_and_switch(bridge.as_ref(), current).await?;
            }
            Err(err) => return Err(self.declined(err, current)),
        }
        self.session.record_chain(expected);
        info!(chain_id = %expected, "wallet switched to required network");
        Ok(expected)
    }

    async fn add_and_switch(
        &self,
        bridge: &dyn WalletBridge,
        current: ChainId,
    ) -> ClientResult<()> {
        let descriptor = self.required();
        debug!(
            chain_id = %descriptor.chain_id,
            chain_name = %descriptor.chain_name,
            "wallet does not know required network; requesting add"
        );
        bridge
            .add_chain(descriptor)
            .await
            .map_err(|err| self.declined(err, current))?;
        bridge
            .switch_chain(descriptor.chain_id)
            .await
            .map_err(|err| self.declined(err, current))
    }

    fn declined(&self, err: BridgeError, current: ChainId) -> ClientError {
        let expected = self.required().chain_id;
        warn!(
            current = %current,
            expected = %expected,
            error = %err,
            "network switch failed"
        );
        match err {
            BridgeError::Rejected { .. } | BridgeError::UnknownChain { .. } => {
                ClientError::NetworkMismatch {
                    expected,
                    actual: Some(current),
                }
            }
            other => other.into(),
        }
    }
}
