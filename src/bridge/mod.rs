//! Wallet bridge abstractions.
//!
//! The bridge is the injected wallet provider: it authorizes accounts, reports
//! and switches networks, signs contract calls and pushes change notifications.
//! A missing bridge is represented as `None` by the owners of a bridge handle.

pub mod abi;
pub mod rpc;
pub mod traits;

pub use traits::*;

#[cfg(any(test, feature = "mock-bridge"))]
pub mod mock;

#[cfg(any(test, feature = "mock-bridge"))]
pub use mock::MockWalletBridge;

pub use rpc::JsonRpcWalletBridge;
