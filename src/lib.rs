//! Client core for an on-chain quick-poll application.
//!
//! The crate keeps a local wallet session consistent with an external wallet
//! provider and drives poll creation and voting through it:
//!
//! * [`session`] tracks the connected account and chain and applies wallet
//!   change notifications;
//! * [`network`] makes sure the wallet is on the required chain before any
//!   state-changing call;
//! * [`workflow`] runs each submission through validation, wallet
//!   confirmation and receipt, publishing every phase;
//! * [`cache`] holds the last fetched polls and votes with optimistic patches.
//!
//! The wallet and the indexer are reached through the [`bridge::WalletBridge`]
//! and [`indexer::PollIndexer`] traits. [`PollClient`] bundles everything into
//! one application context.

pub mod bridge;
pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod indexer;
pub mod link_store;
pub mod network;
pub mod revert;
pub mod session;
pub mod suggestions;
pub mod types;
pub mod workflow;

pub use client::PollClient;
pub use errors::{ClientError, ClientResult};
