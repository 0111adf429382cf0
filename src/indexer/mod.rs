//! Read access to the poll subgraph.

pub mod client;
pub mod graphql;

#[cfg(any(test, feature = "mock-bridge"))]
pub mod stub;

pub use client::{IndexerError, Poll, PollIndexer, PollPage, VoteRecord};
pub use graphql::GraphQlIndexer;

#[cfg(any(test, feature = "mock-bridge"))]
pub use stub::StubIndexer;
