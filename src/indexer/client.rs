use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Address, PollId};

/// Poll as served by the indexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    /// Vote counts aligned with `options`.
    pub votes: Vec<u64>,
    /// Creation time in unix seconds, when the indexer reports it.
    pub created_at: Option<u64>,
}

impl Poll {
    /// Poll with every count at zero.
    pub fn new(id: PollId, question: impl Into<String>, options: Vec<String>) -> Self {
        let votes = vec![0; options.len()];
        Self {
            id,
            question: question.into(),
            options,
            votes,
            created_at: None,
        }
    }

    pub fn with_votes(mut self, votes: Vec<u64>) -> Self {
        self.votes = votes;
        self
    }

    pub fn option_index(&self, option: &str) -> Option<usize> {
        self.options.iter().position(|candidate| candidate == option)
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.iter().sum()
    }
}

/// Single vote row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteRecord {
    pub id: String,
    pub poll_id: PollId,
    pub voter: Address,
    pub option: String,
}

impl VoteRecord {
    pub fn new(
        id: impl Into<String>,
        poll_id: PollId,
        voter: Address,
        option: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            poll_id,
            voter,
            option: option.into(),
        }
    }
}

/// One fetch worth of polls and votes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollPage {
    pub polls: Vec<Poll>,
    pub votes: Vec<VoteRecord>,
}

impl PollPage {
    pub fn new(polls: Vec<Poll>, votes: Vec<VoteRecord>) -> Self {
        Self { polls, votes }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IndexerError {
    #[error("indexer transport error: {0}")]
    Transport(String),
    #[error("indexer returned HTTP status {0}")]
    Status(u16),
    #[error("indexer query failed: {0}")]
    Query(String),
    #[error("indexer response malformed: {0}")]
    Malformed(String),
}

/// Read side of the poll contract.
#[async_trait]
pub trait PollIndexer: Send + Sync {
    /// Fetches up to `first` polls and `first` votes.
    async fn fetch_page(&self, first: u32) -> Result<PollPage, IndexerError>;
}
