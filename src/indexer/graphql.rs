use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::client::{IndexerError, Poll, PollIndexer, PollPage, VoteRecord};
use crate::config::IndexerConfig;
use crate::types::{Address, PollId};

const POLLS_QUERY: &str = "query GetPolls($first: Int!) {
  polls(first: $first) { id question options votes createdAt }
  votes(first: $first) { id poll { id } voter option }
}";

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

/// Poll subgraph reached over HTTP.
#[derive(Clone, Debug)]
pub struct GraphQlIndexer {
    client: Client,
    endpoint: Url,
}

impl GraphQlIndexer {
    pub fn new(config: &IndexerConfig) -> Result<Self, IndexerError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|err| IndexerError::Transport(format!("invalid endpoint: {err}")))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| IndexerError::Transport(err.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PollIndexer for GraphQlIndexer {
    async fn fetch_page(&self, first: u32) -> Result<PollPage, IndexerError> {
        let request = GraphQlRequest {
            query: POLLS_QUERY,
            variables: json!({ "first": first }),
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|err| IndexerError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(IndexerError::Status(response.status().as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|err| IndexerError::Malformed(err.to_string()))?;
        let page = decode_page(&body)?;
        debug!(
            polls = page.polls.len(),
            votes = page.votes.len(),
            "fetched poll page"
        );
        Ok(page)
    }
}

/// Decodes a GraphQL response body into a page.
///
/// Rows that cannot be used are skipped with a warning; a missing `data`
/// object or a GraphQL `errors` array fails the whole page.
pub fn decode_page(body: &Value) -> Result<PollPage, IndexerError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .map(|error| {
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                })
                .collect();
            return Err(IndexerError::Query(messages.join("; ")));
        }
    }
    let data = body
        .get("data")
        .filter(|data| data.is_object())
        .ok_or_else(|| IndexerError::Malformed("missing data object".into()))?;

    let polls = rows(data, "polls")?
        .iter()
        .filter_map(|row| match decode_poll(row) {
            Ok(poll) => Some(poll),
            Err(reason) => {
                warn!(reason = %reason, "skipping unusable poll row");
                None
            }
        })
        .collect();
    let votes = rows(data, "votes")?
        .iter()
        .filter_map(|row| match decode_vote(row) {
            Ok(vote) => Some(vote),
            Err(reason) => {
                warn!(reason = %reason, "skipping unusable vote row");
                None
            }
        })
        .collect();
    Ok(PollPage::new(polls, votes))
}

fn rows<'a>(data: &'a Value, field: &str) -> Result<&'a [Value], IndexerError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(rows)) => Ok(rows),
        Some(other) => Err(IndexerError::Malformed(format!(
            "`{field}` is not a list: {other}"
        ))),
    }
}

fn decode_poll(row: &Value) -> Result<Poll, String> {
    let id = string_field(row, "id")?;
    let question = string_field(row, "question")?;
    let options: Vec<String> = row
        .get("options")
        .and_then(Value::as_array)
        .ok_or_else(|| format!("poll {id} has no options list"))?
        .iter()
        .map(|option| {
            option
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("poll {id} has a non-string option"))
        })
        .collect::<Result<_, _>>()?;
    if options.len() < 2 {
        return Err(format!("poll {id} has fewer than two options"));
    }
    let mut votes: Vec<u64> = match row.get("votes") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(counts)) => counts
            .iter()
            .map(count)
            .collect::<Option<_>>()
            .ok_or_else(|| format!("poll {id} has a non-numeric vote count"))?,
        Some(_) => return Err(format!("poll {id} votes is not a list")),
    };
    if votes.len() != options.len() {
        warn!(
            poll_id = %id,
            options = options.len(),
            votes = votes.len(),
            "vote counts misaligned with options; normalizing"
        );
        votes.resize(options.len(), 0);
    }
    let created_at = row.get("createdAt").and_then(count);
    Ok(Poll {
        id: PollId::new(id),
        question,
        options,
        votes,
        created_at,
    })
}

fn decode_vote(row: &Value) -> Result<VoteRecord, String> {
    let id = string_field(row, "id")?;
    let poll_id = row
        .get("poll")
        .and_then(|poll| poll.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| format!("vote {id} has no poll reference"))?;
    let voter = string_field(row, "voter")?;
    let voter = Address::parse(&voter).map_err(|err| format!("vote {id}: {err}"))?;
    let option = string_field(row, "option")?;
    Ok(VoteRecord::new(id, PollId::new(poll_id), voter, option))
}

fn string_field(row: &Value, field: &str) -> Result<String, String> {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing string field `{field}`"))
}

// Subgraph BigInts arrive as decimal strings.
fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}
