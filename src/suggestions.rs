//! Poll option suggestions from a chat-completions endpoint.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::SuggestionsConfig;

const SYSTEM_PROMPT: &str = "You are an assistant that generates poll options. When given a poll \
question, respond only with a numbered list of 4-6 potential options. Do not include any other \
text or explanations. Each option should be concise and directly related to the question. \
Format your response as a simple numbered list, with each option on a new line.";

#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("suggestion endpoint is invalid: {0}")]
    Endpoint(String),
    #[error("suggestion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("suggestion service returned HTTP status {0}")]
    Status(u16),
    #[error("suggestion service returned no choices")]
    Empty,
    #[error("question must not be empty")]
    EmptyQuestion,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Clone, Debug)]
pub struct SuggestionClient {
    client: Client,
    endpoint: Url,
    model: String,
}

impl SuggestionClient {
    pub fn new(config: &SuggestionsConfig) -> Result<Self, SuggestionError> {
        let endpoint =
            Url::parse(&config.endpoint).map_err(|err| SuggestionError::Endpoint(err.to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
        })
    }

    pub async fn suggest(&self, question: &str) -> Result<Vec<String>, SuggestionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SuggestionError::EmptyQuestion);
        }
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: format!(
                        "Generate poll options for the following question: \"{question}\""
                    ),
                },
            ],
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SuggestionError::Status(response.status().as_u16()));
        }
        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(SuggestionError::Empty)?;
        let suggestions = parse_suggestions(&content);
        debug!(count = suggestions.len(), "received option suggestions");
        Ok(suggestions)
    }
}

/// Turns a numbered list into bare options, dropping blank lines.
pub fn parse_suggestions(content: &str) -> Vec<String> {
    content
        .lines()
        .map(strip_numbering)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_numbering(line: &str) -> &str {
    let line = line.trim();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return line;
    }
    match line[digits..].strip_prefix('.') {
        Some(rest) => rest.trim(),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_numbering_and_blank_lines() {
        let content = "1. Pizza\n\n2.Tacos\n  3.  Sushi  \n10. Ramen\n";
        assert_eq!(
            parse_suggestions(content),
            vec!["Pizza", "Tacos", "Sushi", "Ramen"]
        );
    }

    #[test]
    fn unnumbered_lines_are_kept() {
        assert_eq!(
            parse_suggestions("Burgers\n2020 vintage"),
            vec!["Burgers", "2020 vintage"]
        );
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let config = SuggestionsConfig {
            endpoint: "::".into(),
            ..SuggestionsConfig::default()
        };
        assert!(matches!(
            SuggestionClient::new(&config),
            Err(SuggestionError::Endpoint(_))
        ));
    }
}
