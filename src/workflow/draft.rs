use std::collections::HashSet;

use crate::errors::{ClientError, ClientResult};

const MIN_OPTIONS: usize = 2;

/// Poll being composed; stays editable until it is submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollDraft {
    question: String,
    options: Vec<String>,
}

/// Trimmed, checked payload ready for `createPoll`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedPoll {
    pub question: String,
    pub options: Vec<String>,
}

impl Default for PollDraft {
    fn default() -> Self {
        Self {
            question: String::new(),
            options: vec![String::new(); MIN_OPTIONS],
        }
    }
}

impl PollDraft {
    pub fn new(question: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            question: question.into(),
            options,
        }
    }

    /// Builds a draft from `"Pizza, Tacos, Sushi"` style input.
    pub fn from_comma_separated(question: impl Into<String>, options: &str) -> Self {
        let options = options
            .split(',')
            .map(str::trim)
            .filter(|option| !option.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(question, options)
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn set_question(&mut self, question: impl Into<String>) {
        self.question = question.into();
    }

    /// Returns `false` when `index` is out of range.
    pub fn set_option(&mut self, index: usize, value: impl Into<String>) -> bool {
        match self.options.get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    pub fn add_option(&mut self) -> usize {
        self.options.push(String::new());
        self.options.len() - 1
    }

    /// Removes a slot, never going below two.
    pub fn remove_option(&mut self, index: usize) -> bool {
        if self.options.len() <= MIN_OPTIONS || index >= self.options.len() {
            return false;
        }
        self.options.remove(index);
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn validate(&self) -> ClientResult<ValidatedPoll> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(ClientError::InvalidInput("question must not be empty".into()));
        }
        if self.options.len() < MIN_OPTIONS {
            return Err(ClientError::InvalidInput(
                "a poll needs at least two options".into(),
            ));
        }
        let mut seen = HashSet::new();
        let mut options = Vec::with_capacity(self.options.len());
        for (index, option) in self.options.iter().enumerate() {
            let option = option.trim();
            if option.is_empty() {
                return Err(ClientError::InvalidInput(format!(
                    "option {} must not be empty",
                    index + 1
                )));
            }
            if !seen.insert(option) {
                return Err(ClientError::InvalidInput(format!(
                    "option `{option}` is listed more than once"
                )));
            }
            options.push(option.to_string());
        }
        Ok(ValidatedPoll {
            question: question.to_string(),
            options,
        })
    }
}
