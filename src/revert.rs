//! Maps raw contract revert messages onto text a poll participant understands.

const REVERT_PREFIXES: &[&str] = &[
    "execution reverted:",
    "execution reverted",
    "VM Exception while processing transaction: revert",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevertKind {
    AlreadyVoted,
    UnknownPoll,
    InvalidOption,
    InsufficientFunds,
    Other,
}

/// Revert message split into the raw reason and a friendly headline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevertHint {
    pub kind: RevertKind,
    pub friendly: String,
    pub technical: String,
}

/// Strips known revert prefixes from a node or wallet message.
pub fn revert_reason(message: &str) -> &str {
    let trimmed = message.trim();
    REVERT_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or(trimmed)
}

pub fn describe_revert(message: &str) -> RevertHint {
    let technical = revert_reason(message).to_string();
    let lowered = technical.to_ascii_lowercase();
    let (kind, friendly) = if lowered.contains("already voted") {
        (
            RevertKind::AlreadyVoted,
            "You have already voted on this poll.",
        )
    } else if lowered.contains("poll does not exist") || lowered.contains("invalid poll") {
        (RevertKind::UnknownPoll, "This poll no longer exists.")
    } else if lowered.contains("invalid option") {
        (
            RevertKind::InvalidOption,
            "That option is not part of this poll.",
        )
    } else if lowered.contains("insufficient funds") {
        (
            RevertKind::InsufficientFunds,
            "Insufficient balance to pay for this transaction.",
        )
    } else {
        return RevertHint {
            kind: RevertKind::Other,
            friendly: technical.clone(),
            technical,
        };
    };
    RevertHint {
        kind,
        friendly: friendly.to_string(),
        technical,
    }
}
