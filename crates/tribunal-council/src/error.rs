use thiserror::Error;

/// Failure of a single advisor call. Always converted into an abstention by
/// the vote collector; never surfaces as a request-level error.
#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Advisor response parse error: {0}")]
    Parse(String),

    #[error("Advisor timed out after {0} seconds")]
    Timeout(u64),

    #[error("Malformed advisor judgment: {0}")]
    Malformed(String),

    #[error("No system prompt for advisor role: {0}")]
    UnknownRole(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CouncilError {
    #[error("Decision request cancelled before all votes were collected")]
    Cancelled,
}
