use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`crate::page::Page`] implementation.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser error: {0}")]
    Backend(String),
}

/// Failures reported by an [`crate::llm::Oracle`].
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("no content in response: {0}")]
    EmptyResponse(String),

    #[error("oracle did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("page content unreadable: {0}")]
    Perception(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("action timed out: {0}")]
    ActionTimeout(String),

    #[error("action failed: {0}")]
    Action(String),

    #[error("could not parse oracle decision: {0}")]
    OracleParse(String),

    #[error("oracle call failed: {0}")]
    OracleTransport(#[from] OracleError),

    #[error("cycle budget of {0} exhausted")]
    CycleBudgetExceeded(usize),

    #[error("plan file error: {0}")]
    Plan(String),
}

impl From<PageError> for AgentError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::ElementNotFound { selector } => AgentError::ElementNotFound(selector),
            err @ PageError::Timeout { .. } => AgentError::ActionTimeout(err.to_string()),
            other => AgentError::Action(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Plan(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Plan(err.to_string())
    }
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;
