//! Browser agent that looks up cargo tracking details: it scans a live page,
//! asks a language model for the next action, performs it and repeats until
//! the answer is extracted. Successful runs are stored as replayable plans.

pub mod agent;
pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod executor;
pub mod hands;
pub mod llm;
pub mod observer;
pub mod orchestrator;
pub mod page;
pub mod plan;
pub mod replay;
pub mod types;

pub use agent::{Agent, AgentSession, LoopState, RunOutcome, TerminalReason};
pub use config::Config;
pub use error::{AgentError, OracleError, PageError};
pub use llm::Oracle;
pub use orchestrator::{Orchestrator, ResultSource, TaskReport};
pub use page::Page;
pub use types::{Decision, ElementHandle, PageSnapshot, RunResult, Step, StepStatus};
