use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::agent::{Agent, RunOutcome};
use crate::config::{AgentConfig, TrackerConfig};
use crate::error::{AgentError, Result};
use crate::executor::{Executor, LABEL_PREFIX};
use crate::llm::Oracle;
use crate::observer::Observer;
use crate::page::Page;
use crate::plan::{self, PlanVar};
use crate::replay::replay;
use crate::types::RunResult;

/// Name the tracking id is stored under in a plan.
pub const TRACKING_ID_VAR: &str = "tracking_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Replay,
    Agent,
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultSource::Replay => "stored plan",
            ResultSource::Agent => "agent run",
        })
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub result: RunResult,
    pub source: ResultSource,
    pub elapsed: Duration,
    /// Present when the agent loop ran.
    pub outcome: Option<RunOutcome>,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        !self.result.is_empty() && !self.result.contains_key("error")
    }
}

/// Looks up one tracking id: the stored plan first, the agent loop if that
/// does not produce a result.
pub struct Orchestrator {
    agent: Agent,
    executor: Executor,
    tracker: TrackerConfig,
    plan_path: PathBuf,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, agent: &AgentConfig, tracker: TrackerConfig) -> Self {
        Self {
            agent: Agent::new(oracle, agent),
            executor: Executor::new(agent.action_timeout, agent.load_timeout),
            tracker,
            plan_path: agent.plan_path.clone(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.agent = self.agent.with_observer(observer);
        self
    }

    pub async fn run_task(&self, page: &dyn Page, tracking_id: &str) -> Result<TaskReport> {
        let started = Instant::now();
        let vars = [PlanVar::new(TRACKING_ID_VAR, tracking_id)];

        page.goto(&self.tracker.start_url).await?;
        match self.try_replay(page, &vars).await {
            Ok(result) => {
                info!(tracking_id, "answered from stored plan");
                return Ok(TaskReport {
                    result,
                    source: ResultSource::Replay,
                    elapsed: started.elapsed(),
                    outcome: None,
                });
            }
            Err(err) => warn!(tracking_id, error = %err, "replay unavailable, starting agent"),
        }

        page.goto(&self.tracker.start_url).await?;
        let objective = self.tracker.objective(tracking_id);
        let outcome = self.agent.run_with_vars(page, &objective, &vars).await;
        Ok(TaskReport {
            result: outcome.result.clone(),
            source: ResultSource::Agent,
            elapsed: started.elapsed(),
            outcome: Some(outcome),
        })
    }

    async fn try_replay(&self, page: &dyn Page, vars: &[PlanVar]) -> Result<RunResult> {
        let steps = plan::bind_plan(plan::load_plan(&self.plan_path)?, vars);
        let result = replay(page, &steps, &self.executor).await?;
        if result.contains_key("error") {
            return Err(AgentError::Plan("replay produced an error result".into()));
        }
        Ok(result)
    }
}

/// `estimated_arrival_date` → `Estimated Arrival Date`. Label selectors
/// lose their `text=` prefix.
pub fn title_case_key(key: &str) -> String {
    let key = key.strip_prefix(LABEL_PREFIX).unwrap_or(key);
    key.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
