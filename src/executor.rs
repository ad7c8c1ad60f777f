use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{AgentError, PageError, Result};
use crate::page::{LoadState, Page, bounded};
use crate::types::{Decision, NOT_FOUND, RunResult, Step, agent_selector};

/// Prefix marking an extract target as label text rather than CSS.
pub const LABEL_PREFIX: &str = "text=";

/// Outcome of one executed decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub step: Step,
    /// Set only by a successful `extract`.
    pub result: Option<RunResult>,
}

/// Performs decisions against the page. Action failures are returned as
/// `failure` steps, never as errors.
#[derive(Debug, Clone)]
pub struct Executor {
    action_timeout: Duration,
    load_timeout: Duration,
}

impl Executor {
    pub fn new(action_timeout: Duration, load_timeout: Duration) -> Self {
        Self {
            action_timeout,
            load_timeout,
        }
    }

    pub async fn execute(&self, page: &dyn Page, decision: &Decision) -> Execution {
        let tool = decision.tool();
        let args = Some(decision.args());
        info!(tool, args = %decision.args(), "executing");

        match self.perform(page, decision).await {
            Ok(result) => Execution {
                step: Step::success(tool, args),
                result,
            },
            Err(err) => {
                error!(tool, error = %err, "action failed");
                Execution {
                    step: Step::failure(tool, args, err.to_string()),
                    result: None,
                }
            }
        }
    }

    async fn perform(&self, page: &dyn Page, decision: &Decision) -> Result<Option<RunResult>> {
        match decision {
            Decision::Click { agent_id, .. } => {
                let selector = agent_selector(agent_id);
                bounded("click", self.action_timeout, page.click(&selector, self.action_timeout)).await?;
                // A click may navigate; give the next document time to settle.
                if let Err(err) = page.wait_for_load(LoadState::DomContentLoaded, self.load_timeout).await {
                    match err {
                        PageError::Timeout { .. } => warn!(%selector, "page still loading after click"),
                        other => return Err(other.into()),
                    }
                }
                Ok(None)
            }
            Decision::Type { agent_id, text } => {
                let selector = agent_selector(agent_id);
                bounded("type", self.action_timeout, page.fill(&selector, text, self.action_timeout)).await?;
                Ok(None)
            }
            Decision::Extract { selectors } => self.extract(page, selectors).await.map(Some),
            Decision::Finish { .. } => Ok(None),
        }
    }

    async fn extract(&self, page: &dyn Page, selectors: &[String]) -> Result<RunResult> {
        let mut data = RunResult::new();
        for selector in selectors {
            let found = match selector.strip_prefix(LABEL_PREFIX) {
                Some(label) => {
                    bounded("extract", self.action_timeout, page.text_after_label(label.trim())).await?
                }
                None => bounded("extract", self.action_timeout, page.inner_text(selector)).await?,
            };
            let value = match found {
                Some(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => NOT_FOUND.to_string(),
            };
            data.insert(selector.clone(), value);
        }
        if data.values().all(|v| v == NOT_FOUND) {
            return Err(AgentError::ElementNotFound(format!(
                "none of the selectors matched: {}",
                selectors.join(", ")
            )));
        }
        Ok(data)
    }
}
