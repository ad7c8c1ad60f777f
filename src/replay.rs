use serde_json::Value;
use tracing::{debug, info};

use crate::brain::decision_from_parts;
use crate::dom;
use crate::error::{AgentError, Result};
use crate::executor::Executor;
use crate::page::Page;
use crate::types::{Decision, RunResult, ScanMode, Step};

/// Re-executes a stored plan without consulting the oracle.
///
/// Each click or type is preceded by a scan so the page carries the same
/// agent ids it had when the step was recorded. Replay stops at the first
/// extraction that yields data; any failing step aborts it.
pub async fn replay(page: &dyn Page, steps: &[Step], executor: &Executor) -> Result<RunResult> {
    if steps.is_empty() {
        return Err(AgentError::Plan("no stored plan to replay".into()));
    }
    info!(steps = steps.len(), "replaying stored plan");

    for (index, step) in steps.iter().enumerate() {
        let number = index + 1;
        if step.action == ScanMode::InteractiveOnly.action() || step.action == ScanMode::Full.action() {
            dom::try_scan(page, ScanMode::InteractiveOnly).await?;
            continue;
        }

        let args = step.args.clone().unwrap_or(Value::Null);
        let decision = decision_from_parts(&step.action, args)
            .map_err(|e| AgentError::Plan(format!("step {number} is not replayable: {e}")))?;
        if decision.is_finish() {
            break;
        }
        if matches!(decision, Decision::Click { .. } | Decision::Type { .. }) {
            let snapshot = dom::try_scan(page, ScanMode::InteractiveOnly).await?;
            debug!(number, elements = snapshot.elements.len(), "re-tagged page before step");
        }

        let execution = executor.execute(page, &decision).await;
        if let Some(error) = execution.step.error {
            return Err(AgentError::Plan(format!(
                "step {number} ({}) failed during replay: {error}",
                step.action
            )));
        }
        if let Some(result) = execution.result {
            info!(number, "replay extracted a result");
            return Ok(result);
        }
    }

    Err(AgentError::Plan("stored plan ended without extracting anything".into()))
}
