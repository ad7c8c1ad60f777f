use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::brain::Brain;
use crate::config::AgentConfig;
use crate::dom;
use crate::error::AgentError;
use crate::executor::Executor;
use crate::llm::Oracle;
use crate::observer::{AgentEvent, Observer, Stage, TracingObserver};
use crate::page::Page;
use crate::plan::{self, PlanVar};
use crate::types::{Decision, History, PageSnapshot, RunResult, ScanMode, Step};

/// Loop driver states.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Scanning(ScanMode),
    Planning,
    Executing(Decision),
    Terminal(TerminalReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// The oracle chose `finish`, or a degraded decision carried an error.
    Finished { error: Option<String> },
    /// An extraction produced the final result.
    Extracted,
    /// The cycle budget ran out before either of the above.
    BudgetExhausted { limit: usize },
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Finished { error: None } => write!(f, "finished"),
            TerminalReason::Finished { error: Some(error) } => write!(f, "finished with error: {error}"),
            TerminalReason::Extracted => write!(f, "extracted"),
            TerminalReason::BudgetExhausted { limit } => write!(f, "cycle budget of {limit} exhausted"),
        }
    }
}

/// Everything one run accumulates. Owned by the driver for the run.
#[derive(Debug, Clone)]
pub struct AgentSession {
    objective: String,
    snapshot: PageSnapshot,
    history: History,
    final_result: Option<RunResult>,
    decision: Option<Decision>,
    cycles: usize,
}

impl AgentSession {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            snapshot: PageSnapshot::default(),
            history: History::new(),
            final_result: None,
            decision: None,
            cycles: 0,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn final_result(&self) -> Option<&RunResult> {
        self.final_result.as_ref()
    }

    /// Executor invocations so far.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Sets the final result unless one is already set.
    pub fn set_final_result(&mut self, result: RunResult) -> bool {
        if self.final_result.is_some() {
            return false;
        }
        self.final_result = Some(result);
        true
    }
}

/// Transition out of `Planning`.
pub fn after_planning(decision: Decision, session: &AgentSession, max_cycles: usize) -> LoopState {
    if decision.is_finish() {
        return LoopState::Terminal(TerminalReason::Finished {
            error: decision.error().map(String::from),
        });
    }
    if session.final_result.is_some() {
        return LoopState::Terminal(TerminalReason::Extracted);
    }
    if session.cycles >= max_cycles {
        return LoopState::Terminal(TerminalReason::BudgetExhausted { limit: max_cycles });
    }
    LoopState::Executing(decision)
}

/// Transition out of `Executing`.
pub fn after_executing(session: &AgentSession, max_cycles: usize) -> LoopState {
    if session.final_result.is_some() {
        return LoopState::Terminal(TerminalReason::Extracted);
    }
    if session.cycles >= max_cycles {
        return LoopState::Terminal(TerminalReason::BudgetExhausted { limit: max_cycles });
    }
    LoopState::Scanning(ScanMode::Full)
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: RunResult,
    pub history: Vec<Step>,
    pub reason: TerminalReason,
    pub cycles: usize,
    pub plan_saved: bool,
}

impl RunOutcome {
    /// A non-empty result without an `error` entry.
    pub fn is_success(&self) -> bool {
        !self.result.is_empty() && !self.result.contains_key("error")
    }
}

/// Drives scan → plan → execute cycles until a terminal state.
pub struct Agent {
    brain: Brain,
    executor: Executor,
    observer: Arc<dyn Observer>,
    max_cycles: usize,
    plan_path: PathBuf,
}

impl Agent {
    pub fn new(oracle: Arc<dyn Oracle>, config: &AgentConfig) -> Self {
        Self {
            brain: Brain::new(oracle, config.oracle_timeout),
            executor: Executor::new(config.action_timeout, config.load_timeout),
            observer: Arc::new(TracingObserver),
            max_cycles: config.max_cycles,
            plan_path: config.plan_path.clone(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub async fn run(&self, page: &dyn Page, objective: &str) -> RunOutcome {
        self.run_with_vars(page, objective, &[]).await
    }

    /// Runs the loop; `vars` are templated into the saved plan.
    pub async fn run_with_vars(&self, page: &dyn Page, objective: &str, vars: &[PlanVar]) -> RunOutcome {
        let mut session = AgentSession::new(objective);
        let mut state = LoopState::Scanning(ScanMode::InteractiveOnly);

        loop {
            state = match state {
                LoopState::Scanning(mode) => {
                    self.scan(page, mode, &mut session).await;
                    LoopState::Planning
                }
                LoopState::Planning => {
                    let started = Instant::now();
                    let decision = self
                        .brain
                        .decide(&session.objective, session.history.steps(), &session.snapshot)
                        .await;
                    let outcome = match decision.error() {
                        Some(error) => format!("finish ({error})"),
                        None => decision.tool().to_string(),
                    };
                    self.emit_stage(Stage::Plan, started, outcome);
                    session.decision = Some(decision.clone());
                    after_planning(decision, &session, self.max_cycles)
                }
                LoopState::Executing(decision) => {
                    self.execute(page, &decision, &mut session).await;
                    after_executing(&session, self.max_cycles)
                }
                LoopState::Terminal(reason) => break self.terminate(session, reason, vars),
            };
        }
    }

    async fn scan(&self, page: &dyn Page, mode: ScanMode, session: &mut AgentSession) {
        let started = Instant::now();
        let (snapshot, outcome) = match dom::try_scan(page, mode).await {
            Ok(snapshot) => {
                let outcome = format!("{} elements", snapshot.elements.len());
                (snapshot, outcome)
            }
            Err(err) => (PageSnapshot::default(), format!("empty snapshot ({err})")),
        };
        session.snapshot = snapshot;
        self.emit_stage(Stage::Scan, started, outcome);
    }

    async fn execute(&self, page: &dyn Page, decision: &Decision, session: &mut AgentSession) {
        let started = Instant::now();
        let execution = self.executor.execute(page, decision).await;
        session.cycles += 1;

        let outcome = match &execution.step.error {
            Some(error) => format!("failure ({error})"),
            None => "success".to_string(),
        };
        self.observer.on_event(&AgentEvent::StepRecorded {
            number: session.history.len() + 1,
            step: execution.step.clone(),
        });
        session.history.push(execution.step);
        if let Some(result) = execution.result {
            session.set_final_result(result);
        }
        self.emit_stage(Stage::Execute, started, outcome);
    }

    fn terminate(&self, session: AgentSession, reason: TerminalReason, vars: &[PlanVar]) -> RunOutcome {
        let started = Instant::now();
        if let Some(decision) = &session.decision {
            tracing::debug!(tool = decision.tool(), args = %decision.args(), "last decision");
        }
        let successes = session.history.successful_steps();
        let mut plan_saved = false;
        if !successes.is_empty() {
            match plan::save_plan(&self.plan_path, &successes, vars) {
                Ok(()) => {
                    plan_saved = true;
                    self.observer.on_event(&AgentEvent::PlanSaved {
                        steps: successes.len(),
                    });
                }
                Err(err) => tracing::warn!(path = %self.plan_path.display(), error = %err, "could not save plan"),
            }
        }

        let result = match &reason {
            TerminalReason::Extracted => session.final_result.clone().unwrap_or_default(),
            TerminalReason::Finished { error: Some(error) } => error_result(error.clone()),
            TerminalReason::Finished { error: None } => session.final_result.clone().unwrap_or_default(),
            TerminalReason::BudgetExhausted { limit } => {
                error_result(AgentError::CycleBudgetExceeded(*limit).to_string())
            }
        };

        self.emit_stage(Stage::Terminal, started, reason.to_string());
        self.observer.on_event(&AgentEvent::RunFinished {
            reason: reason.to_string(),
            cycles: session.cycles,
        });

        RunOutcome {
            result,
            history: session.history.into_steps(),
            reason,
            cycles: session.cycles,
            plan_saved,
        }
    }

    fn emit_stage(&self, stage: Stage, started: Instant, outcome: String) {
        self.observer.on_event(&AgentEvent::StageCompleted {
            stage,
            duration: started.elapsed(),
            outcome,
        });
    }
}

pub fn error_result(message: impl Into<String>) -> RunResult {
    RunResult::from([("error".to_string(), message.into())])
}
