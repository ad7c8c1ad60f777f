use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

use crate::types::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Plan,
    Execute,
    Terminal,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Scan => "scan",
            Stage::Plan => "plan",
            Stage::Execute => "execute",
            Stage::Terminal => "terminal",
        }
    }
}

/// Structured events emitted by the loop driver.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    StageCompleted {
        stage: Stage,
        duration: Duration,
        outcome: String,
    },
    StepRecorded {
        number: usize,
        step: Step,
    },
    PlanSaved {
        steps: usize,
    },
    RunFinished {
        reason: String,
        cycles: usize,
    },
}

/// Sink for loop events. Implementations must be cheap; they run inline.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::StageCompleted {
                stage,
                duration,
                outcome,
            } => info!(
                stage = stage.as_str(),
                duration_ms = duration.as_millis() as u64,
                %outcome,
                "stage completed"
            ),
            AgentEvent::StepRecorded { number, step } => match &step.error {
                Some(error) => warn!(number, action = %step.action, %error, "step failed"),
                None => info!(number, action = %step.action, "step succeeded"),
            },
            AgentEvent::PlanSaved { steps } => info!(steps, "plan saved"),
            AgentEvent::RunFinished { reason, cycles } => info!(%reason, cycles, "run finished"),
        }
    }
}

/// Keeps every event in memory, for inspection after a run.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<AgentEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Outcomes of every completed `stage`, in order.
    pub fn outcomes(&self, stage: Stage) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AgentEvent::StageCompleted {
                    stage: s, outcome, ..
                } if s == stage => Some(outcome),
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn on_event(&self, event: &AgentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
