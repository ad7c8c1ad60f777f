use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Attribute names copied from the live element into a snapshot entry.
pub const ATTRIBUTE_ALLOW_LIST: [&str; 6] = ["id", "class", "type", "placeholder", "aria-label", "href"];

/// Attribute written onto live elements so the executor can find them again.
pub const AGENT_ID_ATTRIBUTE: &str = "data-agent-id";

pub const CONTEXT_MAX_CHARS: usize = 200;
pub const SUMMARY_MAX_CHARS: usize = 5000;
pub const MAX_CYCLES_PER_RUN: usize = 25;

/// Sentinel stored for extract selectors that matched nothing.
pub const NOT_FOUND: &str = "Not found";

/// Final outcome of a run: plain string pairs, or `{"error": ...}`.
pub type RunResult = BTreeMap<String, String>;

/// One interactive element seen during a scan.
///
/// `agent_id` is only meaningful for the snapshot that produced it; any
/// navigation or re-scan invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub agent_id: String,
    pub tag: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub context: String,
}

pub fn agent_id(index: usize) -> String {
    format!("agent-id-{index}")
}

pub fn agent_selector(agent_id: &str) -> String {
    let escaped = agent_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("[{AGENT_ID_ATTRIBUTE}='{escaped}']")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub elements: Vec<ElementHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl PageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.summary.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    InteractiveOnly,
    Full,
}

impl ScanMode {
    /// Action name of a scan entry in older plans. Scans are not history
    /// steps; replay only matches these names to re-scan.
    pub fn action(self) -> &'static str {
        match self {
            ScanMode::InteractiveOnly => "scan_interactive",
            ScanMode::Full => "scan_full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Success,
    Failure,
}

/// A history record. Built resolved; never mutated once pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Step {
    pub fn success(action: impl Into<String>, args: Option<Value>) -> Self {
        Self {
            action: action.into(),
            args,
            status: StepStatus::Success,
            error: None,
        }
    }

    pub fn failure(action: impl Into<String>, args: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args,
            status: StepStatus::Failure,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Append-only run history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct History(Vec<Step>);

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolved step. A pending step is stored as a failure so the
    /// history never carries unresolved entries.
    pub fn push(&mut self, step: Step) {
        if step.status == StepStatus::Pending {
            let Step { action, args, .. } = step;
            self.0.push(Step::failure(action, args, "step was never resolved"));
            return;
        }
        self.0.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The replayable plan: successful steps in their original order.
    pub fn successful_steps(&self) -> Vec<Step> {
        self.0.iter().filter(|s| s.is_success()).cloned().collect()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.0
    }
}

/// The oracle's validated choice for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Click { agent_id: String, description: String },
    Type { agent_id: String, text: String },
    Extract { selectors: Vec<String> },
    Finish { args: Map<String, Value> },
}

impl Decision {
    pub fn finish_with_error(message: impl Into<String>) -> Self {
        let mut args = Map::new();
        args.insert("error".to_string(), Value::String(message.into()));
        Decision::Finish { args }
    }

    pub fn tool(&self) -> &'static str {
        match self {
            Decision::Click { .. } => "click",
            Decision::Type { .. } => "type",
            Decision::Extract { .. } => "extract",
            Decision::Finish { .. } => "finish",
        }
    }

    /// Arguments in the shape they are logged into history.
    pub fn args(&self) -> Value {
        match self {
            Decision::Click {
                agent_id,
                description,
            } => serde_json::json!({ "agent_id": agent_id, "description": description }),
            Decision::Type { agent_id, text } => {
                serde_json::json!({ "agent_id": agent_id, "text": text })
            }
            Decision::Extract { selectors } => serde_json::json!({ "selectors": selectors }),
            Decision::Finish { args } => Value::Object(args.clone()),
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Decision::Finish { .. })
    }

    /// Error message carried by a degraded `finish`, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Decision::Finish { args } => args.get("error").and_then(Value::as_str),
            _ => None,
        }
    }
}
