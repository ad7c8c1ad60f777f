use serde_json::Value;
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::Path;

use crate::error::{AgentError, Result};
use crate::types::{Step, StepStatus};

/// Named value substituted into typed text: stored as `{name}` in a plan,
/// filled back in on replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanVar {
    pub name: String,
    pub value: String,
}

impl PlanVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn placeholder(&self) -> String {
        format!("{{{}}}", self.name)
    }
}

/// Reads a plan. A missing file is an empty plan.
pub fn load_plan(path: &Path) -> Result<Vec<Step>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let steps: Vec<Step> = serde_json::from_reader(reader)?;
    if let Some(step) = steps.iter().find(|s| s.status != StepStatus::Success) {
        return Err(AgentError::Plan(format!(
            "{} holds a non-successful '{}' step",
            path.display(),
            step.action
        )));
    }
    Ok(steps)
}

/// Overwrites `path` with `steps`. Typed text equal to a variable's value
/// is stored as that variable's placeholder.
pub fn save_plan(path: &Path, steps: &[Step], vars: &[PlanVar]) -> Result<()> {
    let stored: Vec<Step> = steps
        .iter()
        .cloned()
        .map(|step| map_typed_text(step, |text| templatize(text, vars)))
        .collect();

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    serde_json::to_writer_pretty(file, &stored)?;
    Ok(())
}

/// Fills placeholders of `vars` back into a loaded plan.
pub fn bind_plan(steps: Vec<Step>, vars: &[PlanVar]) -> Vec<Step> {
    steps
        .into_iter()
        .map(|step| {
            map_typed_text(step, |text| {
                vars.iter()
                    .find(|var| text.trim() == var.placeholder())
                    .map_or_else(|| text.to_string(), |var| var.value.clone())
            })
        })
        .collect()
}

fn templatize(text: &str, vars: &[PlanVar]) -> String {
    vars.iter()
        .find(|var| !var.value.is_empty() && text.trim() == var.value)
        .map_or_else(|| text.to_string(), PlanVar::placeholder)
}

fn map_typed_text(mut step: Step, rewrite: impl Fn(&str) -> String) -> Step {
    if step.action != "type" {
        return step;
    }
    if let Some(Value::Object(args)) = step.args.as_mut() {
        if let Some(Value::String(text)) = args.get_mut("text") {
            *text = rewrite(text);
        }
    }
    step
}
