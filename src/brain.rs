use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{AgentError, OracleError, Result};
use crate::llm::Oracle;
use crate::types::{Decision, PageSnapshot, Step};

const TOOL_INSTRUCTIONS: &str = r#"Your response must be a valid JSON object with a "tool" and "args".
- The "tool" must be one of: "click", "type", "extract", "finish".
- For "click", "args" must contain "agent_id" (string) and a "description" (string).
- For "type", "args" must contain "agent_id" (string) and "text" (string).
- For "extract", "args" must be a list of concise CSS selectors for the elements holding the final answer to the objective. A selector of the form "text=<label>" reads the element that follows the one showing <label>.
- Use "finish" when the objective is complete or you are stuck.
Return ONLY the JSON object. No markdown, no explanation."#;

/// Turns the session state into a prompt and the oracle's reply into a
/// [`Decision`]. Never fails: every problem becomes a `finish` carrying the
/// error so the loop can wind down cleanly.
pub struct Brain {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
}

impl Brain {
    pub fn new(oracle: Arc<dyn Oracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    pub async fn decide(&self, objective: &str, history: &[Step], snapshot: &PageSnapshot) -> Decision {
        match self.try_decide(objective, history, snapshot).await {
            Ok(decision) => {
                info!(tool = decision.tool(), args = %decision.args(), "oracle decision");
                decision
            }
            Err(err) => {
                error!(error = %err, "no usable decision, finishing");
                Decision::finish_with_error(err.to_string())
            }
        }
    }

    async fn try_decide(&self, objective: &str, history: &[Step], snapshot: &PageSnapshot) -> Result<Decision> {
        let prompt = build_prompt(objective, history, snapshot)?;
        let reply = match tokio::time::timeout(self.timeout, self.oracle.generate(&prompt)).await {
            Ok(reply) => reply?,
            Err(_) => return Err(OracleError::Timeout(self.timeout).into()),
        };
        parse_decision(&reply)
    }
}

pub fn build_prompt(objective: &str, history: &[Step], snapshot: &PageSnapshot) -> Result<String> {
    let steps = serde_json::to_string_pretty(history)
        .map_err(|e| AgentError::OracleParse(format!("history not serializable: {e}")))?;
    let elements = serde_json::to_string_pretty(&snapshot.elements)
        .map_err(|e| AgentError::OracleParse(format!("elements not serializable: {e}")))?;

    let mut parts = vec![
        format!("You are a web automation agent. Your high-level objective is: \"{objective}\"."),
        format!("You have already taken these steps: {steps}"),
    ];
    if let Some(summary) = snapshot.summary.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!(
            "\nHere is a summary of the text content on the current page:\n---\n{summary}\n---"
        ));
    }
    parts.push(format!(
        "\nHere is a JSON list of all interactive elements on the current page:\n---\n{elements}\n---"
    ));
    parts.push(
        "\nBased on your objective, the page content, and the available elements, what is the single next action to take?"
            .to_string(),
    );
    parts.push(format!("\n{TOOL_INSTRUCTIONS}"));
    Ok(parts.join("\n"))
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct ClickArgs {
    #[serde(alias = "agentId")]
    agent_id: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TypeArgs {
    #[serde(alias = "agentId")]
    agent_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractArgs {
    List(Vec<String>),
    Named { selectors: Vec<String> },
}

/// Strict parse of an oracle reply. Markdown fences are tolerated; anything
/// outside the four tools and their argument shapes is rejected.
pub fn parse_decision(reply: &str) -> Result<Decision> {
    let cleaned = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let raw: RawDecision =
        serde_json::from_str(cleaned).map_err(|e| AgentError::OracleParse(e.to_string()))?;
    decision_from_parts(&raw.tool, raw.args)
}

/// Validates a tool name and its arguments into a [`Decision`]. Shared by
/// oracle parsing and plan replay.
pub fn decision_from_parts(tool: &str, args: Value) -> Result<Decision> {
    let invalid = |e: serde_json::Error| AgentError::OracleParse(format!("bad {tool} args: {e}"));
    match tool {
        "click" => {
            let ClickArgs {
                agent_id,
                description,
            } = serde_json::from_value(args).map_err(invalid)?;
            Ok(Decision::Click {
                agent_id: non_empty(tool, agent_id)?,
                description,
            })
        }
        "type" => {
            let TypeArgs { agent_id, text } = serde_json::from_value(args).map_err(invalid)?;
            Ok(Decision::Type {
                agent_id: non_empty(tool, agent_id)?,
                text,
            })
        }
        "extract" => {
            let requested = match serde_json::from_value(args).map_err(invalid)? {
                ExtractArgs::List(selectors) | ExtractArgs::Named { selectors } => selectors,
            };
            // The result is keyed by selector, so a repeat would collapse.
            let mut selectors: Vec<String> = Vec::with_capacity(requested.len());
            for selector in requested {
                if !selectors.contains(&selector) {
                    selectors.push(selector);
                }
            }
            if selectors.is_empty() {
                return Err(AgentError::OracleParse(
                    "extract needs at least one selector".into(),
                ));
            }
            Ok(Decision::Extract { selectors })
        }
        "finish" => match args {
            Value::Object(map) => Ok(Decision::Finish { args: map }),
            Value::Null => Ok(Decision::Finish { args: Map::new() }),
            other => Err(AgentError::OracleParse(format!(
                "finish args must be an object, got {other}"
            ))),
        },
        unknown => Err(AgentError::OracleParse(format!("unknown tool '{unknown}'"))),
    }
}

fn non_empty(tool: &str, agent_id: String) -> Result<String> {
    if agent_id.trim().is_empty() {
        return Err(AgentError::OracleParse(format!("{tool} needs a non-empty agent_id")));
    }
    Ok(agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementHandle, agent_id};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct Fixed(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl Oracle for Fixed {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, OracleError> {
            self.0
                .map(String::from)
                .map_err(|_| OracleError::Transport("connection refused".into()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl Oracle for Stalled {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, OracleError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("{}".into())
        }
    }

    fn snapshot() -> PageSnapshot {
        PageSnapshot {
            elements: vec![ElementHandle {
                agent_id: agent_id(0),
                tag: "input".into(),
                text: String::new(),
                attributes: BTreeMap::from([("placeholder".to_string(), "Booking ID".to_string())]),
                context: "Track your cargo".into(),
            }],
            summary: Some("Welcome to cargo tracking".into()),
        }
    }

    #[test]
    fn prompt_embeds_objective_history_and_elements() {
        let history = vec![Step::failure(
            "click",
            Some(serde_json::json!({ "agent_id": "agent-id-4", "description": "" })),
            "element not found",
        )];
        let prompt = build_prompt("Find voyage 'V1'", &history, &snapshot()).unwrap();
        assert!(prompt.contains("\"Find voyage 'V1'\""));
        assert!(prompt.contains("\"status\": \"failure\""));
        assert!(prompt.contains("agent-id-4"));
        assert!(prompt.contains("Welcome to cargo tracking"));
        assert!(prompt.contains("\"agent_id\": \"agent-id-0\""));
        assert!(prompt.contains("\"placeholder\": \"Booking ID\""));
        assert!(prompt.contains("\"click\", \"type\", \"extract\", \"finish\""));
    }

    #[test]
    fn prompt_omits_missing_summary() {
        let mut snap = snapshot();
        snap.summary = None;
        let prompt = build_prompt("x", &[], &snap).unwrap();
        assert!(!prompt.contains("summary of the text content"));
    }

    #[test]
    fn parses_each_tool() {
        assert_eq!(
            parse_decision(r#"{"tool":"click","args":{"agent_id":"agent-id-2","description":"Search"}}"#).unwrap(),
            Decision::Click {
                agent_id: "agent-id-2".into(),
                description: "Search".into()
            }
        );
        assert_eq!(
            parse_decision(r#"{"tool":"type","args":{"agentId":"agent-id-1","text":"HMMU2048983"}}"#).unwrap(),
            Decision::Type {
                agent_id: "agent-id-1".into(),
                text: "HMMU2048983".into()
            }
        );
        assert_eq!(
            parse_decision(r##"{"tool":"extract","args":["#voyage","#eta"]}"##).unwrap(),
            Decision::Extract {
                selectors: vec!["#voyage".into(), "#eta".into()]
            }
        );
        assert_eq!(
            parse_decision(r##"{"tool":"extract","args":{"selectors":["#voyage"]}}"##).unwrap(),
            Decision::Extract {
                selectors: vec!["#voyage".into()]
            }
        );
        assert!(parse_decision(r#"{"tool":"finish"}"#).unwrap().is_finish());
    }

    #[test]
    fn repeated_extract_selectors_are_merged_in_order() {
        assert_eq!(
            parse_decision(r##"{"tool":"extract","args":["#eta","#voyage","#eta"]}"##).unwrap(),
            Decision::Extract {
                selectors: vec!["#eta".into(), "#voyage".into()]
            }
        );
    }

    #[test]
    fn strips_markdown_fences() {
        let reply = "```json\n{\"tool\":\"finish\",\"args\":{\"reason\":\"done\"}}\n```";
        let decision = parse_decision(reply).unwrap();
        assert_eq!(decision.args()["reason"], "done");
    }

    #[test]
    fn rejects_unknown_tools_and_missing_args() {
        for reply in [
            r#"{"tool":"scroll","args":{}}"#,
            r#"{"tool":"click","args":{"description":"no id"}}"#,
            r#"{"tool":"click","args":{"agent_id":"  "}}"#,
            r#"{"tool":"type","args":{"agent_id":"agent-id-0"}}"#,
            r#"{"tool":"extract","args":[]}"#,
            r#"{"tool":"extract","args":[1,2]}"#,
            r#"{"tool":"finish","args":"done"}"#,
            r#"{"args":{}}"#,
            "I think we should click the button",
        ] {
            let err = parse_decision(reply).unwrap_err();
            assert!(matches!(err, AgentError::OracleParse(_)), "{reply}: {err}");
        }
    }

    #[tokio::test]
    async fn malformed_reply_degrades_to_finish() {
        let brain = Brain::new(Arc::new(Fixed(Ok("not json at all"))), Duration::from_secs(5));
        let decision = brain.decide("x", &[], &snapshot()).await;
        assert!(decision.is_finish());
        assert!(decision.error().unwrap().contains("could not parse"));
    }

    #[tokio::test]
    async fn transport_failure_degrades_to_finish() {
        let brain = Brain::new(Arc::new(Fixed(Err(()))), Duration::from_secs(5));
        let decision = brain.decide("x", &[], &snapshot()).await;
        assert!(decision.error().unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_oracle_degrades_to_finish() {
        let brain = Brain::new(Arc::new(Stalled), Duration::from_secs(30));
        let decision = brain.decide("x", &[], &snapshot()).await;
        assert!(decision.error().unwrap().contains("within 30s"));
    }
}
