#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracking_agent::config::AgentConfig;
use tracking_agent::error::{OracleError, PageError};
use tracking_agent::llm::Oracle;
use tracking_agent::page::{LoadState, Page};
use tracking_agent::types::agent_selector;

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub tag: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub context: String,
    /// Screen shown after a click.
    pub navigates_to: Option<usize>,
    /// Clicks never complete.
    pub hangs: bool,
}

impl FakeElement {
    pub fn new(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn context(mut self, context: &str) -> Self {
        self.context = context.to_string();
        self
    }

    pub fn navigates_to(mut self, screen: usize) -> Self {
        self.navigates_to = Some(screen);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hangs = true;
        self
    }
}

/// One document the fake browser can show.
#[derive(Debug, Clone, Default)]
pub struct Screen {
    pub html: String,
    pub elements: Vec<FakeElement>,
    /// CSS selector → inner text.
    pub texts: HashMap<String, String>,
    /// Label → text of the element following it.
    pub labels: HashMap<String, String>,
}

impl Screen {
    pub fn new(html: &str, elements: Vec<FakeElement>) -> Self {
        Self {
            html: html.to_string(),
            elements,
            ..Default::default()
        }
    }

    pub fn text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    pub fn label(mut self, label: &str, text: &str) -> Self {
        self.labels.insert(label.to_string(), text.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct State {
    screens: Vec<Screen>,
    current: usize,
    /// Element index → marker value on the current screen.
    markers: BTreeMap<usize, String>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    visits: Vec<String>,
    queries: usize,
    malformed_records: bool,
    content_fails: bool,
    /// Element indices that drop out of the document between query and tagging.
    detached: BTreeSet<usize>,
    tag_calls: usize,
}

/// In-memory page: a list of screens, clicks move between them.
#[derive(Debug, Default)]
pub struct FakePage {
    state: Mutex<State>,
}

impl FakePage {
    pub fn new(screens: Vec<Screen>) -> Self {
        Self {
            state: Mutex::new(State {
                screens,
                ..Default::default()
            }),
        }
    }

    pub fn with_malformed_records(self) -> Self {
        self.state.lock().unwrap().malformed_records = true;
        self
    }

    pub fn with_failing_content(self) -> Self {
        self.state.lock().unwrap().content_fails = true;
        self
    }

    /// `index` is enumerated by the query but gone by the time it is tagged.
    pub fn with_detached(self, index: usize) -> Self {
        self.state.lock().unwrap().detached.insert(index);
        self
    }

    pub fn tag_calls(&self) -> usize {
        self.state.lock().unwrap().tag_calls
    }

    /// Text of every clicked element, in order.
    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    /// `(element text or placeholder, typed text)` pairs.
    pub fn fills(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().fills.clone()
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    pub fn queries(&self) -> usize {
        self.state.lock().unwrap().queries
    }

    pub fn current_screen(&self) -> usize {
        self.state.lock().unwrap().current
    }

    /// Marker values present on the current screen, in element order.
    pub fn markers(&self) -> Vec<String> {
        self.state.lock().unwrap().markers.values().cloned().collect()
    }

    fn find(state: &State, selector: &str) -> Result<usize, PageError> {
        state
            .markers
            .iter()
            .find(|(_, id)| agent_selector(id) == selector)
            .map(|(index, _)| *index)
            .ok_or_else(|| PageError::ElementNotFound {
                selector: selector.to_string(),
            })
    }
}

#[async_trait]
impl Page for FakePage {
    async fn content(&self) -> Result<String, PageError> {
        let state = self.state.lock().unwrap();
        if state.content_fails {
            return Err(PageError::Script("document is detached".into()));
        }
        Ok(state.screens[state.current].html.clone())
    }

    async fn query_interactive(&self) -> Result<Vec<Value>, PageError> {
        let mut state = self.state.lock().unwrap();
        state.queries += 1;
        let mut records: Vec<Value> = state.screens[state.current]
            .elements
            .iter()
            .enumerate()
            .map(|(index, el)| {
                json!({
                    "index": index,
                    "tag": el.tag,
                    "text": el.text,
                    "attributes": el.attributes,
                    "context": el.context,
                })
            })
            .collect();
        if state.malformed_records {
            records.insert(0, json!({ "index": 99, "tag": 7, "attributes": "broken" }));
        }
        Ok(records)
    }

    async fn tag_elements(&self, _attribute: &str, tags: &[(usize, String)]) -> Result<Vec<usize>, PageError> {
        let mut state = self.state.lock().unwrap();
        state.tag_calls += 1;
        let count = state.screens[state.current].elements.len();
        state.markers.clear();
        let mut marked = Vec::new();
        for (index, value) in tags {
            if *index >= count || state.detached.contains(index) {
                continue;
            }
            state.markers.insert(*index, value.clone());
            marked.push(*index);
        }
        Ok(marked)
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), PageError> {
        let hangs = {
            let mut state = self.state.lock().unwrap();
            let index = Self::find(&state, selector)?;
            let element = state.screens[state.current].elements[index].clone();
            if !element.hangs {
                state.clicks.push(element.text.clone());
                if let Some(next) = element.navigates_to {
                    state.current = next;
                    state.markers.clear();
                }
            }
            element.hangs
        };
        if hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str, _timeout: Duration) -> Result<(), PageError> {
        let mut state = self.state.lock().unwrap();
        let index = Self::find(&state, selector)?;
        let element = &state.screens[state.current].elements[index];
        let name = element
            .attributes
            .get("placeholder")
            .cloned()
            .unwrap_or_else(|| element.text.clone());
        state.fills.push((name, text.to_string()));
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>, PageError> {
        let state = self.state.lock().unwrap();
        Ok(state.screens[state.current].texts.get(selector).cloned())
    }

    async fn text_after_label(&self, label: &str) -> Result<Option<String>, PageError> {
        let state = self.state.lock().unwrap();
        Ok(state.screens[state.current].labels.get(label).cloned())
    }

    async fn wait_for_load(&self, _state: LoadState, _timeout: Duration) -> Result<(), PageError> {
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<(), PageError> {
        let mut state = self.state.lock().unwrap();
        state.visits.push(url.to_string());
        state.current = 0;
        state.markers.clear();
        Ok(())
    }
}

/// Search form on screen 0, results on screen 1.
pub fn tracking_site() -> FakePage {
    let form = Screen::new(
        "<html><body><h1>Cargo Tracking</h1><p>Enter your booking id</p></body></html>",
        vec![
            FakeElement::new("a", "Home").attr("href", "/"),
            FakeElement::new("input", "")
                .attr("id", "booking")
                .attr("placeholder", "Booking ID")
                .context("Track your cargo"),
            FakeElement::new("button", "Track").navigates_to(1),
        ],
    );
    let results = Screen::new(
        "<html><body><h2>Result</h2><p>Voyage</p><p>V123</p></body></html>",
        vec![FakeElement::new("a", "Back").navigates_to(0)],
    )
    .text("#voyage", "V123")
    .label("Estimated Arrival Date", "2024-07-01");
    FakePage::new(vec![form, results])
}

/// Replies handed out in order; `fallback` answers once they run out.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn repeating(reply: &str) -> Self {
        let mut oracle = Self::new(Vec::<String>::new());
        oracle.fallback = Some(reply.to_string());
        oracle
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| OracleError::Transport("script exhausted".into()))
    }
}

pub fn click(agent_id: &str) -> String {
    json!({ "tool": "click", "args": { "agent_id": agent_id, "description": "" } }).to_string()
}

pub fn type_text(agent_id: &str, text: &str) -> String {
    json!({ "tool": "type", "args": { "agent_id": agent_id, "text": text } }).to_string()
}

pub fn extract(selectors: &[&str]) -> String {
    json!({ "tool": "extract", "args": selectors }).to_string()
}

pub fn finish() -> String {
    json!({ "tool": "finish", "args": { "reason": "done" } }).to_string()
}

pub fn agent_config(plan_path: &Path, max_cycles: usize) -> AgentConfig {
    AgentConfig {
        max_cycles,
        action_timeout: Duration::from_secs(2),
        load_timeout: Duration::from_secs(1),
        oracle_timeout: Duration::from_secs(5),
        plan_path: plan_path.to_path_buf(),
    }
}
