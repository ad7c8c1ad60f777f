use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::types::MAX_CYCLES_PER_RUN;

pub const DEFAULT_START_URL: &str = "http://www.seacargotracking.net/";
pub const DEFAULT_PLAN_PATH: &str = "plan.json";
pub const DEFAULT_OBJECTIVE: &str = "Find the tracking details for the {carrier} ID '{tracking_id}'.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Gemini,
    Openai,
}

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.0-flash",
            Provider::Openai => "gpt-4o-mini",
        }
    }

    pub fn api_key_var(self) -> &'static str {
        match self {
            Provider::Gemini => "GOOGLE_API_KEY",
            Provider::Openai => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Provider as ValueEnum>::from_str(s, true).map_err(|e| anyhow!("unknown provider '{s}': {e}"))
    }
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    /// Overrides the provider's endpoint root (tests, proxies).
    pub base_url: Option<String>,
    pub timeout: Duration,
}

/// Bounds and paths for one agent run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_cycles: usize,
    pub action_timeout: Duration,
    pub load_timeout: Duration,
    pub oracle_timeout: Duration,
    pub plan_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_cycles: MAX_CYCLES_PER_RUN,
            action_timeout: Duration::from_secs(10),
            load_timeout: Duration::from_secs(5),
            oracle_timeout: Duration::from_secs(60),
            plan_path: PathBuf::from(DEFAULT_PLAN_PATH),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// DevTools websocket of an already running Chrome to attach to.
    pub debug_url: Option<String>,
    pub profile_dir: Option<PathBuf>,
    pub ignore_https_errors: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            chrome_path: None,
            debug_url: None,
            profile_dir: dirs::cache_dir().map(|dir| dir.join("tracking-agent").join("profile")),
            ignore_https_errors: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub start_url: String,
    pub carrier: String,
    /// Objective with `{carrier}` and `{tracking_id}` placeholders.
    pub objective_template: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            start_url: DEFAULT_START_URL.to_string(),
            carrier: "HMM".to_string(),
            objective_template: DEFAULT_OBJECTIVE.to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn objective(&self, tracking_id: &str) -> String {
        self.objective_template
            .replace("{carrier}", &self.carrier)
            .replace("{tracking_id}", tracking_id)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub oracle: OracleConfig,
    pub agent: AgentConfig,
    pub browser: BrowserConfig,
    pub tracker: TrackerConfig,
}

impl Config {
    /// Reads `.env` and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = match get("AGENT_PROVIDER") {
            Some(raw) => raw.parse::<Provider>()?,
            None => Provider::Gemini,
        };
        let api_key = get(provider.api_key_var()).unwrap_or_default();

        let mut agent = AgentConfig::default();
        if let Some(raw) = get("AGENT_MAX_CYCLES") {
            agent.max_cycles = raw
                .parse()
                .with_context(|| format!("AGENT_MAX_CYCLES is not a number: {raw}"))?;
        }
        if let Some(secs) = parse_secs(&get, "AGENT_ACTION_TIMEOUT_SECS")? {
            agent.action_timeout = secs;
        }
        if let Some(secs) = parse_secs(&get, "AGENT_LOAD_TIMEOUT_SECS")? {
            agent.load_timeout = secs;
        }
        if let Some(secs) = parse_secs(&get, "AGENT_ORACLE_TIMEOUT_SECS")? {
            agent.oracle_timeout = secs;
        }
        if let Some(path) = get("AGENT_PLAN_PATH") {
            agent.plan_path = PathBuf::from(path);
        }

        let mut browser = BrowserConfig::default();
        if let Some(raw) = get("AGENT_HEADLESS") {
            browser.headless = parse_bool(&raw)
                .ok_or_else(|| anyhow!("AGENT_HEADLESS must be true or false, got {raw}"))?;
        }
        browser.chrome_path = get("CHROME_PATH").map(PathBuf::from);
        browser.debug_url = get("CHROME_DEBUG_URL");

        let mut tracker = TrackerConfig::default();
        if let Some(url) = get("AGENT_START_URL") {
            tracker.start_url = url;
        }
        if let Some(carrier) = get("AGENT_CARRIER") {
            tracker.carrier = carrier;
        }

        Ok(Self {
            oracle: OracleConfig {
                provider,
                api_key,
                model: get("AGENT_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
                base_url: get("AGENT_BASE_URL"),
                timeout: agent.oracle_timeout,
            },
            agent,
            browser,
            tracker,
        })
    }
}

fn parse_secs(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    match get(key) {
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("{key} is not a whole number of seconds: {raw}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
