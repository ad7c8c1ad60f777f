use anyhow::{Context, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::dom::{INNER_TEXT_JS, QUERY_INTERACTIVE_JS, TAG_ELEMENTS_JS, TEXT_AFTER_LABEL_JS};
use crate::error::PageError;
use crate::page::{LoadState, Page};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Browser process plus the tab the agent works in.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attaches to a running Chrome when `debug_url` is set and reachable,
    /// otherwise launches one. Blocking; run it off the async runtime.
    pub fn launch(config: &BrowserConfig) -> anyhow::Result<Self> {
        if let Some(url) = &config.debug_url {
            info!(%url, "attaching to existing Chrome");
            match Browser::connect(url.clone()) {
                Ok(browser) => {
                    let existing = {
                        let tabs = browser
                            .get_tabs()
                            .lock()
                            .map_err(|_| anyhow!("browser tab list is poisoned"))?;
                        tabs.first().cloned()
                    };
                    let tab = match existing {
                        Some(tab) => tab,
                        None => browser.new_tab()?,
                    };
                    return Ok(Self {
                        _browser: browser,
                        tab,
                    });
                }
                Err(err) => warn!(error = %err, "could not attach, launching a new browser"),
            }
        }

        if let Some(profile) = &config.profile_dir {
            std::fs::create_dir_all(profile)
                .with_context(|| format!("creating profile dir {}", profile.display()))?;
        }

        let mut args = vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
        ];
        if config.ignore_https_errors {
            args.push(OsStr::new("--ignore-certificate-errors"));
        }

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone(),
            user_data_dir: config.profile_dir.clone(),
            args,
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = config.headless, "launching Chrome");
        let browser =
            Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// A [`Page`] backed by the session's tab.
    pub fn page(&self) -> ChromePage {
        ChromePage {
            tab: self.tab.clone(),
        }
    }
}

/// [`Page`] over a `headless_chrome` tab. Every call runs on the blocking
/// pool because the CDP client is synchronous.
#[derive(Clone)]
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, call: F) -> Result<T, PageError>
    where
        F: FnOnce(&Tab) -> Result<T, PageError> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || call(&tab))
            .await
            .map_err(|e| PageError::Backend(format!("browser task panicked: {e}")))?
    }
}

fn script(err: anyhow::Error) -> PageError {
    PageError::Script(format!("{err:#}"))
}

fn backend(err: anyhow::Error) -> PageError {
    PageError::Backend(format!("{err:#}"))
}

fn js_literal(value: &impl serde::Serialize) -> Result<String, PageError> {
    serde_json::to_string(value).map_err(|e| PageError::Script(e.to_string()))
}

fn evaluate(tab: &Tab, expression: &str) -> Result<Value, PageError> {
    let result = tab.evaluate(expression, false).map_err(script)?;
    Ok(result.value.unwrap_or(Value::Null))
}

fn ensure_present(tab: &Tab, selector: &str) -> Result<(), PageError> {
    let probe = format!(
        "(() => {{ try {{ return document.querySelector({}) !== null; }} catch (e) {{ return false; }} }})()",
        js_literal(&selector)?
    );
    match evaluate(tab, &probe)? {
        Value::Bool(true) => Ok(()),
        _ => Err(PageError::ElementNotFound {
            selector: selector.to_string(),
        }),
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn content(&self) -> Result<String, PageError> {
        self.blocking(|tab| tab.get_content().map_err(backend)).await
    }

    async fn query_interactive(&self) -> Result<Vec<Value>, PageError> {
        self.blocking(|tab| {
            let raw = evaluate(tab, QUERY_INTERACTIVE_JS)?;
            let json = raw
                .as_str()
                .ok_or_else(|| PageError::Script("element query returned no JSON".into()))?;
            serde_json::from_str(json).map_err(|e| PageError::Script(e.to_string()))
        })
        .await
    }

    async fn tag_elements(&self, attribute: &str, tags: &[(usize, String)]) -> Result<Vec<usize>, PageError> {
        let expression = format!(
            "{TAG_ELEMENTS_JS}({}, {})",
            js_literal(&attribute)?,
            js_literal(&tags)?
        );
        self.blocking(move |tab| {
            let raw = evaluate(tab, &expression)?;
            let json = raw
                .as_str()
                .ok_or_else(|| PageError::Script("tagging returned no JSON".into()))?;
            serde_json::from_str(json).map_err(|e| PageError::Script(e.to_string()))
        })
        .await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), PageError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            ensure_present(tab, &selector)?;
            let element = tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(backend)?;
            element.click().map_err(backend)?;
            debug!(%selector, "clicked");
            Ok(())
        })
        .await
    }

    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<(), PageError> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.blocking(move |tab| {
            ensure_present(tab, &selector)?;
            let element = tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(backend)?;
            element.click().map_err(backend)?;
            element
                .call_js_fn(
                    "function () { if ('value' in this) { this.value = ''; } else { this.textContent = ''; } }",
                    vec![],
                    false,
                )
                .map_err(script)?;
            element.type_into(&text).map_err(backend)?;
            debug!(%selector, chars = text.chars().count(), "filled");
            Ok(())
        })
        .await
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>, PageError> {
        let expression = format!("{INNER_TEXT_JS}({})", js_literal(&selector)?);
        self.blocking(move |tab| Ok(evaluate(tab, &expression)?.as_str().map(String::from)))
            .await
    }

    async fn text_after_label(&self, label: &str) -> Result<Option<String>, PageError> {
        let expression = format!("{TEXT_AFTER_LABEL_JS}({})", js_literal(&label)?);
        self.blocking(move |tab| Ok(evaluate(tab, &expression)?.as_str().map(String::from)))
            .await
    }

    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<(), PageError> {
        self.blocking(move |tab| {
            let deadline = Instant::now() + timeout;
            loop {
                // Mid-navigation the execution context can vanish; keep polling.
                if let Ok(Value::String(ready)) = evaluate(tab, "document.readyState") {
                    if state.ready_states().contains(&ready.as_str()) {
                        return Ok(());
                    }
                }
                if Instant::now() >= deadline {
                    return Err(PageError::Timeout {
                        operation: format!("wait for {state:?}"),
                        after: timeout,
                    });
                }
                std::thread::sleep(READY_POLL_INTERVAL);
            }
        })
        .await
    }

    async fn goto(&self, url: &str) -> Result<(), PageError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .and_then(|tab| tab.wait_until_navigated())
                .map_err(|e| PageError::Navigation(format!("{url}: {e:#}")))?;
            Ok(())
        })
        .await
    }
}
