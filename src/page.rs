use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::PageError;

/// Document readiness levels a caller can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    Load,
}

impl LoadState {
    /// `document.readyState` values that satisfy this state.
    pub fn ready_states(self) -> &'static [&'static str] {
        match self {
            LoadState::DomContentLoaded => &["interactive", "complete"],
            LoadState::Load => &["complete"],
        }
    }
}

/// The live browser page the agent drives.
///
/// Every call may fail or hang; the scanner and executor put bounds on them
/// and turn failures into data.
#[async_trait]
pub trait Page: Send + Sync {
    /// Full serialized HTML of the current document.
    async fn content(&self) -> Result<String, PageError>;

    /// Raw records for every interactive element, in document order.
    ///
    /// Each record carries `index` (position in this enumeration), `tag`,
    /// `text`, `attributes` and `context`. The enumeration is kept by the
    /// page until the next call so [`Page::tag_elements`] can refer to it.
    async fn query_interactive(&self) -> Result<Vec<Value>, PageError>;

    /// Removes `attribute` from every element, then sets it on the elements
    /// of the last enumeration listed in `tags` as `(index, value)`.
    ///
    /// Returns the indices actually marked; elements that left the document
    /// since the enumeration are skipped rather than reported as errors.
    async fn tag_elements(&self, attribute: &str, tags: &[(usize, String)]) -> Result<Vec<usize>, PageError>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), PageError>;

    /// Replaces the element's text with `text`.
    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<(), PageError>;

    /// Visible text of the first match, `None` when nothing matches.
    async fn inner_text(&self, selector: &str) -> Result<Option<String>, PageError>;

    /// Visible text of the element that follows the one labelled `label`.
    async fn text_after_label(&self, label: &str) -> Result<Option<String>, PageError>;

    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<(), PageError>;

    async fn goto(&self, url: &str) -> Result<(), PageError>;
}

/// Runs a page call under `limit`, reporting overruns as [`PageError::Timeout`].
pub async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> Result<T, PageError>
where
    F: std::future::Future<Output = Result<T, PageError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PageError::Timeout {
            operation: operation.to_string(),
            after: limit,
        }),
    }
}
