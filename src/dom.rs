use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::{AgentError, PageError, Result};
use crate::page::Page;
use crate::types::{
    AGENT_ID_ATTRIBUTE, ATTRIBUTE_ALLOW_LIST, CONTEXT_MAX_CHARS, ElementHandle, PageSnapshot,
    SUMMARY_MAX_CHARS, ScanMode, agent_id,
};

/// JavaScript that enumerates interactive elements in document order.
///
/// The matched list is parked on `window.__agentScan` so that
/// [`TAG_ELEMENTS_JS`] can mark the same nodes afterwards. Returns a JSON
/// string; a record that throws while being read carries `error` instead of
/// the element fields and is dropped by the scanner.
pub(crate) const QUERY_INTERACTIVE_JS: &str = r#"
(() => {
  const SELECTOR = 'a, button, input, textarea, [role="button"], [onclick]';
  const ALLOWED = ['id', 'class', 'type', 'placeholder', 'aria-label', 'href'];
  const found = Array.from(document.querySelectorAll(SELECTOR));
  window.__agentScan = found;

  const records = found.map((el, index) => {
    try {
      const attributes = {};
      for (const name of ALLOWED) {
        const value = el.getAttribute(name);
        if (value !== null) attributes[name] = value;
      }
      const block = el.parentElement ? el.parentElement.closest('div') : null;
      const context = block
        ? (block.innerText || '').replace(/\s+/g, ' ').trim().slice(0, 200)
        : '';
      return {
        index,
        tag: el.tagName.toLowerCase(),
        text: (el.innerText || '').trim(),
        attributes,
        context,
      };
    } catch (e) {
      return { index, error: String(e) };
    }
  });

  return JSON.stringify(records);
})()
"#;

/// Clears every previous marker, then marks the listed nodes of the last
/// enumeration. Called as `TAG_ELEMENTS_JS(attribute, [[index, value], ...])`;
/// returns the indices that were marked. Nodes detached since the
/// enumeration are left out.
pub(crate) const TAG_ELEMENTS_JS: &str = r#"
((attribute, tags) => {
  document.querySelectorAll('[' + attribute + ']').forEach(el => el.removeAttribute(attribute));
  const found = window.__agentScan || [];
  const marked = [];
  for (const [index, value] of tags) {
    const el = found[index];
    if (el && el.isConnected) {
      el.setAttribute(attribute, value);
      marked.push(index);
    }
  }
  return JSON.stringify(marked);
})
"#;

/// Text of the element right after the innermost element containing the
/// label. Called as `TEXT_AFTER_LABEL_JS(label)`.
pub(crate) const TEXT_AFTER_LABEL_JS: &str = r#"
((label) => {
  if (!document.body) return null;
  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT']);
  const holds = el => !SKIP.has(el.tagName) && (el.textContent || '').includes(label);
  for (const el of document.body.querySelectorAll('*')) {
    if (!holds(el)) continue;
    if (Array.from(el.children).some(holds)) continue;
    const next = el.nextElementSibling;
    if (next) return (next.innerText || next.textContent || '').trim();
  }
  return null;
})
"#;

/// Text of the first element matching a CSS selector, or null. Invalid
/// selectors count as no match. Called as `INNER_TEXT_JS(selector)`.
pub(crate) const INNER_TEXT_JS: &str = r#"
((selector) => {
  try {
    const el = document.querySelector(selector);
    return el ? (el.innerText || el.textContent || '').trim() : null;
  } catch (e) {
    return null;
  }
})
"#;

static HIDDEN_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>",
    )
    .expect("static pattern")
});

#[derive(Debug, Deserialize)]
struct RawElement {
    index: usize,
    tag: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    context: String,
}

impl RawElement {
    fn into_handle(self, agent_id: String) -> ElementHandle {
        let attributes = self
            .attributes
            .into_iter()
            .filter(|(name, _)| ATTRIBUTE_ALLOW_LIST.contains(&name.as_str()))
            .collect();
        ElementHandle {
            agent_id,
            tag: self.tag.to_lowercase(),
            text: self.text.trim().to_string(),
            attributes,
            context: truncate_chars(&collapse_spaces(&self.context), CONTEXT_MAX_CHARS),
        }
    }
}

/// Scans the page, degrading every failure to an empty snapshot.
pub async fn scan(page: &dyn Page, mode: ScanMode) -> PageSnapshot {
    match try_scan(page, mode).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(?mode, error = %err, "scan failed, using empty snapshot");
            PageSnapshot::default()
        }
    }
}

/// Scans the page and marks every listed element with its `agent_id`.
///
/// Elements whose record cannot be read, or that leave the document before
/// they are marked, are skipped; ids stay contiguous over the elements that
/// are kept.
pub async fn try_scan(page: &dyn Page, mode: ScanMode) -> Result<PageSnapshot> {
    let summary = match mode {
        ScanMode::Full => {
            let html = page.content().await.map_err(perception)?;
            Some(summarize_html(&html))
        }
        ScanMode::InteractiveOnly => None,
    };

    let records = page.query_interactive().await.map_err(perception)?;
    let mut kept: Vec<RawElement> = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<RawElement>(record) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!(error = %err, "skipping unreadable element");
                None
            }
        })
        .collect();

    // Each retry drops at least one element, so this ends.
    loop {
        let tags: Vec<(usize, String)> = kept
            .iter()
            .enumerate()
            .map(|(position, raw)| (raw.index, agent_id(position)))
            .collect();
        let marked: BTreeSet<usize> = page
            .tag_elements(AGENT_ID_ATTRIBUTE, &tags)
            .await
            .map_err(perception)?
            .into_iter()
            .collect();
        if kept.iter().all(|raw| marked.contains(&raw.index)) {
            break;
        }
        let before = kept.len();
        kept.retain(|raw| marked.contains(&raw.index));
        warn!(dropped = before - kept.len(), "elements left the page during the scan, re-tagging");
    }

    let elements: Vec<ElementHandle> = kept
        .into_iter()
        .enumerate()
        .map(|(position, raw)| raw.into_handle(agent_id(position)))
        .collect();
    debug!(?mode, elements = elements.len(), "scan complete");
    Ok(PageSnapshot { elements, summary })
}

fn perception(err: PageError) -> AgentError {
    AgentError::Perception(err.to_string())
}

/// Lossy text digest of a page: scripts and styles dropped, one non-empty
/// line per line, capped at [`SUMMARY_MAX_CHARS`].
pub fn summarize_html(html: &str) -> String {
    let visible = HIDDEN_BLOCKS.replace_all(html, " ");
    let text = nanohtml2text::html2text(&visible);
    let collapsed = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    truncate_chars(&collapsed, SUMMARY_MAX_CHARS)
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
