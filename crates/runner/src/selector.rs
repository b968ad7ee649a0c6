//! Selector resolution against a live page
//!
//! Turns a scenario's raw selector list into the ordered list of concrete
//! selectors to capture, together with their existence and visibility in the
//! page. Order matters: the position of a selector is part of its file name.

use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use snapgate_common::{
    is_sentinel, SelectorState, BODY_SELECTOR, DOCUMENT_SELECTOR, NOCLIP_SELECTOR,
    VIEWPORT_SELECTOR,
};

use crate::engine::BrowserSession;
use crate::error::{EngineError, EngineResult};

/// Installs the helper functions used by the other page functions. Only
/// functions live on the page; data is always passed as an argument.
pub const CAPTURE_HELPERS: &str = r#"() => {
  const isSentinel = s => s === 'document' || s === 'body' || s === 'body:noclip' || s === 'viewport';
  window.__snapgateTools = Object.freeze({
    exists: selector => isSentinel(selector) || document.querySelector(selector) !== null,
    isVisible: selector => {
      if (isSentinel(selector)) return true;
      const el = document.querySelector(selector);
      if (!el) return false;
      const style = window.getComputedStyle(el);
      const rect = el.getBoundingClientRect();
      return style.display !== 'none' && style.visibility !== 'hidden' && rect.width > 0 && rect.height > 0;
    },
    expand: selectors => selectors.reduce((acc, selector) => {
      if (isSentinel(selector)) return acc.concat([selector]);
      const found = document.querySelectorAll(selector);
      if (found.length < 2) return acc.concat([selector]);
      return acc.concat(Array.from(found).map((el, i) => {
        if (i === 0) return selector;
        el.classList.add('__n' + i);
        return selector + '.__n' + i;
      }));
    }, [])
  });
  return true;
}"#;

const RESOLVE_SELECTORS: &str = r#"({ selectors, expand }) => {
  const tools = window.__snapgateTools;
  const list = expand ? tools.expand(selectors) : selectors;
  return list.map(selector => ({
    selector,
    exists: tools.exists(selector),
    isVisible: tools.isVisible(selector)
  }));
}"#;

/// How a selector is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Document screenshot; `full_page` is false for plain `body`
    Document { full_page: bool },
    Viewport,
    Element,
}

pub fn classify(selector: &str) -> CaptureKind {
    match selector {
        DOCUMENT_SELECTOR | NOCLIP_SELECTOR => CaptureKind::Document { full_page: true },
        BODY_SELECTOR => CaptureKind::Document { full_page: false },
        VIEWPORT_SELECTOR => CaptureKind::Viewport,
        _ => CaptureKind::Element,
    }
}

/// Split grouping tokens and fall back to the whole document.
pub fn normalize_selectors(raw: &[String]) -> Vec<String> {
    let selectors: Vec<String> = raw
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if selectors.is_empty() {
        vec![DOCUMENT_SELECTOR.to_string()]
    } else {
        selectors
    }
}

/// Ordered selectors plus their page state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSelectors {
    pub selectors: Vec<String>,
    pub states: HashMap<String, SelectorState>,
}

impl ResolvedSelectors {
    pub fn state(&self, selector: &str) -> SelectorState {
        self.states.get(selector).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageSelector {
    selector: String,
    #[serde(default)]
    exists: bool,
    #[serde(default)]
    is_visible: bool,
}

/// Query the live page for every selector of the scenario.
pub async fn resolve(
    session: &mut dyn BrowserSession,
    raw: &[String],
    expand: bool,
) -> EngineResult<ResolvedSelectors> {
    let selectors = normalize_selectors(raw);
    let value = session
        .evaluate(RESOLVE_SELECTORS, json!({ "selectors": selectors, "expand": expand }))
        .await?;
    let entries: Vec<PageSelector> = serde_json::from_value(value)
        .map_err(|e| EngineError::Evaluation(format!("unexpected selector result: {}", e)))?;

    let mut resolved = ResolvedSelectors::default();
    for entry in entries {
        let state = if is_sentinel(&entry.selector) {
            SelectorState::present()
        } else {
            SelectorState {
                exists: entry.exists,
                is_visible: entry.is_visible,
                file_path: None,
            }
        };
        debug!(
            selector = %entry.selector,
            exists = state.exists,
            visible = state.is_visible,
            "Resolved selector"
        );
        resolved.states.insert(entry.selector.clone(), state);
        resolved.selectors.push(entry.selector);
    }
    Ok(resolved)
}
