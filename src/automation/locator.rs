//! Ordered fallback chains for finding (and activating) page elements.
//!
//! A [`LocatorChain`] is a list of strategies tried in order; the first one
//! that finds something wins. DOM strategies run as a single in-page script
//! that both finds and activates the element, so a poll never clicks twice.
//! Script errors and per-attempt timeouts count as a miss.

use crate::browser::driver::PageDriver;
use crate::core::error::AutomationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// First visible match of a CSS selector.
    Css { selector: String },
    /// Visible match whose trimmed text or `aria-label` equals (or, when
    /// `exact` is false, contains) `text`.
    Text {
        selector: String,
        text: String,
        exact: bool,
    },
    /// Topmost visible match whose top edge lies in `[min_y, max_y)`.
    Band {
        selector: String,
        min_y: f64,
        max_y: f64,
    },
    /// Visible match with the largest right edge.
    Rightmost { selector: String },
    /// Fixed viewport coordinates.
    Point { x: f64, y: f64 },
    /// Offset from the viewport centre.
    ViewportCenter { dx: f64, dy: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorStrategy {
    pub name: String,
    #[serde(flatten)]
    pub strategy: Strategy,
}

impl LocatorStrategy {
    pub fn css(selector: &str) -> Self {
        Self {
            name: format!("css {selector}"),
            strategy: Strategy::Css {
                selector: selector.to_string(),
            },
        }
    }

    pub fn text(selector: &str, text: &str) -> Self {
        Self {
            name: format!("text '{text}' in {selector}"),
            strategy: Strategy::Text {
                selector: selector.to_string(),
                text: text.to_string(),
                exact: true,
            },
        }
    }

    pub fn text_contains(selector: &str, text: &str) -> Self {
        Self {
            name: format!("text ~'{text}' in {selector}"),
            strategy: Strategy::Text {
                selector: selector.to_string(),
                text: text.to_string(),
                exact: false,
            },
        }
    }

    pub fn band(selector: &str, min_y: f64, max_y: f64) -> Self {
        Self {
            name: format!("{selector} within y[{min_y},{max_y})"),
            strategy: Strategy::Band {
                selector: selector.to_string(),
                min_y,
                max_y,
            },
        }
    }

    pub fn rightmost(selector: &str) -> Self {
        Self {
            name: format!("rightmost {selector}"),
            strategy: Strategy::Rightmost {
                selector: selector.to_string(),
            },
        }
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self {
            name: format!("point ({x},{y})"),
            strategy: Strategy::Point { x, y },
        }
    }

    pub fn viewport_center(dx: f64, dy: f64) -> Self {
        Self {
            name: format!("viewport centre {dx:+},{dy:+}"),
            strategy: Strategy::ViewportCenter { dx, dy },
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorChain {
    /// Human label used in logs and `ElementNotFound` errors.
    pub target: String,
    pub strategies: Vec<LocatorStrategy>,
}

impl LocatorChain {
    pub fn new(target: impl Into<String>, strategies: Vec<LocatorStrategy>) -> Self {
        Self {
            target: target.into(),
            strategies,
        }
    }

    fn tried(&self) -> String {
        self.strategies
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// What to do with the element once found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    None,
    Click,
    /// Click, then focus (editable regions).
    Focus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub strategy: String,
    pub index: usize,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeHit {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(Debug, Clone)]
pub struct ElementLocator {
    /// Budget for one attempt of one strategy.
    pub attempt_timeout: Duration,
    /// Delay between polls in [`ElementLocator::wait_for`].
    pub poll_interval: Duration,
}

impl Default for ElementLocator {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl ElementLocator {
    pub fn new(attempt_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            attempt_timeout,
            poll_interval,
        }
    }

    /// Tries each strategy exactly once, in order.
    pub async fn locate(
        &self,
        driver: &dyn PageDriver,
        chain: &LocatorChain,
        activation: Activation,
    ) -> Result<Located, AutomationError> {
        for (index, strategy) in chain.strategies.iter().enumerate() {
            if let Some(hit) = self
                .attempt_once(driver, strategy, activation, self.attempt_timeout)
                .await
            {
                debug!("locator: {} found via '{}'", chain.target, strategy.name);
                return Ok(Located {
                    strategy: strategy.name.clone(),
                    index,
                    x: hit.x,
                    y: hit.y,
                });
            }
        }
        Err(AutomationError::ElementNotFound {
            target: chain.target.clone(),
            tried: chain.tried(),
        })
    }

    /// Like [`locate`](Self::locate), but each strategy is polled until it
    /// matches or `budget` runs out before moving to the next one.
    pub async fn wait_for(
        &self,
        driver: &dyn PageDriver,
        chain: &LocatorChain,
        activation: Activation,
        budget: Duration,
    ) -> Result<Located, AutomationError> {
        for (index, strategy) in chain.strategies.iter().enumerate() {
            let deadline = Instant::now() + budget;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let per_attempt = remaining.min(self.attempt_timeout).max(Duration::from_millis(1));
                if let Some(hit) = self
                    .attempt_once(driver, strategy, activation, per_attempt)
                    .await
                {
                    debug!("locator: {} appeared via '{}'", chain.target, strategy.name);
                    return Ok(Located {
                        strategy: strategy.name.clone(),
                        index,
                        x: hit.x,
                        y: hit.y,
                    });
                }
                if Instant::now() + self.poll_interval >= deadline {
                    break;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(AutomationError::ElementNotFound {
            target: chain.target.clone(),
            tried: chain.tried(),
        })
    }

    async fn attempt_once(
        &self,
        driver: &dyn PageDriver,
        strategy: &LocatorStrategy,
        activation: Activation,
        budget: Duration,
    ) -> Option<ProbeHit> {
        match tokio::time::timeout(budget, attempt(driver, &strategy.strategy, activation)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                debug!("locator: '{}' errored: {}", strategy.name, e);
                None
            }
            Err(_) => {
                debug!("locator: '{}' timed out", strategy.name);
                None
            }
        }
    }
}

async fn attempt(
    driver: &dyn PageDriver,
    strategy: &Strategy,
    activation: Activation,
) -> Result<Option<ProbeHit>, AutomationError> {
    match strategy {
        Strategy::Point { x, y } => {
            if activation != Activation::None {
                driver.click_at(*x, *y).await?;
            }
            Ok(Some(ProbeHit {
                found: true,
                x: *x,
                y: *y,
            }))
        }
        Strategy::ViewportCenter { dx, dy } => {
            let dims = driver.evaluate(VIEWPORT_SCRIPT).await?;
            let (Some(w), Some(h)) = (dims["w"].as_f64(), dims["h"].as_f64()) else {
                return Ok(None);
            };
            let (x, y) = (w / 2.0 + dx, h / 2.0 + dy);
            if activation != Activation::None {
                driver.click_at(x, y).await?;
            }
            Ok(Some(ProbeHit { found: true, x, y }))
        }
        dom => {
            let Some(script) = dom_script(dom, activation) else {
                return Ok(None);
            };
            let value = driver.evaluate(&script).await?;
            let hit: Option<ProbeHit> = serde_json::from_value(value).ok();
            Ok(hit.filter(|h| h.found))
        }
    }
}

const VIEWPORT_SCRIPT: &str = "// probe:viewport\n(() => ({ w: document.documentElement.clientWidth || window.innerWidth, h: document.documentElement.clientHeight || window.innerHeight }))()";

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// In-page script for a DOM strategy. Returns `{found, x, y}`.
pub fn dom_script(strategy: &Strategy, activation: Activation) -> Option<String> {
    let (selector, pick) = match strategy {
        Strategy::Css { selector } => (selector, "all[0]".to_string()),
        Strategy::Text {
            selector,
            text,
            exact,
        } => {
            let q = js_str(text);
            let test = if *exact {
                format!("t === {q} || a === {q}")
            } else {
                format!("t.includes({q}) || a.includes({q})")
            };
            (
                selector,
                format!(
                    "all.find(el => {{ const t = (el.innerText || el.textContent || '').trim(); const a = (el.getAttribute('aria-label') || '').trim(); return {test}; }})"
                ),
            )
        }
        Strategy::Band {
            selector,
            min_y,
            max_y,
        } => (
            selector,
            format!(
                "all.filter(el => {{ const t = el.getBoundingClientRect().top; return t >= {min_y} && t < {max_y}; }}).sort((a, b) => a.getBoundingClientRect().top - b.getBoundingClientRect().top)[0]"
            ),
        ),
        Strategy::Rightmost { selector } => (
            selector,
            "all.slice().sort((a, b) => b.getBoundingClientRect().right - a.getBoundingClientRect().right)[0]".to_string(),
        ),
        Strategy::Point { .. } | Strategy::ViewportCenter { .. } => return None,
    };

    let act = match activation {
        Activation::None => "",
        Activation::Click => "el.click();",
        Activation::Focus => "el.click(); if (typeof el.focus === 'function') el.focus();",
    };

    Some(format!(
        r#"// probe:locate
(() => {{
  const visible = (el) => {{
    const r = el.getBoundingClientRect();
    const s = window.getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
  }};
  const all = Array.from(document.querySelectorAll({sel})).filter(visible);
  const el = {pick};
  if (!el) return {{ found: false }};
  try {{ el.scrollIntoView({{ block: 'center', inline: 'center' }}); }} catch (e) {{}}
  const r = el.getBoundingClientRect();
  {act}
  return {{ found: true, x: r.left + r.width / 2, y: r.top + r.height / 2 }};
}})()"#,
        sel = js_str(selector),
    ))
}
