//! Human behavior simulation over a live page.
//!
//! Drives one page at a time through CDP input events whose timing and
//! motion statistics resemble a human operator. All operations are async
//! and must be awaited sequentially; nothing here runs concurrently with
//! itself; pipelined pointer or keyboard events would themselves look
//! inhuman. Plans come from [`planner`]; this module only dispatches them.

pub mod clock;
pub mod planner;

pub use clock::{Clock, TokioClock};
pub use planner::ScrollDirection;

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::Page;
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::session::wait_for_selector;
use planner::{KeyAction, ReadingStep};

/// Named delay tiers: clicking, thinking, reading.
pub const SHORT_DELAY_MS: (u64, u64) = (100, 400);
pub const MEDIUM_DELAY_MS: (u64, u64) = (500, 1500);
pub const LONG_DELAY_MS: (u64, u64) = (2000, 5000);

/// Resolved element geometry in viewport coordinates.
#[derive(Debug, Clone, Copy, Deserialize)]
struct ElementBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Duration-bounded reading loop. Split out so the exit condition and the
/// per-iteration draw can be exercised on a fake clock.
pub struct ReadingLoop {
    clock: Arc<dyn Clock>,
    started: Duration,
    budget: Duration,
}

impl ReadingLoop {
    pub fn new(clock: Arc<dyn Clock>, budget: Duration) -> Self {
        let started = clock.now();
        Self {
            clock,
            started,
            budget,
        }
    }

    /// Draw the next iteration's action, or `None` once the wall-clock
    /// budget has elapsed. The only exit is the budget; callers wanting to
    /// abort earlier must tear down the page.
    pub fn next_step(&self, rng: &mut impl Rng) -> Option<ReadingStep> {
        if self.clock.now().saturating_sub(self.started) >= self.budget {
            return None;
        }
        Some(planner::reading_step(rng))
    }
}

/// Simulates human input on one page.
///
/// Tracks the pointer position between operations so every movement starts
/// where the previous one ended.
pub struct HumanBehavior {
    page: Page,
    cursor: (f64, f64),
    clock: Arc<dyn Clock>,
}

impl HumanBehavior {
    pub fn new(page: Page) -> Self {
        Self::with_clock(page, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(page: Page, clock: Arc<dyn Clock>) -> Self {
        Self {
            page,
            // Pointer starts somewhere unremarkable, not (0,0).
            cursor: (200.0, 200.0),
            clock,
        }
    }

    /// Sleep a uniformly-drawn duration between the given bounds.
    pub async fn delay(&self, min_ms: u64, max_ms: u64) {
        let ms = { rand::thread_rng().gen_range(min_ms..=max_ms) };
        self.clock.sleep(Duration::from_millis(ms)).await;
    }

    /// Clicking-scale pause.
    pub async fn short_pause(&self) {
        self.delay(SHORT_DELAY_MS.0, SHORT_DELAY_MS.1).await;
    }

    /// Thinking-scale pause.
    pub async fn medium_pause(&self) {
        self.delay(MEDIUM_DELAY_MS.0, MEDIUM_DELAY_MS.1).await;
    }

    /// Reading-scale pause.
    pub async fn long_pause(&self) {
        self.delay(LONG_DELAY_MS.0, LONG_DELAY_MS.1).await;
    }

    /// Resolve a selector to its bounding box, failing with a typed error
    /// naming the selector when it is missing or has no box. Nothing is
    /// dispatched to the page before this resolution succeeds.
    async fn resolve_box(&self, selector: &str) -> Result<ElementBox> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return null;
                const r = el.getBoundingClientRect();
                return {{ x: r.x, y: r.y, width: r.width, height: r.height }};
            }})()"#,
            sel = js_string(selector),
        );
        let value = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(EngineError::cdp)?
            .value()
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        element_box_from_value(selector, value)
    }

    /// Move the pointer along a quadratic Bézier curve to the target,
    /// updating the tracked position.
    pub async fn move_to(&mut self, target_x: f64, target_y: f64) -> Result<()> {
        let path = {
            let mut rng = rand::thread_rng();
            planner::bezier_path(self.cursor, (target_x, target_y), &mut rng)
        };

        for (x, y) in path {
            self.page
                .execute(
                    DispatchMouseEventParams::builder()
                        .r#type(DispatchMouseEventType::MouseMoved)
                        .x(x)
                        .y(y)
                        .button(MouseButton::None)
                        .build()
                        .map_err(EngineError::Cdp)?,
                )
                .await
                .map_err(EngineError::cdp)?;

            let step_ms = { rand::thread_rng().gen_range(8..=25) };
            self.clock.sleep(Duration::from_millis(step_ms)).await;
        }

        self.cursor = (target_x, target_y);
        Ok(())
    }

    /// Move to a point inside the target's inner band, pause, click.
    pub async fn click(&mut self, selector: &str) -> Result<()> {
        let bounds = self.resolve_box(selector).await?;
        let (x, y) = {
            let mut rng = rand::thread_rng();
            planner::click_point(bounds.x, bounds.y, bounds.width, bounds.height, &mut rng)
        };
        self.move_to(x, y).await?;
        self.short_pause().await;
        self.dispatch_click(x, y, 1).await?;
        debug!(selector, "clicked");
        Ok(())
    }

    /// Double click: two press/release pairs with a human-scale gap.
    pub async fn double_click(&mut self, selector: &str) -> Result<()> {
        let bounds = self.resolve_box(selector).await?;
        let (x, y) = {
            let mut rng = rand::thread_rng();
            planner::click_point(bounds.x, bounds.y, bounds.width, bounds.height, &mut rng)
        };
        self.move_to(x, y).await?;
        self.short_pause().await;
        self.dispatch_click(x, y, 1).await?;
        let gap_ms = { rand::thread_rng().gen_range(60..=120) };
        self.clock.sleep(Duration::from_millis(gap_ms)).await;
        self.dispatch_click(x, y, 2).await?;
        Ok(())
    }

    /// Move near the element's center with a little jitter, then linger
    /// the way a human does while reading a tooltip or hover state.
    pub async fn hover(&mut self, selector: &str) -> Result<()> {
        let bounds = self.resolve_box(selector).await?;
        let (x, y) = {
            let mut rng = rand::thread_rng();
            (
                bounds.x + bounds.width / 2.0 + rng.gen_range(-4.0..4.0),
                bounds.y + bounds.height / 2.0 + rng.gen_range(-4.0..4.0),
            )
        };
        self.move_to(x, y).await?;
        self.medium_pause().await;
        Ok(())
    }

    /// Click the target, clear any existing content, then type the text
    /// one keypress at a time with human inter-key timing.
    pub async fn type_text(&mut self, selector: &str, text: &str, make_typos: bool) -> Result<()> {
        self.click(selector).await?;

        // Select-all and clear whatever the field held.
        let clear = r#"(() => {
            const el = document.activeElement;
            if (el && 'value' in el) {
                el.select && el.select();
                el.value = '';
                el.dispatchEvent(new Event('input', { bubbles: true }));
            }
        })()"#;
        self.page
            .evaluate(clear)
            .await
            .map_err(EngineError::cdp)?;

        let plan = {
            let mut rng = rand::thread_rng();
            planner::typing_plan(text, make_typos, &mut rng)
        };

        for step in plan {
            match step.action {
                KeyAction::Press(c) => self.dispatch_keypress(c).await?,
                KeyAction::Backspace => self.dispatch_backspace().await?,
            }
            self.clock.sleep(Duration::from_millis(step.delay_ms)).await;
        }
        debug!(selector, chars = text.chars().count(), "typed");
        Ok(())
    }

    /// Issue a stepped wheel scroll with a settle pause afterwards.
    pub async fn scroll(&mut self, direction: ScrollDirection) -> Result<()> {
        let plan = {
            let mut rng = rand::thread_rng();
            planner::scroll_plan(direction, &mut rng)
        };
        self.dispatch_scroll_steps(&plan).await?;
        self.short_pause().await;
        Ok(())
    }

    /// Scroll the target element toward the viewport center, stepped the
    /// same way as [`scroll`].
    pub async fn scroll_to_element(&mut self, selector: &str) -> Result<()> {
        let bounds = self.resolve_box(selector).await?;
        let viewport_height = self
            .page
            .evaluate("window.innerHeight")
            .await
            .map_err(EngineError::cdp)?
            .value()
            .and_then(|v| v.as_f64())
            .unwrap_or(720.0);

        let delta = bounds.y + bounds.height / 2.0 - viewport_height / 2.0;
        let plan = {
            let mut rng = rand::thread_rng();
            planner::split_delta(delta, &mut rng)
        };
        self.dispatch_scroll_steps(&plan).await?;
        self.short_pause().await;
        Ok(())
    }

    /// Alternate biased-random scrolling with pauses and occasional
    /// untargeted pointer drift until the wall-clock budget elapses.
    pub async fn simulate_reading(&mut self, duration: Duration) -> Result<()> {
        let (viewport_w, viewport_h) = {
            let value = self
                .page
                .evaluate("(() => ({ w: window.innerWidth, h: window.innerHeight }))()")
                .await
                .map_err(EngineError::cdp)?
                .value()
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            (
                value.get("w").and_then(|v| v.as_f64()).unwrap_or(1280.0),
                value.get("h").and_then(|v| v.as_f64()).unwrap_or(720.0),
            )
        };

        let reading = ReadingLoop::new(Arc::clone(&self.clock), duration);
        loop {
            let step = {
                let mut rng = rand::thread_rng();
                reading.next_step(&mut rng)
            };
            let Some(step) = step else { break };

            let plan = {
                let mut rng = rand::thread_rng();
                planner::scroll_plan(step.direction, &mut rng)
            };
            self.dispatch_scroll_steps(&plan).await?;

            if step.pointer_drift {
                let (x, y) = {
                    let mut rng = rand::thread_rng();
                    (
                        rng.gen_range(0.1..0.9) * viewport_w,
                        rng.gen_range(0.1..0.9) * viewport_h,
                    )
                };
                self.move_to(x, y).await?;
            }

            self.clock
                .sleep(Duration::from_millis(step.pause_ms))
                .await;
        }
        debug!(budget_ms = duration.as_millis() as u64, "reading simulation finished");
        Ok(())
    }

    /// Wait for the selector to become visible, pause, then click it.
    pub async fn wait_and_click(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        wait_for_selector(&self.page, selector, timeout).await?;
        self.medium_pause().await;
        self.click(selector).await
    }

    /// Scroll the field into view, pause, and type with self-corrections.
    pub async fn fill_field(&mut self, selector: &str, value: &str) -> Result<()> {
        self.scroll_to_element(selector).await?;
        self.short_pause().await;
        self.type_text(selector, value, true).await
    }

    async fn dispatch_click(&self, x: f64, y: f64, click_count: i64) -> Result<()> {
        self.page
            .execute(
                DispatchMouseEventParams::builder()
                    .r#type(DispatchMouseEventType::MousePressed)
                    .x(x)
                    .y(y)
                    .button(MouseButton::Left)
                    .click_count(click_count)
                    .build()
                    .map_err(EngineError::Cdp)?,
            )
            .await
            .map_err(EngineError::cdp)?;

        let hold_ms = { rand::thread_rng().gen_range(40..=120) };
        self.clock.sleep(Duration::from_millis(hold_ms)).await;

        self.page
            .execute(
                DispatchMouseEventParams::builder()
                    .r#type(DispatchMouseEventType::MouseReleased)
                    .x(x)
                    .y(y)
                    .button(MouseButton::Left)
                    .click_count(click_count)
                    .build()
                    .map_err(EngineError::Cdp)?,
            )
            .await
            .map_err(EngineError::cdp)?;
        Ok(())
    }

    async fn dispatch_keypress(&self, c: char) -> Result<()> {
        self.page
            .execute(
                DispatchKeyEventParams::builder()
                    .r#type(DispatchKeyEventType::KeyDown)
                    .text(c.to_string())
                    .build()
                    .map_err(EngineError::Cdp)?,
            )
            .await
            .map_err(EngineError::cdp)?;
        self.page
            .execute(
                DispatchKeyEventParams::builder()
                    .r#type(DispatchKeyEventType::KeyUp)
                    .build()
                    .map_err(EngineError::Cdp)?,
            )
            .await
            .map_err(EngineError::cdp)?;
        Ok(())
    }

    async fn dispatch_backspace(&self) -> Result<()> {
        self.page
            .execute(
                DispatchKeyEventParams::builder()
                    .r#type(DispatchKeyEventType::RawKeyDown)
                    .key("Backspace")
                    .code("Backspace")
                    .windows_virtual_key_code(8)
                    .native_virtual_key_code(8)
                    .build()
                    .map_err(EngineError::Cdp)?,
            )
            .await
            .map_err(EngineError::cdp)?;
        self.page
            .execute(
                DispatchKeyEventParams::builder()
                    .r#type(DispatchKeyEventType::KeyUp)
                    .key("Backspace")
                    .code("Backspace")
                    .build()
                    .map_err(EngineError::Cdp)?,
            )
            .await
            .map_err(EngineError::cdp)?;
        Ok(())
    }

    async fn dispatch_scroll_steps(&self, plan: &[f64]) -> Result<()> {
        for delta in plan {
            self.page
                .execute(
                    DispatchMouseEventParams::builder()
                        .r#type(DispatchMouseEventType::MouseWheel)
                        .x(self.cursor.0)
                        .y(self.cursor.1)
                        .button(MouseButton::None)
                        .delta_x(0.0)
                        .delta_y(*delta)
                        .build()
                        .map_err(EngineError::Cdp)?,
                )
                .await
                .map_err(EngineError::cdp)?;

            let step_ms = { rand::thread_rng().gen_range(80..=150) };
            self.clock.sleep(Duration::from_millis(step_ms)).await;
        }
        Ok(())
    }
}

/// Quote a selector as a JS string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Map the in-page query result to a usable box or a typed failure naming
/// the selector. `null` means no match; a zero-sized box means the element
/// exists but cannot receive pointer events.
fn element_box_from_value(selector: &str, value: serde_json::Value) -> Result<ElementBox> {
    if value.is_null() {
        return Err(EngineError::ElementNotFound {
            selector: selector.to_string(),
        });
    }
    let bounds: ElementBox = serde_json::from_value(value)
        .map_err(|e| EngineError::Cdp(format!("unexpected bounding box shape: {e}")))?;
    if bounds.width <= 0.0 || bounds.height <= 0.0 {
        return Err(EngineError::NotInteractable {
            selector: selector.to_string(),
        });
    }
    Ok(bounds)
}
