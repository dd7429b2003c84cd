//! Debounce, throttle and layout-stability state machines
//!
//! The renderers drive these with explicit `Instant`s rather than installing
//! timers, so every timing rule (style reapplication, scroll detection,
//! resize gating, page-turn animation) is deterministic under test.

use std::time::{Duration, Instant};

/// Style reapplication debounce window.
pub const STYLE_DEBOUNCE: Duration = Duration::from_millis(50);

/// Resize reflow debounce window.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Scroll-driven page detection throttle window.
pub const SCROLL_THROTTLE: Duration = Duration::from_millis(250);

/// Wheel page-turn cooldown, preventing multi-page skips per scroll burst.
pub const WHEEL_COOLDOWN: Duration = Duration::from_millis(250);

/// Progress persistence debounce window.
pub const PROGRESS_DEBOUNCE: Duration = Duration::from_millis(5000);

/// Page transition length.
pub const PAGE_TURN_DURATION: Duration = Duration::from_millis(300);

/// Trailing-edge debouncer.
///
/// Each [`Debouncer::trigger`] restarts the window; [`Debouncer::fire`]
/// reports true once the window has elapsed with no further triggers.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Record an event, restarting the quiet window.
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// True once the quiet window has elapsed. Consumes the pending state.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a trigger is waiting for its window to elapse.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Drop any pending trigger without firing.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Leading-edge throttle: the first event passes, later events are dropped
/// until the window elapses.
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True if the event should be handled now.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Number of consecutive identical samples that count as a stable layout.
pub const STABLE_FRAMES: u32 = 5;

/// Hard cap on stability polls before proceeding regardless.
pub const MAX_STABILITY_POLLS: u32 = 15;

/// Outcome of one layout-stability poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Keep polling on the next frame.
    Unsettled,
    /// Dimensions held still long enough; safe to relayout.
    Stable,
    /// Poll budget exhausted; proceed anyway.
    GaveUp,
}

/// Layout-stability gate: samples container dimensions across animation
/// frames and reports stable once they stop changing for [`STABLE_FRAMES`]
/// consecutive polls, or after [`MAX_STABILITY_POLLS`] total polls.
#[derive(Debug)]
pub struct LayoutStabilityGate {
    last_size: Option<(u32, u32)>,
    stable_count: u32,
    polls: u32,
}

impl LayoutStabilityGate {
    pub fn new() -> Self {
        Self {
            last_size: None,
            stable_count: 0,
            polls: 0,
        }
    }

    /// Feed one per-frame dimension sample.
    pub fn poll(&mut self, width: u32, height: u32) -> Stability {
        self.polls += 1;
        if self.last_size == Some((width, height)) {
            self.stable_count += 1;
        } else {
            self.last_size = Some((width, height));
            self.stable_count = 1;
        }

        if self.stable_count >= STABLE_FRAMES {
            Stability::Stable
        } else if self.polls >= MAX_STABILITY_POLLS {
            Stability::GaveUp
        } else {
            Stability::Unsettled
        }
    }

    pub fn reset(&mut self) {
        self.last_size = None;
        self.stable_count = 0;
        self.polls = 0;
    }
}

impl Default for LayoutStabilityGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Quadratic ease-out curve over `t ∈ [0, 1]`.
pub fn ease_out_quad(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * (2.0 - t)
}

/// A running slide+fade page transition.
#[derive(Debug, Clone, Copy)]
pub struct PageTurnAnimation {
    started: Instant,
    duration: Duration,
    /// +1 for forward turns, -1 for backward.
    pub sign: f32,
}

impl PageTurnAnimation {
    pub fn new(now: Instant, forward: bool) -> Self {
        Self {
            started: now,
            duration: PAGE_TURN_DURATION,
            sign: if forward { 1.0 } else { -1.0 },
        }
    }

    /// Eased animation progress in `[0, 1]`.
    pub fn progress(&self, now: Instant) -> f32 {
        let elapsed = now.duration_since(self.started).as_secs_f32();
        let total = self.duration.as_secs_f32();
        ease_out_quad(elapsed / total)
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.duration
    }

    /// Horizontal slide offset at `now`, as a fraction of the page width.
    /// Starts at ±1 (offscreen) and eases to 0.
    pub fn slide_offset(&self, now: Instant) -> f32 {
        self.sign * (1.0 - self.progress(now))
    }

    /// Opacity at `now`, fading in from 0 to 1.
    pub fn opacity(&self, now: Instant) -> f32 {
        self.progress(now)
    }
}
