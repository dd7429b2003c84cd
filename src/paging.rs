//! Pure pagination algorithms
//!
//! Format-agnostic helpers shared by both renderer backends. Everything in
//! this module is a pure function of its arguments so the click-zone model,
//! clamping rules and progress math can be tested exhaustively without a
//! renderer instance.

use serde::{Deserialize, Serialize};

/// Fraction of the container width that triggers a previous-page turn.
pub const PREV_ZONE_RATIO: f32 = 0.375;

/// Fraction of the container width beyond which a click turns to the next page.
pub const NEXT_ZONE_RATIO: f32 = 0.625;

/// Overlap kept between consecutive scroll steps in continuous mode.
pub const DEFAULT_SCROLL_OVERLAP: f32 = 0.1;

/// Page-turn direction resolved from an input gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    /// Turn to the previous page.
    Prev,
    /// Turn to the next page.
    Next,
    /// Middle zone: no page turn (UI toggle territory).
    None,
}

/// Resolve a click position into a page-turn direction.
///
/// The container is split into three zones: left 37.5% turns back, right
/// 37.5% turns forward, and the middle 25% is reserved for UI toggles.
/// A non-positive width yields [`PageDirection::None`].
pub fn direction(click_x: f32, container_width: f32) -> PageDirection {
    if container_width <= 0.0 {
        return PageDirection::None;
    }
    let ratio = click_x / container_width;
    if ratio < PREV_ZONE_RATIO {
        PageDirection::Prev
    } else if ratio > NEXT_ZONE_RATIO {
        PageDirection::Next
    } else {
        PageDirection::None
    }
}

/// Scroll step for continuous mode: one viewport minus the overlap band.
pub fn scroll_offset(container_height: f32, overlap_ratio: f32) -> f32 {
    container_height * (1.0 - overlap_ratio)
}

/// Apply a page turn to `current_page`, clamped to `[0, total_pages - 1]`.
///
/// Never panics; with zero total pages the result is 0.
pub fn navigate(direction: PageDirection, current_page: usize, total_pages: usize) -> usize {
    let last = total_pages.saturating_sub(1);
    match direction {
        PageDirection::Prev => current_page.saturating_sub(1).min(last),
        PageDirection::Next => current_page.saturating_add(1).min(last),
        PageDirection::None => current_page.min(last),
    }
}

/// Reading progress through a paginated document, in `[0, 1]`.
///
/// The current page counts as read, so the final page reports 1.0.
/// Documents with no pages report 0.
pub fn progress(current_page: usize, total_pages: usize) -> f32 {
    if total_pages == 0 {
        return 0.0;
    }
    (current_page + 1) as f32 / total_pages as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_zones() {
        assert_eq!(direction(100.0, 1000.0), PageDirection::Prev);
        assert_eq!(direction(500.0, 1000.0), PageDirection::None);
        assert_eq!(direction(900.0, 1000.0), PageDirection::Next);
    }

    #[test]
    fn direction_thresholds_are_exact() {
        // Exactly at a threshold stays in the middle zone.
        assert_eq!(direction(375.0, 1000.0), PageDirection::None);
        assert_eq!(direction(625.0, 1000.0), PageDirection::None);
        assert_eq!(direction(374.9, 1000.0), PageDirection::Prev);
        assert_eq!(direction(625.1, 1000.0), PageDirection::Next);
    }

    #[test]
    fn direction_is_a_function_of_the_ratio() {
        for (x, w) in [(75.0, 200.0), (300.0, 800.0), (37.5, 100.0)] {
            assert_eq!(direction(x, w), direction(x / w * 1000.0, 1000.0));
        }
    }

    #[test]
    fn direction_degenerate_width() {
        assert_eq!(direction(10.0, 0.0), PageDirection::None);
        assert_eq!(direction(10.0, -5.0), PageDirection::None);
    }

    #[test]
    fn navigate_clamps_at_both_ends() {
        assert_eq!(navigate(PageDirection::Next, 4, 10), 5);
        assert_eq!(navigate(PageDirection::Prev, 4, 10), 3);
        assert_eq!(navigate(PageDirection::Next, 9, 10), 9);
        assert_eq!(navigate(PageDirection::Prev, 0, 10), 0);
        assert_eq!(navigate(PageDirection::None, 4, 10), 4);
    }

    #[test]
    fn navigate_never_panics_on_empty() {
        assert_eq!(navigate(PageDirection::Next, 0, 0), 0);
        assert_eq!(navigate(PageDirection::Prev, 0, 0), 0);
    }

    #[test]
    fn progress_values() {
        assert_eq!(progress(4, 10), 0.5);
        assert_eq!(progress(0, 1), 1.0);
        assert_eq!(progress(0, 0), 0.0);
        assert_eq!(progress(9, 10), 1.0);
    }

    #[test]
    fn scroll_offset_keeps_overlap() {
        assert_eq!(scroll_offset(800.0, 0.1), 720.0);
        assert_eq!(scroll_offset(600.0, 0.0), 600.0);
    }
}
