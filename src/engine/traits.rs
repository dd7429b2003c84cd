//! The renderer contract
//!
//! Every backend (reflowable or fixed-raster) implements [`BookRenderer`].
//! This is the seam that lets the reader shell treat every book format
//! uniformly: the two implementations differ entirely in mechanism but never
//! in observable surface.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──▶ mount() ──▶ open() ──▶ navigation / settings / annotations
//!                                        │
//!                                        ▼
//!                                   destroy()   (idempotent)
//! ```
//!
//! Navigation before `open()` resolves, and any call after `destroy()`, is a
//! silent no-op, never a panic or error.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::{EventKind, ListenerId, RendererEvent};
use super::location::{Location, PersistedLocation, Selection};
use super::types::{AnnotationMark, ParsedBook, Theme, TocItem, ViewMode, ViewSettings};
use crate::paging::PageDirection;

/// Snapshot of the host container the renderer draws into
///
/// The container element is exclusively owned by the active renderer between
/// `mount()` and `destroy()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    /// Screen density multiplier for backing-store sizing
    pub device_pixel_ratio: f32,
    /// False while the document is in a background tab; transitions are
    /// skipped when hidden
    pub visible: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            device_pixel_ratio: 1.0,
            visible: true,
        }
    }
}

/// Source document handed to `open()`
pub enum BookSource {
    /// Pre-parsed book object from the document loader (reflowable path)
    Parsed(Box<ParsedBook>),
    /// Raw container bytes (fixed-raster path; the rasterizer parses)
    Bytes(Vec<u8>),
}

/// Options for `open()`
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Location persisted from a previous session
    pub initial_location: Option<PersistedLocation>,
    /// Target chapter when no persisted location exists
    pub initial_chapter: Option<usize>,
    pub settings: ViewSettings,
}

/// Navigation target accepted by `go_to`
#[derive(Debug, Clone)]
pub enum NavTarget {
    Location(Location),
    Persisted(PersistedLocation),
    /// TOC href, resolved against the book's sections
    Href(String),
}

/// Lifecycle phase of a renderer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Created,
    Mounted,
    /// `open()` in flight
    Opening,
    Ready,
    Destroyed,
}

impl LifecyclePhase {
    /// Navigation and settings are live only here.
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecyclePhase::Ready)
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, LifecyclePhase::Destroyed)
    }
}

/// The operation surface every renderer implements
#[async_trait]
pub trait BookRenderer: Send + Sync {
    // Lifecycle

    /// Attach to the host container. Must be called exactly once, before
    /// `open()`.
    fn mount(&self, viewport: Viewport);

    /// Parse/lay out the source and navigate to the initial location.
    /// Load failures surface as a `Failed` event, never as an `Err`; the UI
    /// has one failure channel.
    async fn open(&self, source: BookSource, options: OpenOptions);

    /// Tear down completely: cancel in-flight animation, drop listeners,
    /// release the underlying engine, clear caches. Idempotent.
    async fn destroy(&self);

    // Navigation

    async fn go_to(&self, target: NavTarget);
    async fn go_to_index(&self, index: usize);
    async fn next(&self);
    async fn prev(&self);

    /// Resolve a click into a page turn using the three-zone model.
    async fn handle_click(&self, x: f32, y: f32);

    /// Drive debounced work (style application, resize settling, transition
    /// frames). Hosts call this once per animation frame.
    async fn tick(&self, now: Instant);

    /// Per-frame container dimension notification. Feeds the resize debounce
    /// and layout-stability gate.
    async fn resize(&self, width: f32, height: f32);

    // Info

    fn toc(&self) -> Vec<TocItem>;
    fn current_location(&self) -> Option<Location>;
    /// Reading progress in `[0, 1]`.
    fn progress(&self) -> f32;
    fn total_pages(&self) -> usize;

    // Selection

    fn selection(&self) -> Option<Selection>;

    // Annotations (mirrored from the external store)

    fn add_annotation(&self, mark: AnnotationMark);
    fn remove_annotation(&self, id: &str);
    /// Remove every mirrored mark, fully reconciling the overlay to an
    /// empty external set.
    fn clear_annotations(&self);

    // View settings

    fn set_font_size(&self, size: f32);
    fn set_line_height(&self, line_height: f32);
    fn set_theme(&self, theme: Theme);
    fn set_view_mode(&self, mode: ViewMode);

    // Events

    fn on(&self, kind: EventKind, id: ListenerId, callback: Box<dyn Fn(&RendererEvent) + Send + Sync>);
    fn off(&self, kind: EventKind, id: ListenerId);
}

/// Map a turn direction onto the next/prev contract calls.
///
/// Shared by both backends' click handling; kept here so the zone → call
/// mapping has exactly one home.
pub async fn apply_direction<R: BookRenderer + ?Sized>(renderer: &R, direction: PageDirection) {
    match direction {
        PageDirection::Prev => renderer.prev().await,
        PageDirection::Next => renderer.next().await,
        PageDirection::None => {}
    }
}
