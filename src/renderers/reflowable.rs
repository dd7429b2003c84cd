//! Reflowable renderer
//!
//! Drives an embedded layout engine (the [`ReflowEngine`] seam) for
//! CFI-addressed content: EPUB, FB2, MOBI. The renderer owns lifecycle,
//! event emission, debounced style/resize application and the annotation
//! overlay; the engine owns text layout and CFI resolution inside the
//! content frame.
//!
//! Coordinate spaces: the engine reports rects in its own frame space;
//! everything crossing the renderer boundary is mapped into container
//! space through the engine's [`FrameTransform`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::engine::{
    apply_direction, AnnotationMark, BookRenderer, BookSource, EventEmitter, EventKind,
    LifecyclePhase, ListenerId, LoadingStage, Location, NavTarget, OpenOptions, ParsedBook,
    PersistedLocation, Rect, RendererEvent, Result, Selection, Theme, TocItem, ViewMode,
    ViewSettings, Viewport,
};
use crate::loader::LoadedBook;
use crate::paging;
use crate::timing::{Debouncer, LayoutStabilityGate, Stability, RESIZE_DEBOUNCE, STYLE_DEBOUNCE};

/// Budget for parse and initial layout work during `open()`.
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Navigation target in engine terms
#[derive(Debug, Clone)]
pub enum EngineTarget {
    Cfi(String),
    Index(usize),
    Href(String),
}

/// Position reported by the engine after navigation or relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePosition {
    pub cfi: String,
    pub chapter_index: usize,
}

/// Raw selection capture in frame space
#[derive(Debug, Clone)]
pub struct EngineSelection {
    pub text: String,
    pub start_cfi: String,
    pub end_cfi: String,
    pub chapter_index: usize,
    pub rects: Vec<Rect>,
}

/// Frame-to-container coordinate mapping
///
/// Fixed-layout frames are scaled to fit, so each axis carries its own
/// factor.
#[derive(Debug, Clone, Copy)]
pub struct FrameTransform {
    pub sx: f32,
    pub sy: f32,
    pub dx: f32,
    pub dy: f32,
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            sx: 1.0,
            sy: 1.0,
            dx: 0.0,
            dy: 0.0,
        }
    }
}

impl FrameTransform {
    pub fn apply(&self, rect: &Rect) -> Rect {
        rect.scaled_then_translated(self.sx, self.sy, self.dx, self.dy)
    }
}

/// The embedded layout engine the reflowable renderer drives
///
/// Implementations lay out parsed book sections inside a content frame and
/// resolve CFIs to positions and rects. All methods are best-effort from the
/// renderer's point of view: a failing call is logged and degraded, never
/// escalated past the renderer boundary.
pub trait ReflowEngine: Send + Sync {
    /// Load a parsed book and perform initial layout.
    fn load(&self, book: Arc<ParsedBook>, viewport: Viewport) -> Result<()>;

    /// Navigate to a target, returning the settled position.
    fn display(&self, target: &EngineTarget) -> Result<EnginePosition>;

    /// Turn one page forward. `None` at the end of the book.
    fn next(&self) -> Result<Option<EnginePosition>>;

    /// Turn one page backward. `None` at the beginning.
    fn prev(&self) -> Result<Option<EnginePosition>>;

    fn current(&self) -> Option<EnginePosition>;

    fn apply_styles(&self, settings: &ViewSettings);

    /// Re-run layout for new container dimensions.
    fn relayout(&self, viewport: Viewport) -> Result<()>;

    /// Live selection capture, if any.
    fn selection(&self) -> Option<EngineSelection>;

    /// Frame-space rects covering a CFI range. Recomputed on every call so
    /// overlay geometry follows reflows.
    fn locate_rects(&self, cfi: &str) -> Vec<Rect>;

    fn frame_transform(&self) -> FrameTransform;

    /// Release the engine and its frame.
    fn unload(&self);
}

/// Overlay shape style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayStyle {
    /// Translucent fill behind the text
    Fill,
    /// Wavy underline marking a highlight that carries a note
    WavyUnderline,
}

/// One drawable shape of the annotation overlay, in container space
#[derive(Debug, Clone)]
pub struct OverlayShape {
    pub mark_id: String,
    pub rect: Rect,
    pub color: [f32; 4],
    pub style: OverlayStyle,
}

struct State {
    phase: LifecyclePhase,
    viewport: Viewport,
    book: Option<Arc<ParsedBook>>,
    toc: Vec<TocItem>,
    settings: ViewSettings,
    location: Option<Location>,
    selection: Option<Selection>,
    marks: Vec<AnnotationMark>,
    /// Per-section registry of mark ids carrying notes, rebuilt on every
    /// mutation of the mirrored set.
    section_notes: HashMap<usize, Vec<String>>,
    style_debounce: Debouncer,
    resize_debounce: Debouncer,
    pending_size: Option<(f32, f32)>,
    stability: Option<LayoutStabilityGate>,
}

impl State {
    fn new() -> Self {
        Self {
            phase: LifecyclePhase::Created,
            viewport: Viewport::default(),
            book: None,
            toc: Vec::new(),
            settings: ViewSettings::default(),
            location: None,
            selection: None,
            marks: Vec::new(),
            section_notes: HashMap::new(),
            style_debounce: Debouncer::new(STYLE_DEBOUNCE),
            resize_debounce: Debouncer::new(RESIZE_DEBOUNCE),
            pending_size: None,
            stability: None,
        }
    }

    fn rebuild_note_registry(&mut self) {
        self.section_notes.clear();
        for mark in &self.marks {
            if mark.has_note() {
                self.section_notes
                    .entry(mark.location.index())
                    .or_default()
                    .push(mark.id.clone());
            }
        }
    }
}

/// Renderer for CFI-addressed reflowable content
pub struct ReflowableRenderer {
    engine: Arc<dyn ReflowEngine>,
    events: EventEmitter,
    state: Mutex<State>,
}

impl ReflowableRenderer {
    pub fn new(engine: Arc<dyn ReflowEngine>) -> Self {
        Self {
            engine,
            events: EventEmitter::new(),
            state: Mutex::new(State::new()),
        }
    }

    /// Event registry, for `subscribe`-style attachment.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Mark ids carrying notes on a section.
    pub fn note_ids_for_section(&self, index: usize) -> Vec<String> {
        self.state
            .lock()
            .section_notes
            .get(&index)
            .cloned()
            .unwrap_or_default()
    }

    /// Drawable annotation overlay for the current section, container space.
    /// Rects are resolved through the engine on every call so they stay
    /// correct across reflows.
    pub fn overlay_shapes(&self) -> Vec<OverlayShape> {
        let (marks, current) = {
            let state = self.state.lock();
            if !state.phase.is_ready() {
                return Vec::new();
            }
            (state.marks.clone(), state.location.as_ref().map(|l| l.index()))
        };
        let Some(current) = current else {
            return Vec::new();
        };
        let transform = self.engine.frame_transform();

        let mut shapes = Vec::new();
        for mark in &marks {
            let Location::Cfi { cfi, chapter_index } = &mark.location else {
                continue;
            };
            if *chapter_index != current {
                continue;
            }
            let (color, style) = if mark.has_note() {
                (mark.color.stroke(), OverlayStyle::WavyUnderline)
            } else {
                (mark.color.fill(), OverlayStyle::Fill)
            };
            for rect in self.engine.locate_rects(cfi) {
                shapes.push(OverlayShape {
                    mark_id: mark.id.clone(),
                    rect: transform.apply(&rect),
                    color,
                    style,
                });
            }
        }
        shapes
    }

    /// Hit-test the overlay at a container point.
    pub fn annotation_at(&self, x: f32, y: f32) -> Option<AnnotationMark> {
        let hit = self
            .overlay_shapes()
            .into_iter()
            .find(|shape| shape.rect.contains(x, y))?;
        self.state
            .lock()
            .marks
            .iter()
            .find(|m| m.id == hit.mark_id)
            .cloned()
    }

    fn fail_open(&self, message: String) {
        warn!(%message, "open failed");
        self.state.lock().phase = LifecyclePhase::Mounted;
        self.events.emit(&RendererEvent::Failed(message));
    }

    /// Record a settled engine position and notify listeners.
    fn relocated(&self, position: EnginePosition) {
        let (location, progress, section_changed, title) = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            let total = state.book.as_ref().map_or(0, |b| b.section_count());
            let previous = state.location.as_ref().map(|l| l.index());
            let location = Location::cfi(position.cfi, position.chapter_index);
            state.location = Some(location.clone());
            let title = TocItem::find_by_index(&state.toc, position.chapter_index)
                .map(|item| item.title.clone());
            (
                location,
                paging::progress(position.chapter_index, total),
                previous != Some(position.chapter_index),
                title,
            )
        };
        if section_changed {
            self.events.emit(&RendererEvent::SectionLoaded {
                chapter_index: location.index(),
                chapter_title: title
                    .unwrap_or_else(|| format!("Chapter {}", location.index() + 1)),
            });
        }
        self.events
            .emit(&RendererEvent::LocationChanged { location, progress });
    }

    async fn display(&self, target: &EngineTarget) {
        if !self.state.lock().phase.is_ready() {
            return;
        }
        match self.engine.display(target) {
            Ok(position) => self.relocated(position),
            Err(err) => warn!(%err, ?target, "navigation failed"),
        }
    }

    async fn relayout_settled(&self) {
        let (viewport, current) = {
            let state = self.state.lock();
            (state.viewport, state.location.clone())
        };
        if let Err(err) = self.engine.relayout(viewport) {
            warn!(%err, "relayout failed");
            return;
        }
        // Pagination shifted; restore the reader's place.
        if let Some(Location::Cfi { cfi, chapter_index }) = current {
            let target = if cfi.is_empty() {
                EngineTarget::Index(chapter_index)
            } else {
                EngineTarget::Cfi(cfi)
            };
            if let Ok(position) = self.engine.display(&target) {
                self.relocated(position);
            }
        }
    }

    fn poll_selection(&self) {
        let next = self.engine.selection().and_then(|sel| {
            let transform = self.engine.frame_transform();
            let rects = sel.rects.iter().map(|r| transform.apply(r)).collect();
            Selection::from_capture(
                &sel.text,
                Location::cfi(sel.start_cfi, sel.chapter_index),
                Location::cfi(sel.end_cfi, sel.chapter_index),
                rects,
            )
        });
        let changed = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() || state.selection == next {
                false
            } else {
                state.selection = next.clone();
                true
            }
        };
        if changed {
            self.events.emit(&RendererEvent::Selected(next));
        }
    }

    fn touch_styles(&self) {
        let mut state = self.state.lock();
        if !state.phase.is_destroyed() {
            state.style_debounce.trigger(Instant::now());
        }
    }
}

#[async_trait]
impl BookRenderer for ReflowableRenderer {
    fn mount(&self, viewport: Viewport) {
        let mut state = self.state.lock();
        if !matches!(state.phase, LifecyclePhase::Created) {
            warn!(phase = ?state.phase, "mount on a non-fresh renderer ignored");
            return;
        }
        state.viewport = viewport;
        state.phase = LifecyclePhase::Mounted;
    }

    async fn open(&self, source: BookSource, options: OpenOptions) {
        {
            let mut state = self.state.lock();
            if !matches!(state.phase, LifecyclePhase::Mounted) {
                warn!(phase = ?state.phase, "open ignored");
                return;
            }
            state.phase = LifecyclePhase::Opening;
            state.settings = options.settings;
        }
        self.events
            .emit(&RendererEvent::Loading(LoadingStage::Detecting));

        let book = match source {
            BookSource::Parsed(book) => Arc::new(*book),
            BookSource::Bytes(bytes) => {
                self.events
                    .emit(&RendererEvent::Loading(LoadingStage::Parsing));
                let parsed =
                    timeout(OPEN_TIMEOUT, task::spawn_blocking(move || {
                        crate::loader::load(&bytes, None)
                    }))
                    .await;
                match parsed {
                    Ok(Ok(Ok(LoadedBook::Reflowable { book, .. }))) => Arc::new(*book),
                    Ok(Ok(Ok(LoadedBook::FixedRaster { .. }))) => {
                        return self.fail_open(
                            "fixed-layout source routed to the reflowable renderer".into(),
                        );
                    }
                    Ok(Ok(Err(err))) => return self.fail_open(err.to_string()),
                    Ok(Err(join)) => return self.fail_open(format!("parse task failed: {}", join)),
                    Err(_) => {
                        return self.fail_open(format!(
                            "parse timed out after {}s",
                            OPEN_TIMEOUT.as_secs()
                        ));
                    }
                }
            }
        };

        self.events
            .emit(&RendererEvent::Loading(LoadingStage::Layout));
        let viewport = self.state.lock().viewport;
        let engine = self.engine.clone();
        let layout = {
            let book = book.clone();
            timeout(
                OPEN_TIMEOUT,
                task::spawn_blocking(move || engine.load(book, viewport)),
            )
            .await
        };
        match layout {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => return self.fail_open(err.to_string()),
            Ok(Err(join)) => return self.fail_open(format!("layout task failed: {}", join)),
            Err(_) => {
                return self.fail_open(format!(
                    "layout timed out after {}s",
                    OPEN_TIMEOUT.as_secs()
                ));
            }
        }

        let toc = book.toc.clone();
        {
            let mut state = self.state.lock();
            state.toc = toc.clone();
            state.book = Some(book);
            state.phase = LifecyclePhase::Ready;
        }
        self.events.emit(&RendererEvent::TocReady(toc));
        self.engine.apply_styles(&options.settings);
        self.events
            .emit(&RendererEvent::Loading(LoadingStage::Ready));
        debug!("reflowable open complete");

        let target = match options.initial_location {
            Some(PersistedLocation::Cfi(cfi)) => EngineTarget::Cfi(cfi),
            Some(PersistedLocation::Spine(n)) | Some(PersistedLocation::Page(n)) => {
                EngineTarget::Index(n)
            }
            None => EngineTarget::Index(options.initial_chapter.unwrap_or(0)),
        };
        self.display(&target).await;
    }

    async fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if state.phase.is_destroyed() {
                return;
            }
            state.phase = LifecyclePhase::Destroyed;
            state.style_debounce.cancel();
            state.resize_debounce.cancel();
            state.stability = None;
            state.pending_size = None;
            state.selection = None;
            state.marks.clear();
            state.section_notes.clear();
            state.book = None;
            state.toc.clear();
            state.location = None;
        }
        self.engine.unload();
        self.events.clear();
        debug!("reflowable renderer destroyed");
    }

    async fn go_to(&self, target: NavTarget) {
        let engine_target = match target {
            NavTarget::Location(Location::Cfi { cfi, chapter_index }) => {
                if cfi.is_empty() {
                    EngineTarget::Index(chapter_index)
                } else {
                    EngineTarget::Cfi(cfi)
                }
            }
            NavTarget::Location(Location::PageCoord { page_index, .. }) => {
                EngineTarget::Index(page_index)
            }
            NavTarget::Persisted(PersistedLocation::Cfi(cfi)) => EngineTarget::Cfi(cfi),
            NavTarget::Persisted(PersistedLocation::Spine(n))
            | NavTarget::Persisted(PersistedLocation::Page(n)) => EngineTarget::Index(n),
            NavTarget::Href(href) => EngineTarget::Href(href),
        };
        self.display(&engine_target).await;
    }

    async fn go_to_index(&self, index: usize) {
        self.display(&EngineTarget::Index(index)).await;
    }

    async fn next(&self) {
        if !self.state.lock().phase.is_ready() {
            return;
        }
        match self.engine.next() {
            Ok(Some(position)) => self.relocated(position),
            Ok(None) => {}
            Err(err) => warn!(%err, "next failed"),
        }
    }

    async fn prev(&self) {
        if !self.state.lock().phase.is_ready() {
            return;
        }
        match self.engine.prev() {
            Ok(Some(position)) => self.relocated(position),
            Ok(None) => {}
            Err(err) => warn!(%err, "prev failed"),
        }
    }

    async fn handle_click(&self, x: f32, y: f32) {
        if !self.state.lock().phase.is_ready() {
            return;
        }
        // A click on a highlight belongs to the overlay, not to paging.
        if self.annotation_at(x, y).is_some() {
            return;
        }
        let width = self.state.lock().viewport.width;
        apply_direction(self, paging::direction(x, width)).await;
    }

    async fn tick(&self, now: Instant) {
        let styles = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            state.style_debounce.fire(now).then_some(state.settings)
        };
        if let Some(settings) = styles {
            self.engine.apply_styles(&settings);
        }

        let mut relayout = false;
        {
            let mut state = self.state.lock();
            if state.resize_debounce.fire(now) {
                state.stability = Some(LayoutStabilityGate::new());
            }
            let pending = state.pending_size;
            if let (Some(gate), Some((w, h))) = (state.stability.as_mut(), pending) {
                match gate.poll(w as u32, h as u32) {
                    Stability::Unsettled => {}
                    Stability::Stable | Stability::GaveUp => {
                        state.stability = None;
                        state.pending_size = None;
                        state.viewport.width = w;
                        state.viewport.height = h;
                        relayout = true;
                    }
                }
            }
        }
        if relayout {
            self.relayout_settled().await;
        }

        self.poll_selection();
    }

    async fn resize(&self, width: f32, height: f32) {
        let mut state = self.state.lock();
        if !state.phase.is_ready() {
            return;
        }
        let unchanged =
            state.viewport.width == width && state.viewport.height == height;
        if unchanged && state.stability.is_none() {
            return;
        }
        state.pending_size = Some((width, height));
        state.resize_debounce.trigger(Instant::now());
    }

    fn toc(&self) -> Vec<TocItem> {
        self.state.lock().toc.clone()
    }

    fn current_location(&self) -> Option<Location> {
        self.state.lock().location.clone()
    }

    fn progress(&self) -> f32 {
        let state = self.state.lock();
        let total = state.book.as_ref().map_or(0, |b| b.section_count());
        match &state.location {
            Some(location) => paging::progress(location.index(), total),
            None => 0.0,
        }
    }

    fn total_pages(&self) -> usize {
        self.state
            .lock()
            .book
            .as_ref()
            .map_or(0, |b| b.section_count())
    }

    fn selection(&self) -> Option<Selection> {
        self.state.lock().selection.clone()
    }

    fn add_annotation(&self, mark: AnnotationMark) {
        let mut state = self.state.lock();
        if state.phase.is_destroyed() {
            return;
        }
        match state.marks.iter_mut().find(|m| m.id == mark.id) {
            Some(existing) => *existing = mark,
            None => state.marks.push(mark),
        }
        state.rebuild_note_registry();
    }

    fn remove_annotation(&self, id: &str) {
        let mut state = self.state.lock();
        state.marks.retain(|m| m.id != id);
        state.rebuild_note_registry();
    }

    fn clear_annotations(&self) {
        let mut state = self.state.lock();
        state.marks.clear();
        state.section_notes.clear();
    }

    fn set_font_size(&self, size: f32) {
        self.state.lock().settings.font_size = size;
        self.touch_styles();
    }

    fn set_line_height(&self, line_height: f32) {
        self.state.lock().settings.line_height = line_height;
        self.touch_styles();
    }

    fn set_theme(&self, theme: Theme) {
        self.state.lock().settings.theme = theme;
        self.touch_styles();
    }

    fn set_view_mode(&self, mode: ViewMode) {
        self.state.lock().settings.view_mode = mode;
        self.touch_styles();
    }

    fn on(
        &self,
        kind: EventKind,
        id: ListenerId,
        callback: Box<dyn Fn(&RendererEvent) + Send + Sync>,
    ) {
        self.events.on(kind, id, move |event| callback(event));
    }

    fn off(&self, kind: EventKind, id: ListenerId) {
        self.events.off(kind, id);
    }
}
