//! Fixed-raster renderer
//!
//! Drives a [`PageRasterizer`] for page-addressed content (PDF). Pages are
//! rasterized lazily into per-page surfaces sized fit-to-width, scaled by
//! device pixel ratio and user zoom. Surfaces are kept only for the visible
//! neighborhood; everything else is dropped and re-rendered on demand.
//!
//! Page sizes start as a placeholder copied from the first page and are
//! corrected per page as each one renders, so mixed-size documents settle
//! into exact layout without an upfront full-document measure pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::engine::{
    apply_direction, AnnotationMark, BookRenderer, BookSource, EventEmitter, EventKind,
    LifecyclePhase, ListenerId, LoadingStage, Location, NavTarget, OpenOptions, PersistedLocation,
    Rect, RenderError, RendererEvent, Result, Selection, Theme, TocItem, ViewMode, ViewSettings,
    Viewport,
};
use crate::paging::{self, PageDirection};
use crate::renderers::reflowable::{OverlayShape, OverlayStyle};
use crate::timing::{
    Debouncer, LayoutStabilityGate, PageTurnAnimation, Stability, Throttle, RESIZE_DEBOUNCE,
    SCROLL_THROTTLE, WHEEL_COOLDOWN,
};
use uuid::Uuid;

/// Budget for opening the source document.
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Vertical gap between pages in scrolled mode, in container units.
const PAGE_GAP: f32 = 16.0;

/// Wheel deltas below this are ignored in paginated mode.
const WHEEL_THRESHOLD: f32 = 4.0;

/// A rasterized page surface
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// Backing-store width in physical pixels
    pub width: u32,
    /// Backing-store height in physical pixels
    pub height: u32,
    /// Encoded PNG bytes
    pub data: Vec<u8>,
}

/// A run of positioned text on a page, in page-point space
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub rect: Rect,
}

/// The page rasterization seam
///
/// Implementations own the source document. Calls are blocking; the renderer
/// moves them onto the blocking pool.
pub trait PageRasterizer: Send + Sync {
    /// Open a document, returning its page count.
    fn open(&self, bytes: &[u8]) -> Result<usize>;

    /// Natural page size in points.
    fn page_size(&self, index: usize) -> Result<(f32, f32)>;

    /// Render one page at the given scale.
    fn rasterize(&self, index: usize, scale: f32) -> Result<RasterPage>;

    /// Positioned text runs for one page, in page-point space. Empty for
    /// pages without a text layer.
    fn text_spans(&self, index: usize) -> Result<Vec<TextSpan>>;

    /// Release the document.
    fn close(&self);
}

/// Keyboard navigation keys understood by the fixed-raster renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Left,
    Right,
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
}

struct State {
    phase: LifecyclePhase,
    viewport: Viewport,
    settings: ViewSettings,
    page_count: usize,
    /// Natural page sizes in points. Entries start as a placeholder copied
    /// from page 0 and flip to exact once the page has rendered.
    page_sizes: Vec<(f32, f32)>,
    sized: Vec<bool>,
    current: usize,
    scroll: f32,
    toc: Vec<TocItem>,
    rendered: HashSet<usize>,
    rendering: HashSet<usize>,
    surfaces: HashMap<usize, Arc<RasterPage>>,
    scroll_throttle: Throttle,
    wheel_cooldown: Throttle,
    resize_debounce: Debouncer,
    pending_size: Option<(f32, f32)>,
    stability: Option<LayoutStabilityGate>,
    animation: Option<PageTurnAnimation>,
    marks: Vec<AnnotationMark>,
    /// Cached text runs per page, feeding the selection overlay.
    text_spans: HashMap<usize, Arc<Vec<TextSpan>>>,
    selection: Option<Selection>,
}

impl State {
    fn new() -> Self {
        Self {
            phase: LifecyclePhase::Created,
            viewport: Viewport::default(),
            settings: ViewSettings::default(),
            page_count: 0,
            page_sizes: Vec::new(),
            sized: Vec::new(),
            current: 0,
            scroll: 0.0,
            toc: Vec::new(),
            rendered: HashSet::new(),
            rendering: HashSet::new(),
            surfaces: HashMap::new(),
            scroll_throttle: Throttle::new(SCROLL_THROTTLE),
            wheel_cooldown: Throttle::new(WHEEL_COOLDOWN),
            resize_debounce: Debouncer::new(RESIZE_DEBOUNCE),
            pending_size: None,
            stability: None,
            animation: None,
            marks: Vec::new(),
            text_spans: HashMap::new(),
            selection: None,
        }
    }

    /// On-screen height of a page, fit to the container width.
    fn display_height(&self, index: usize) -> f32 {
        let (w, h) = self.page_sizes[index];
        if w <= 0.0 {
            return self.viewport.height;
        }
        self.viewport.width * h / w
    }

    /// Top of a page in the scrolled track.
    fn page_top(&self, index: usize) -> f32 {
        (0..index).map(|i| self.display_height(i) + PAGE_GAP).sum()
    }

    fn track_height(&self) -> f32 {
        self.page_top(self.page_count)
    }

    /// Rasterization scale for a page: fit-to-width, times DPR, times zoom.
    fn raster_scale(&self, index: usize) -> f32 {
        let (w, _) = self.page_sizes[index];
        if w <= 0.0 {
            return self.viewport.device_pixel_ratio;
        }
        self.viewport.width / w * self.viewport.device_pixel_ratio * self.settings.zoom
    }

    /// Page whose center is closest to the middle of the visible window.
    fn page_at_scroll(&self) -> usize {
        let target = self.scroll + self.viewport.height / 2.0;
        let mut best = 0;
        let mut best_distance = f32::MAX;
        for index in 0..self.page_count {
            let center = self.page_top(index) + self.display_height(index) / 2.0;
            let distance = (center - target).abs();
            if distance < best_distance {
                best_distance = distance;
                best = index;
            }
        }
        best
    }

    /// Container-space transform for a page: the uniform fit-to-width scale
    /// plus the vertical offset of the page in scrolled mode. `None` until
    /// the page has a usable width.
    fn page_transform(&self, index: usize) -> Option<(f32, f32)> {
        let (page_w, _) = self.page_sizes[index];
        if page_w <= 0.0 {
            return None;
        }
        let scale = self.viewport.width / page_w;
        let dy = match self.settings.view_mode {
            ViewMode::Paginated => 0.0,
            ViewMode::Scrolled => self.page_top(index) - self.scroll,
        };
        Some((scale, dy))
    }

    /// Pages worth keeping surfaces for: current ± 1 in paginated mode, the
    /// visible range padded by one screen in scrolled mode.
    fn wanted_pages(&self) -> Vec<usize> {
        if self.page_count == 0 {
            return Vec::new();
        }
        match self.settings.view_mode {
            ViewMode::Paginated => {
                let last = self.page_count - 1;
                let lo = self.current.saturating_sub(1);
                let hi = (self.current + 1).min(last);
                (lo..=hi).collect()
            }
            ViewMode::Scrolled => {
                let lo_edge = self.scroll - self.viewport.height;
                let hi_edge = self.scroll + 2.0 * self.viewport.height;
                (0..self.page_count)
                    .filter(|&i| {
                        let top = self.page_top(i);
                        let bottom = top + self.display_height(i);
                        bottom >= lo_edge && top <= hi_edge
                    })
                    .collect()
            }
        }
    }
}

/// Renderer for page-addressed fixed-raster content
pub struct FixedRasterRenderer {
    rasterizer: Arc<dyn PageRasterizer>,
    events: EventEmitter,
    state: Mutex<State>,
}

impl FixedRasterRenderer {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            rasterizer,
            events: EventEmitter::new(),
            state: Mutex::new(State::new()),
        }
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Rendered surface for a page, if present.
    pub fn surface(&self, index: usize) -> Option<Arc<RasterPage>> {
        self.state.lock().surfaces.get(&index).cloned()
    }

    /// Current slide/fade transition, as (horizontal offset fraction,
    /// opacity). `None` when no transition is running.
    pub fn transition(&self, now: Instant) -> Option<(f32, f32)> {
        let state = self.state.lock();
        state
            .animation
            .map(|anim| (anim.slide_offset(now), anim.opacity(now)))
    }

    /// Scroll the track in scrolled mode. Page detection is throttled so a
    /// fast fling emits at most one relocation per window.
    pub async fn scroll_to(&self, offset: f32, now: Instant) {
        let relocated = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() || state.settings.view_mode != ViewMode::Scrolled {
                return;
            }
            let max = (state.track_height() - state.viewport.height).max(0.0);
            state.scroll = offset.clamp(0.0, max);
            if !state.scroll_throttle.allow(now) {
                None
            } else {
                let detected = state.page_at_scroll();
                if detected != state.current {
                    state.current = detected;
                    Some((detected, state.page_count))
                } else {
                    None
                }
            }
        };
        if let Some((page, total)) = relocated {
            self.events.emit(&RendererEvent::LocationChanged {
                location: Location::page(page),
                progress: paging::progress(page, total),
            });
        }
        self.ensure_visible().await;
    }

    /// Wheel input. Paginated mode turns one page per cooldown window;
    /// scrolled mode moves the track directly.
    pub async fn handle_wheel(&self, delta_y: f32, now: Instant) {
        enum Wheel {
            Turn(PageDirection),
            Scroll(f32),
            Ignore,
        }
        let action = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            match state.settings.view_mode {
                ViewMode::Paginated => {
                    if delta_y.abs() < WHEEL_THRESHOLD || !state.wheel_cooldown.allow(now) {
                        Wheel::Ignore
                    } else if delta_y > 0.0 {
                        Wheel::Turn(PageDirection::Next)
                    } else {
                        Wheel::Turn(PageDirection::Prev)
                    }
                }
                ViewMode::Scrolled => Wheel::Scroll(state.scroll + delta_y),
            }
        };
        match action {
            Wheel::Turn(direction) => apply_direction(self, direction).await,
            Wheel::Scroll(offset) => self.scroll_to(offset, now).await,
            Wheel::Ignore => {}
        }
    }

    /// Keyboard navigation.
    pub async fn handle_key(&self, key: NavKey) {
        let (mode, last, h) = {
            let state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            (
                state.settings.view_mode,
                state.page_count.saturating_sub(1),
                state.viewport.height,
            )
        };
        match key {
            NavKey::Left | NavKey::PageUp => self.prev().await,
            NavKey::Right | NavKey::PageDown => self.next().await,
            NavKey::Home => self.go_to_index(0).await,
            NavKey::End => self.go_to_index(last).await,
            NavKey::Up | NavKey::Down if mode == ViewMode::Scrolled => {
                let step = paging::scroll_offset(h, paging::DEFAULT_SCROLL_OVERLAP);
                let delta = if key == NavKey::Up { -step } else { step };
                let offset = self.state.lock().scroll + delta;
                self.scroll_to(offset, Instant::now()).await;
            }
            NavKey::Up => self.prev().await,
            NavKey::Down => self.next().await,
        }
    }

    /// Change the zoom factor, invalidating rendered surfaces.
    pub fn set_zoom(&self, zoom: f32) {
        let mut state = self.state.lock();
        if state.phase.is_destroyed() || state.settings.zoom == zoom {
            return;
        }
        state.settings.zoom = zoom.clamp(0.25, 8.0);
        state.rendered.clear();
        state.surfaces.clear();
    }

    /// Annotation overlay for the current page, in container space.
    pub fn overlay_shapes(&self) -> Vec<OverlayShape> {
        let state = self.state.lock();
        if !state.phase.is_ready() {
            return Vec::new();
        }
        let current = state.current;
        let Some((scale, dy)) = state.page_transform(current) else {
            return Vec::new();
        };
        state
            .marks
            .iter()
            .filter_map(|mark| match &mark.location {
                Location::PageCoord {
                    page_index,
                    rect: Some(rect),
                } if *page_index == current => {
                    let (color, style) = if mark.has_note() {
                        (mark.color.stroke(), OverlayStyle::WavyUnderline)
                    } else {
                        (mark.color.fill(), OverlayStyle::Fill)
                    };
                    Some(OverlayShape {
                        mark_id: mark.id.clone(),
                        rect: rect.scaled_then_translated(scale, scale, 0.0, dy),
                        color,
                        style,
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Text selection over the current page's text layer. `(x0, y0)` and
    /// `(x1, y1)` are the drag endpoints in container space; every span
    /// intersecting the dragged region is captured in reading order.
    pub async fn select_text(&self, x0: f32, y0: f32, x1: f32, y1: f32) {
        let target = {
            let state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            state
                .page_transform(state.current)
                .map(|(scale, dy)| (state.current, scale, dy))
        };
        let Some((page, scale, dy)) = target else {
            return;
        };
        let Some(spans) = self.page_text(page).await else {
            self.clear_selection();
            return;
        };

        // Drag endpoints back into page space.
        let left = x0.min(x1) / scale;
        let right = x0.max(x1) / scale;
        let top = (y0 - dy).min(y1 - dy) / scale;
        let bottom = (y0 - dy).max(y1 - dy) / scale;
        let band = Rect::new(left, top, right - left, bottom - top);

        let hit: Vec<&TextSpan> = spans.iter().filter(|s| s.rect.intersects(&band)).collect();
        if hit.is_empty() {
            self.clear_selection();
            return;
        }

        let text = hit
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let rects = hit
            .iter()
            .map(|s| s.rect.scaled_then_translated(scale, scale, 0.0, dy))
            .collect();
        let start = Location::PageCoord {
            page_index: page,
            rect: Some(hit[0].rect),
        };
        let end = Location::PageCoord {
            page_index: page,
            rect: Some(hit[hit.len() - 1].rect),
        };
        let Some(selection) = Selection::from_capture(&text, start, end, rects) else {
            self.clear_selection();
            return;
        };
        self.state.lock().selection = Some(selection.clone());
        self.events.emit(&RendererEvent::Selected(Some(selection)));
    }

    /// Drop any active selection, notifying listeners once.
    pub fn clear_selection(&self) {
        let had = self.state.lock().selection.take().is_some();
        if had {
            self.events.emit(&RendererEvent::Selected(None));
        }
    }

    /// Text runs for a page, fetched through the blocking pool once and
    /// cached alongside the page surfaces.
    async fn page_text(&self, index: usize) -> Option<Arc<Vec<TextSpan>>> {
        if let Some(spans) = self.state.lock().text_spans.get(&index).cloned() {
            return Some(spans);
        }
        let rasterizer = self.rasterizer.clone();
        let fetched = task::spawn_blocking(move || rasterizer.text_spans(index)).await;
        match fetched {
            Ok(Ok(spans)) => {
                let spans = Arc::new(spans);
                let mut state = self.state.lock();
                if state.phase.is_ready() {
                    state.text_spans.insert(index, spans.clone());
                }
                Some(spans)
            }
            Ok(Err(err)) => {
                debug!(page = index, %err, "text layer unavailable");
                None
            }
            Err(join) => {
                warn!(page = index, %join, "text task failed");
                None
            }
        }
    }

    fn fail_open(&self, message: String) {
        warn!(%message, "open failed");
        self.state.lock().phase = LifecyclePhase::Mounted;
        self.events.emit(&RendererEvent::Failed(message));
    }

    fn emit_location(&self) {
        let (page, total) = {
            let state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            (state.current, state.page_count)
        };
        self.events.emit(&RendererEvent::LocationChanged {
            location: Location::page(page),
            progress: paging::progress(page, total),
        });
    }

    /// Move to a page, with the slide/fade transition in paginated mode.
    /// Transitions are skipped while the container is hidden.
    async fn jump(&self, target: usize) {
        let moved = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() || state.page_count == 0 {
                return;
            }
            let target = target.min(state.page_count - 1);
            if target == state.current {
                false
            } else {
                let forward = target > state.current;
                state.current = target;
                if state.settings.view_mode == ViewMode::Scrolled {
                    let top = state.page_top(target);
                    state.scroll = top;
                } else if state.viewport.visible {
                    state.animation = Some(PageTurnAnimation::new(Instant::now(), forward));
                }
                true
            }
        };
        if moved {
            self.emit_location();
            self.clear_selection();
        }
        self.ensure_visible().await;
    }

    /// Rasterize one page if it is neither done nor in flight. The two sets
    /// guarantee a page is never rendered twice concurrently.
    async fn render_page(&self, index: usize) {
        let (scale, need_size) = {
            let mut state = self.state.lock();
            if !state.phase.is_ready()
                || index >= state.page_count
                || state.rendered.contains(&index)
                || state.rendering.contains(&index)
            {
                return;
            }
            state.rendering.insert(index);
            (state.raster_scale(index), !state.sized[index])
        };

        let rasterizer = self.rasterizer.clone();
        let outcome = task::spawn_blocking(move || {
            let page = rasterizer.rasterize(index, scale)?;
            let size = need_size.then(|| rasterizer.page_size(index).ok()).flatten();
            Ok::<_, RenderError>((page, size))
        })
        .await;
        let page = match outcome {
            Ok(Ok(page)) => Some(page),
            Ok(Err(err)) => {
                // Isolated: one bad page never takes down the document.
                warn!(page = index, %err, "page render failed");
                None
            }
            Err(join) => {
                warn!(page = index, %join, "render task failed");
                None
            }
        };

        let emit = {
            let mut state = self.state.lock();
            state.rendering.remove(&index);
            match page {
                Some((page, size)) if state.phase.is_ready() => {
                    let mut stale = false;
                    if !state.sized[index] {
                        if let Some(size) = size {
                            // The placeholder scale was wrong for this page;
                            // discard and re-render at the true size.
                            stale = size != state.page_sizes[index];
                            state.page_sizes[index] = size;
                            state.sized[index] = true;
                        }
                    }
                    if stale {
                        false
                    } else {
                        state.rendered.insert(index);
                        state.surfaces.insert(index, Arc::new(page));
                        true
                    }
                }
                _ => false,
            }
        };
        if emit {
            self.events.emit(&RendererEvent::SectionLoaded {
                chapter_index: index,
                chapter_title: format!("Page {}", index + 1),
            });
        }
    }

    /// Render the visible neighborhood and drop surfaces that left it.
    async fn ensure_visible(&self) {
        let wanted = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            let wanted = state.wanted_pages();
            let keep: HashSet<usize> = wanted.iter().copied().collect();
            state.surfaces.retain(|index, _| keep.contains(index));
            state.rendered.retain(|index| keep.contains(index));
            state.text_spans.retain(|index, _| keep.contains(index));
            wanted
        };
        for index in wanted {
            self.render_page(index).await;
        }
    }
}

#[async_trait]
impl BookRenderer for FixedRasterRenderer {
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

        let bytes = match source {
            BookSource::Bytes(bytes) => bytes,
            BookSource::Parsed(_) => {
                return self.fail_open(
                    "parsed reflowable source routed to the fixed-raster renderer".into(),
                );
            }
        };

        self.events
            .emit(&RendererEvent::Loading(LoadingStage::Parsing));
        let rasterizer = self.rasterizer.clone();
        let opened = timeout(
            OPEN_TIMEOUT,
            task::spawn_blocking(move || {
                let count = rasterizer.open(&bytes)?;
                // Every page starts with page 0's size; corrected as pages
                // render.
                let placeholder = rasterizer.page_size(0).unwrap_or((612.0, 792.0));
                Ok::<_, RenderError>((count, placeholder))
            }),
        )
        .await;
        let (page_count, placeholder) = match opened {
            Ok(Ok(Ok((count, placeholder)))) if count > 0 => (count, placeholder),
            Ok(Ok(Ok(_))) => return self.fail_open("document has no pages".into()),
            Ok(Ok(Err(err))) => return self.fail_open(err.to_string()),
            Ok(Err(join)) => return self.fail_open(format!("open task failed: {}", join)),
            Err(_) => {
                return self.fail_open(format!(
                    "open timed out after {}s",
                    OPEN_TIMEOUT.as_secs()
                ));
            }
        };

        self.events
            .emit(&RendererEvent::Loading(LoadingStage::Layout));

        let initial = match options.initial_location {
            Some(PersistedLocation::Page(n)) | Some(PersistedLocation::Spine(n)) => n,
            Some(PersistedLocation::Cfi(_)) | None => options.initial_chapter.unwrap_or(0),
        }
        .min(page_count - 1);

        let toc: Vec<TocItem> = (0..page_count)
            .map(|i| TocItem {
                id: Uuid::new_v4().to_string(),
                title: format!("Page {}", i + 1),
                level: 0,
                href: None,
                index: Some(i),
                subitems: vec![],
            })
            .collect();

        {
            let mut state = self.state.lock();
            state.page_count = page_count;
            state.page_sizes = vec![placeholder; page_count];
            let mut sized = vec![false; page_count];
            sized[0] = true;
            state.sized = sized;
            state.current = initial;
            state.toc = toc.clone();
            state.phase = LifecyclePhase::Ready;
            if state.settings.view_mode == ViewMode::Scrolled {
                let top = state.page_top(initial);
                state.scroll = top;
            }
        }
        self.events.emit(&RendererEvent::TocReady(toc));
        self.events
            .emit(&RendererEvent::Loading(LoadingStage::Ready));
        debug!(pages = page_count, "fixed-raster open complete");

        self.emit_location();
        self.ensure_visible().await;
    }

    async fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if state.phase.is_destroyed() {
                return;
            }
            state.phase = LifecyclePhase::Destroyed;
            state.animation = None;
            state.resize_debounce.cancel();
            state.pending_size = None;
            state.stability = None;
            state.selection = None;
            state.text_spans.clear();
            state.surfaces.clear();
            state.rendered.clear();
            state.rendering.clear();
            state.marks.clear();
            state.toc.clear();
            state.page_count = 0;
        }
        self.rasterizer.close();
        self.events.clear();
        debug!("fixed-raster renderer destroyed");
    }

    async fn go_to(&self, target: NavTarget) {
        let index = match target {
            NavTarget::Location(location) => location.index(),
            NavTarget::Persisted(PersistedLocation::Page(n))
            | NavTarget::Persisted(PersistedLocation::Spine(n)) => n,
            NavTarget::Persisted(PersistedLocation::Cfi(_)) => return,
            NavTarget::Href(_) => return,
        };
        self.jump(index).await;
    }

    async fn go_to_index(&self, index: usize) {
        self.jump(index).await;
    }

    async fn next(&self) {
        let target = {
            let state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            paging::navigate(PageDirection::Next, state.current, state.page_count)
        };
        self.jump(target).await;
    }

    async fn prev(&self) {
        let target = {
            let state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            paging::navigate(PageDirection::Prev, state.current, state.page_count)
        };
        self.jump(target).await;
    }

    async fn handle_click(&self, x: f32, y: f32) {
        let width = {
            let state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            state.viewport.width
        };
        // Clicks on a highlight belong to the overlay.
        if self.overlay_shapes().iter().any(|s| s.rect.contains(x, y)) {
            return;
        }
        apply_direction(self, paging::direction(x, width)).await;
    }

    async fn tick(&self, now: Instant) {
        let invalidate = {
            let mut state = self.state.lock();
            if !state.phase.is_ready() {
                return;
            }
            if let Some(anim) = state.animation {
                if anim.is_finished(now) {
                    state.animation = None;
                }
            }
            if state.resize_debounce.fire(now) {
                state.stability = Some(LayoutStabilityGate::new());
            }
            let mut invalidate = false;
            let pending = state.pending_size;
            if let (Some(gate), Some((w, h))) = (state.stability.as_mut(), pending) {
                match gate.poll(w as u32, h as u32) {
                    Stability::Unsettled => {}
                    Stability::Stable | Stability::GaveUp => {
                        state.stability = None;
                        state.pending_size = None;
                        state.viewport.width = w;
                        state.viewport.height = h;
                        // New dimensions change the raster scale of every
                        // page.
                        state.rendered.clear();
                        state.surfaces.clear();
                        invalidate = true;
                    }
                }
            }
            invalidate
        };
        if invalidate {
            self.emit_location();
            self.clear_selection();
        }
        self.ensure_visible().await;
    }

    async fn resize(&self, width: f32, height: f32) {
        let mut state = self.state.lock();
        if !state.phase.is_ready() {
            return;
        }
        let unchanged = state.viewport.width == width && state.viewport.height == height;
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
        let state = self.state.lock();
        state
            .phase
            .is_ready()
            .then(|| Location::page(state.current))
    }

    fn progress(&self) -> f32 {
        let state = self.state.lock();
        paging::progress(state.current, state.page_count)
    }

    fn total_pages(&self) -> usize {
        self.state.lock().page_count
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
    }

    fn remove_annotation(&self, id: &str) {
        self.state.lock().marks.retain(|m| m.id != id);
    }

    fn clear_annotations(&self) {
        self.state.lock().marks.clear();
    }

    fn set_font_size(&self, _size: f32) {
        // Raster pages have no reflowable text.
    }

    fn set_line_height(&self, _line_height: f32) {}

    fn set_theme(&self, theme: Theme) {
        self.state.lock().settings.theme = theme;
    }

    fn set_view_mode(&self, mode: ViewMode) {
        let mut state = self.state.lock();
        if state.phase.is_destroyed() || state.settings.view_mode == mode {
            return;
        }
        state.settings.view_mode = mode;
        state.animation = None;
        if mode == ViewMode::Scrolled {
            let top = state.page_top(state.current);
            state.scroll = top;
        }
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
