//! Core engine types
//!
//! Format-agnostic types shared by both renderer backends: geometry, the
//! table of contents, annotation marks, view settings and the parsed-book
//! object produced by the loader.

use serde::{Deserialize, Serialize};

use super::location::Location;

/// Rectangle in container coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Translate by a frame origin (reflowable sub-document → container).
    pub fn translated(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Scale each axis independently, then translate. Fixed-layout frames
    /// may be non-uniformly scaled, so the axes never share a factor.
    pub fn scaled_then_translated(&self, sx: f32, sy: f32, dx: f32, dy: f32) -> Rect {
        Rect::new(
            self.x * sx + dx,
            self.y * sy + dy,
            self.width * sx,
            self.height * sy,
        )
    }
}

/// Table of contents entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocItem {
    /// Stable id (synthetic when the source provides none)
    pub id: String,
    /// Entry title
    pub title: String,
    /// Nesting depth from the root, 0-based
    pub level: usize,
    /// Target href within the book
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Flat section/page index for direct navigation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Nested children
    #[serde(default)]
    pub subitems: Vec<TocItem>,
}

impl TocItem {
    /// Depth-first search for the entry covering a flat section index.
    /// Returns the deepest entry whose `index` matches.
    pub fn find_by_index<'a>(items: &'a [TocItem], index: usize) -> Option<&'a TocItem> {
        for item in items {
            if let Some(found) = Self::find_by_index(&item.subitems, index) {
                return Some(found);
            }
            if item.index == Some(index) {
                return Some(item);
            }
        }
        None
    }
}

/// Annotation color palette
///
/// Consumers pass the name; the renderer owns the translucent fill values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
    Red,
    Violet,
}

impl HighlightColor {
    /// Translucent RGBA fill for plain highlights.
    pub fn fill(&self) -> [f32; 4] {
        let (r, g, b) = match self {
            HighlightColor::Yellow => (1.0, 0.92, 0.23),
            HighlightColor::Green => (0.30, 0.69, 0.31),
            HighlightColor::Blue => (0.13, 0.59, 0.95),
            HighlightColor::Pink => (0.91, 0.12, 0.39),
            HighlightColor::Purple => (0.61, 0.15, 0.69),
            HighlightColor::Red => (0.96, 0.26, 0.21),
            HighlightColor::Violet => (0.40, 0.23, 0.72),
        };
        [r, g, b, 0.4]
    }

    /// Opaque stroke used for the wavy note underline.
    pub fn stroke(&self) -> [f32; 4] {
        let [r, g, b, _] = self.fill();
        [r, g, b, 1.0]
    }
}

impl Default for HighlightColor {
    fn default() -> Self {
        HighlightColor::Yellow
    }
}

/// Annotation mark mirrored from the external annotation store
///
/// The renderer never owns these: it mirrors a live set for overlay drawing
/// and reconciles on `clear_annotations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationMark {
    pub id: String,
    pub location: Location,
    pub color: HighlightColor,
    /// The highlighted text, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Attached note; presence switches the overlay from fill to underline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AnnotationMark {
    pub fn has_note(&self) -> bool {
        self.note.as_deref().map_or(false, |n| !n.is_empty())
    }
}

/// Display theme applied to both backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    Sepia,
}

impl Theme {
    /// (background, foreground) colors as CSS hex values.
    pub fn colors(&self) -> (&'static str, &'static str) {
        match self {
            Theme::Light => ("#ffffff", "#1a1a1a"),
            Theme::Dark => ("#1e1e1e", "#d4d4d4"),
            Theme::Sepia => ("#f4ecd8", "#5b4636"),
        }
    }
}

/// Page layout mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    /// One visible page at a time
    Paginated,
    /// All pages laid out in a vertical scroll track
    Scrolled,
}

/// View settings routed through the single apply-styles path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSettings {
    pub font_size: f32,
    pub line_height: f32,
    pub theme: Theme,
    pub view_mode: ViewMode,
    /// User zoom factor (fixed-raster only)
    pub zoom: f32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            font_size: 16.0,
            line_height: 1.5,
            theme: Theme::Light,
            view_mode: ViewMode::Paginated,
            zoom: 1.0,
        }
    }
}

/// Loading stage reported while `open()` is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStage {
    Detecting,
    Parsing,
    Layout,
    Ready,
}

/// Book metadata extracted by the loader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub title: String,
    pub creators: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
}

/// Fixed-layout rendition hints from the package document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendition {
    /// "reflowable" or "pre-paginated"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<String>,
}

impl Rendition {
    pub fn is_fixed_layout(&self) -> bool {
        self.layout.as_deref() == Some("pre-paginated")
    }
}

/// Reading direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDirection {
    Ltr,
    Rtl,
}

impl Default for ReadingDirection {
    fn default() -> Self {
        ReadingDirection::Ltr
    }
}

/// One ordered content section (spine item, comic page, FB2 body section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Source href within the container
    pub href: String,
    /// Media type of the section content
    pub media_type: String,
    /// Raw section bytes (XHTML, image data, ...)
    #[serde(skip)]
    pub content: Vec<u8>,
}

/// The generic parsed-book object consumed by the reflowable renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedBook {
    pub metadata: BookMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendition: Option<Rendition>,
    #[serde(default)]
    pub dir: ReadingDirection,
    #[serde(default)]
    pub toc: Vec<TocItem>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl ParsedBook {
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Resolve a TOC href to its flat section index.
    pub fn section_index_for_href(&self, href: &str) -> Option<usize> {
        let target = href.split('#').next().unwrap_or(href);
        self.sections
            .iter()
            .position(|s| s.href == target || s.href.ends_with(target))
    }
}
